//! CSV event input, and CSV output of the Qn vectors of each event.
//!
//! Event files have one row per data vector, with the columns
//! `event,detector,channel,phi,weight` followed by one column per event class variable. The rows
//! of an event must be contiguous. An empty `channel` marks a track, an empty `detector` an event
//! row without data vectors.

use std::{collections::HashSet, fs::File, path::Path, str::FromStr};

use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use itertools::Itertools;
use log::{debug, trace};

use super::error::IOError;
use crate::{constants::PLAIN_QN_VECTOR_NAME, CorrectionsManager, QnCorrError, QnVector};

/// One data vector of an event file.
#[derive(Clone, Debug, PartialEq)]
pub struct DataRecord {
    /// The detector configuration receiving the data vector
    pub detector: String,
    /// The channel, `None` for tracks
    pub channel: Option<usize>,
    /// Azimuthal angle
    pub phi: f64,
    /// Raw weight
    pub weight: f64,
}

/// The rows of one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventRecord {
    /// The event id
    pub event: u64,
    /// The event class variables, in the order they were requested
    pub variables: Vec<f64>,
    /// The data vectors
    pub data: Vec<DataRecord>,
}

impl EventRecord {
    /// Hand every data vector of the event to `manager`, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// See [`CorrectionsManager::add_data_vector`].
    pub fn add_to(&self, manager: &mut CorrectionsManager) -> Result<usize, QnCorrError> {
        let mut accepted = 0;
        for data in self.data.iter() {
            if manager.add_data_vector(&data.detector, data.channel, data.phi, data.weight)? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }
}

struct Columns {
    event: usize,
    detector: usize,
    channel: usize,
    phi: usize,
    weight: usize,
    variables: Vec<usize>,
}

impl Columns {
    fn from_headers<S: AsRef<str>>(
        headers: &StringRecord,
        variable_names: &[S],
        file: &str,
    ) -> Result<Self, IOError> {
        let find = |column: &str| {
            headers
                .iter()
                .position(|header| header == column)
                .ok_or_else(|| IOError::MissingColumn {
                    file: file.to_string(),
                    column: column.to_string(),
                })
        };
        Ok(Self {
            event: find("event")?,
            detector: find("detector")?,
            channel: find("channel")?,
            phi: find("phi")?,
            weight: find("weight")?,
            variables: variable_names
                .iter()
                .map(|name| find(name.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }
}

struct Row {
    event: u64,
    variables: Vec<f64>,
    data: Option<DataRecord>,
}

fn parse_field<T: FromStr>(
    record: &StringRecord,
    idx: usize,
    field: &str,
    file: &str,
) -> Result<T, IOError> {
    let value = record.get(idx).unwrap_or_default();
    value.parse().map_err(|_| IOError::BadEventRecord {
        file: file.to_string(),
        line: record.position().map_or(0, |pos| pos.line()),
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_row(
    record: &StringRecord,
    columns: &Columns,
    variable_names: &[impl AsRef<str>],
    file: &str,
) -> Result<Row, IOError> {
    let event = parse_field(record, columns.event, "event", file)?;
    let variables = columns
        .variables
        .iter()
        .zip(variable_names)
        .map(|(&idx, name)| parse_field::<f64>(record, idx, name.as_ref(), file))
        .collect::<Result<Vec<_>, _>>()?;
    let detector = record.get(columns.detector).unwrap_or_default();
    let data = if detector.is_empty() {
        None
    } else {
        let channel = match record.get(columns.channel).unwrap_or_default() {
            "" => None,
            _ => Some(parse_field(record, columns.channel, "channel", file)?),
        };
        Some(DataRecord {
            detector: detector.to_string(),
            channel,
            phi: parse_field(record, columns.phi, "phi", file)?,
            weight: parse_field(record, columns.weight, "weight", file)?,
        })
    };
    Ok(Row {
        event,
        variables,
        data,
    })
}

/// Read every event of the file at `path`, with the event class variables in `variable_names`.
///
/// The event class variables of an event are taken from its first row.
///
/// # Errors
///
/// - [`IOError::MissingColumn`] if a column is absent from the header.
/// - [`IOError::BadEventRecord`] if a field can't be parsed.
/// - [`IOError::NonContiguousEvent`] if the rows of an event are split.
/// - [`IOError::Csv`] for malformed CSV.
pub fn read_events<T: AsRef<Path>, S: AsRef<str>>(
    path: T,
    variable_names: &[S],
) -> Result<Vec<EventRecord>, IOError> {
    trace!("start read_events");
    let file = path.as_ref().display().to_string();
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_path(&path)?;
    let columns = Columns::from_headers(reader.headers()?, variable_names, &file)?;
    let rows = reader
        .records()
        .map(|record| parse_row(&record?, &columns, variable_names, &file))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let mut events = vec![];
    let chunks = rows.into_iter().chunk_by(|row| row.event);
    for (event, mut rows) in &chunks {
        if !seen.insert(event) {
            return Err(IOError::NonContiguousEvent { file, event });
        }
        let first = match rows.next() {
            Some(first) => first,
            None => continue,
        };
        let data = first
            .data
            .into_iter()
            .chain(rows.filter_map(|row| row.data))
            .collect();
        events.push(EventRecord {
            event,
            variables: first.variables,
            data,
        });
    }
    debug!("read {} events from {}", events.len(), file);
    trace!("end read_events");
    Ok(events)
}

/// Writes the Qn vectors of every event as CSV rows `event,detector,step,harmonic,qx,qy,good`.
///
/// For each detector, the plain Qn vector is written, followed by the output of each Qn vector
/// correction that applies.
pub struct QnWriter {
    writer: Writer<File>,
    rows: u64,
}

impl QnWriter {
    /// The header row of a Qn file.
    pub const HEADER: [&'static str; 7] =
        ["event", "detector", "step", "harmonic", "qx", "qy", "good"];

    /// Create the file at `path` and write the header.
    ///
    /// # Errors
    ///
    /// Can throw [`IOError::Csv`] if the file can't be created.
    pub fn new<T: AsRef<Path>>(path: T) -> Result<Self, IOError> {
        let mut writer = Writer::from_path(path)?;
        writer.write_record(Self::HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    fn write_qn(
        &mut self,
        event: u64,
        detector: &str,
        step: &str,
        qn: &QnVector,
    ) -> Result<(), IOError> {
        for harmonic in qn.harmonics() {
            self.writer.write_record(&[
                event.to_string(),
                detector.to_string(),
                step.to_string(),
                harmonic.to_string(),
                qn.qx(harmonic).to_string(),
                qn.qy(harmonic).to_string(),
                u8::from(qn.is_good_quality()).to_string(),
            ])?;
            self.rows += 1;
        }
        Ok(())
    }

    /// Write the Qn vectors of the event `manager` just processed: the plain vector of each
    /// detector, then the output of every step its chain applied.
    ///
    /// # Errors
    ///
    /// Can throw [`IOError::Csv`] if a row can't be written.
    pub fn write_event(&mut self, event: u64, manager: &CorrectionsManager) -> Result<(), IOError> {
        for detector in manager.detectors() {
            self.write_qn(
                event,
                detector.name(),
                PLAIN_QN_VECTOR_NAME,
                detector.plain_qn_vector().qn(),
            )?;
            for step in detector.applied_qn_corrections() {
                self.write_qn(
                    event,
                    detector.name(),
                    step.name(),
                    step.corrected_qn_vector(),
                )?;
            }
        }
        Ok(())
    }

    /// The number of rows written, excluding the header.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush the rows written so far.
    ///
    /// # Errors
    ///
    /// Can throw [`IOError::StdIO`] if the file can't be written.
    pub fn flush(&mut self) -> Result<(), IOError> {
        self.writer.flush()?;
        Ok(())
    }
}
