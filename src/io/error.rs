//! Errors that can occur in the io module

use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur in file io operations
pub enum IOError {
    #[error("{0}")]
    /// Error derived from [`std::io::Error`]
    StdIO(#[from] std::io::Error),

    #[error("{0}")]
    /// Error derived from [`csv::Error`]
    Csv(#[from] csv::Error),

    /// A column the reader needs is absent from the header.
    #[error("{file}: missing column {column}")]
    MissingColumn {
        /// The file being read
        file: String,
        /// The name of the missing column
        column: String,
    },

    /// A record field could not be parsed.
    #[error("{file}:{line}: could not parse {field} from {value:?}")]
    BadEventRecord {
        /// The file being read
        file: String,
        /// The line of the record
        line: u64,
        /// The name of the field
        field: String,
        /// The text that was found
        value: String,
    },

    /// The rows of an event were split by rows of another event.
    #[error("{file}: rows of event {event} are not contiguous")]
    NonContiguousEvent {
        /// The file being read
        file: String,
        /// The event id
        event: u64,
    },

    /// The file does not start with the calibration magic.
    #[error("{file} is not a calibration file (found magic {found:?})")]
    BadMagic {
        /// The file being read
        file: String,
        /// The bytes found instead of the magic
        found: Vec<u8>,
    },

    /// The calibration file was written by an unknown format version.
    #[error("{file}: unsupported calibration format version {version}")]
    UnsupportedVersion {
        /// The file being read
        file: String,
        /// The version found
        version: u32,
    },

    /// Error to describe some kind of inconsistent state within a calibration file.
    #[error("Inconsistent calibration file (file: {file}, expected: {expected}, found: {found})")]
    CalibrationInconsistent {
        /// The file being read
        file: String,
        /// The value that was expected
        expected: String,
        /// The unexpected value that was found
        found: String,
    },

    #[error("{0}")]
    /// A profile name was not valid utf8
    BadUtf8(#[from] std::string::FromUtf8Error),
}
