//! Command Line Interface helpers for qncorr

use crate::{
    error::{CLIError::InvalidCommandLineArgument, QnCorrError, QnCorrError::DryRun},
    get_durations,
    io::{read_calibration_file, read_events, write_calibration_file, QnWriter},
    with_increment_duration, ChannelLayout, CorrectionsManager, DetectorSettings,
    DetectorSettingsBuilder, EventClassVariable, EventClassVariablesSet, GainEqualizationMethod,
    HarmonicMask, PassContext, QnNormalization,
};
use clap::{arg, command, ErrorKind::ArgumentNotFound, PossibleValue, ValueHint::FilePath};
use log::{debug, info, trace};
use prettytable::{format as prettyformat, row, table, Table};
use std::{
    collections::HashMap,
    ffi::OsString,
    fmt::{Debug, Display},
    time::Duration,
};

/// Input and output paths of a pass
#[derive(Debug, Default, Clone)]
pub struct IOContext {
    /// The event CSV file
    pub events_in: String,
    /// Optional calibration file from a previous pass
    pub calibration_in: Option<String>,
    /// Optional Qn vector CSV output path
    pub qn_out: Option<String>,
    /// Optional calibration file output path
    pub calibration_out: Option<String>,
}

/// Everything needed to run one pass from the command line.
pub struct QnCorrContext {
    /// Input / output paths
    pub io_ctx: IOContext,
    /// Corrections and pass options
    pub pass_ctx: PassContext,
    /// One settings per detector
    pub detectors: Vec<DetectorSettings>,
    /// The event class variable columns, in the order they are binned
    pub variable_names: Vec<String>,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match GIT_HEAD_REF {
        Some(hr) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                GIT_COMMIT_HASH.unwrap_or("<unknown>"),
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {}", hr)?;
        }
        None => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

/// A table of which steps collect and which apply, per detector.
pub fn usage_table(manager: &CorrectionsManager) -> Table {
    let mut usage_table = table!(["detector", "collecting", "applying"]);
    usage_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    for (name, report) in manager.report_usage() {
        usage_table.add_row(row![
            name,
            report.collecting.join(", "),
            report.applying.join(", ")
        ]);
    }
    usage_table
}

impl Display for QnCorrContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        writeln!(f, "Events:               {}", self.io_ctx.events_in)?;
        match &self.io_ctx.calibration_in {
            Some(path) => writeln!(f, "Calibration input:    {}", path)?,
            None => writeln!(f, "Calibration input:    none, every step collects")?,
        }

        let mut detector_table = table!(["", "harmonics", "channels", "normalization"]);
        detector_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for settings in self.detectors.iter() {
            detector_table.add_row(row![r =>
                format!("{}:", settings.name),
                format!("{:?}", settings.harmonics),
                settings
                    .channels
                    .as_ref()
                    .map_or("tracks".to_string(), |layout| layout.num_channels().to_string()),
                settings.normalization
            ]);
        }
        writeln!(
            f,
            "Detector details (detectors={}):\n{}",
            self.detectors.len(),
            detector_table
        )?;

        if self.variable_names.is_empty() {
            writeln!(f, "Event classes:        single class")?;
        } else if let Some(settings) = self.detectors.first() {
            for variable in settings.event_classes.iter() {
                writeln!(f, "Event class:          {}", variable)?;
            }
        }

        writeln!(f, "Pass Context: \n{}", &self.pass_ctx)?;

        writeln!(
            f,
            "{} write Qn vectors{}.",
            if self.io_ctx.qn_out.is_some() {
                "Will"
            } else {
                "Will not"
            },
            self.io_ctx
                .qn_out
                .as_ref()
                .map_or(String::new(), |path| format!(" to {path}"))
        )?;
        writeln!(
            f,
            "{} write calibration statistics{}.",
            if self.io_ctx.calibration_out.is_some() {
                "Will"
            } else {
                "Will not"
            },
            self.io_ctx
                .calibration_out
                .as_ref()
                .map_or(String::new(), |path| format!(" to {path}"))
        )?;
        Ok(())
    }
}

fn invalid_argument(option: &str, expected: &str, received: &str) -> QnCorrError {
    QnCorrError::CLIError(InvalidCommandLineArgument {
        option: option.into(),
        expected: expected.into(),
        received: received.into(),
    })
}

/// Parse `NAME:BINS:MIN:MAX` into the event class variable number `var_id`.
fn parse_class_var(var_id: usize, input: &str) -> Result<EventClassVariable, QnCorrError> {
    let expected = "NAME:BINS:MIN:MAX, e.g. centrality:10:0:100";
    let invalid = || invalid_argument("--class-var <VARIABLE>", expected, input);
    match input.split(':').collect::<Vec<_>>()[..] {
        [name, bins, min, max] if !name.is_empty() => {
            let bins = bins.parse::<usize>().map_err(|_| invalid())?;
            let min = min.parse::<f64>().map_err(|_| invalid())?;
            let max = max.parse::<f64>().map_err(|_| invalid())?;
            EventClassVariable::new(var_id, name, bins, min, max)
        }
        _ => Err(invalid()),
    }
}

/// Parse `NAME`, `NAME:CHANNELS` or `NAME:CHANNELS:GROUPS` into a name and an optional layout.
/// Groups split the channels into equal contiguous ranges.
fn parse_detector(input: &str) -> Result<(String, Option<ChannelLayout>), QnCorrError> {
    let expected = "NAME for tracks, NAME:CHANNELS or NAME:CHANNELS:GROUPS";
    let invalid = || invalid_argument("--detector <DETECTOR>", expected, input);
    let parse_positive = |value: &str| match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid()),
    };
    match input.split(':').collect::<Vec<_>>()[..] {
        [name] if !name.is_empty() => Ok((name.to_string(), None)),
        [name, channels] if !name.is_empty() => Ok((
            name.to_string(),
            Some(ChannelLayout::new(parse_positive(channels)?)),
        )),
        [name, channels, groups] if !name.is_empty() => {
            let channels = parse_positive(channels)?;
            let groups = parse_positive(groups)?;
            if groups > channels {
                return Err(invalid());
            }
            let layout = ChannelLayout::new(channels)
                .with_groups((0..channels).map(|ch| ch * groups / channels).collect())?;
            Ok((name.to_string(), Some(layout)))
        }
        _ => Err(invalid()),
    }
}

impl QnCorrContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, QnCorrError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Correct event-by-event Qn flow vectors for non-uniform detector \
                    acceptance, one calibration pass at a time.")
            .args(&[
                // input options
                arg!(-e --events <PATH> "Event CSV file: event,detector,channel,phi,weight \
                        and one column per event class variable")
                    .required(true)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(-c --"calibration-in" <PATH> "Calibration file written by a previous pass")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),

                // detector options
                arg!(-d --detector <DETECTOR> "A detector: NAME for tracks, NAME:CHANNELS or \
                        NAME:CHANNELS:GROUPS for a channelized detector. Repeat for more detectors")
                    .required(true)
                    .multiple_occurrences(true)
                    .help_heading("DETECTORS"),
                arg!(--harmonics <HARMONICS> "Harmonics of every detector [default: 2]")
                    .multiple_values(true)
                    .required(false)
                    .help_heading("DETECTORS"),
                arg!(--normalization <METHOD> "How plain Qn vectors are normalized")
                    .required(false)
                    .possible_values([
                        PossibleValue::new("none").help("Leave the sums as they are"),
                        PossibleValue::new("sqrt-m").help("Q / sqrt(M)"),
                        PossibleValue::new("m").help("Q / M [default]"),
                        PossibleValue::new("q-length").help("Q / |Q|"),
                    ])
                    .help_heading("DETECTORS"),

                // event classes
                arg!(--"class-var" <VARIABLE> "An event class variable NAME:BINS:MIN:MAX, read \
                        from the column NAME. Repeat for more variables")
                    .required(false)
                    .multiple_occurrences(true)
                    .help_heading("EVENT CLASSES"),

                // corrections
                arg!(--"gain-eq" <METHOD> "Gain equalization of channelized detectors")
                    .required(false)
                    .possible_values([
                        PossibleValue::new("none").help("No gain equalization [default]"),
                        PossibleValue::new("average").help("Weight over channel average"),
                        PossibleValue::new("width")
                            .help("Weight shifted by channel average, over channel width"),
                    ])
                    .help_heading("CORRECTION"),
                arg!(--"group-weights" "Scale equalized weights by their channel group average")
                    .help_heading("CORRECTION"),
                arg!(--"no-recentering" "Do not recenter Qn vectors")
                    .help_heading("CORRECTION"),
                arg!(--"width-eq" "Width equalize recentered Qn vectors")
                    .conflicts_with("no-recentering")
                    .help_heading("CORRECTION"),
                arg!(--"min-entries" <N> "Entries a bin needs before recentering uses it")
                    .required(false)
                    .help_heading("CORRECTION"),
                arg!(--"finish-calibration" "Steps that apply stop collecting")
                    .help_heading("CORRECTION"),

                // output options
                arg!(-o --"qn-out" <PATH> "Path for Qn vector CSV output")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("OUTPUT"),
                arg!(-C --"calibration-out" <PATH> "Path for the calibration file of this pass")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("OUTPUT"),

                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_io_matches(matches: &clap::ArgMatches) -> Result<IOContext, QnCorrError> {
        Ok(IOContext {
            events_in: matches
                .value_of("events")
                .map(Into::into)
                .ok_or_else(|| invalid_argument("--events <PATH>", "a path", "nothing"))?,
            calibration_in: matches.value_of("calibration-in").map(Into::into),
            qn_out: matches.value_of("qn-out").map(Into::into),
            calibration_out: matches.value_of("calibration-out").map(Into::into),
        })
    }

    fn parse_pass_matches(matches: &clap::ArgMatches) -> Result<PassContext, QnCorrError> {
        let defaults = PassContext::default();
        let gain_equalization = match matches.value_of("gain-eq") {
            Some("average") => GainEqualizationMethod::Average,
            Some("width") => GainEqualizationMethod::Width,
            _ => GainEqualizationMethod::None,
        };
        let min_entries = match matches.value_of_t::<u64>("min-entries") {
            Ok(min_entries) => min_entries,
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => defaults.min_entries,
                _ => return Err(err.into()),
            },
        };
        Ok(PassContext {
            gain_equalization,
            use_channel_groups_weights: matches.is_present("group-weights"),
            recentering: !matches.is_present("no-recentering"),
            width_equalization: matches.is_present("width-eq"),
            min_entries,
            finish_calibration: matches.is_present("finish-calibration"),
            draw_progress: !matches.is_present("no-draw-progress"),
        })
    }

    fn parse_event_class_matches(
        matches: &clap::ArgMatches,
    ) -> Result<(Vec<String>, EventClassVariablesSet), QnCorrError> {
        let variables = matches
            .values_of("class-var")
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(var_id, input)| parse_class_var(var_id, input))
            .collect::<Result<Vec<_>, _>>()?;
        let names = variables.iter().map(|v| v.name.clone()).collect();
        Ok((names, EventClassVariablesSet::new(variables)))
    }

    fn parse_detector_matches(
        matches: &clap::ArgMatches,
        event_classes: &EventClassVariablesSet,
    ) -> Result<Vec<DetectorSettings>, QnCorrError> {
        let harmonics = match matches.values_of_t::<u32>("harmonics") {
            Ok(harmonics) => harmonics,
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => vec![2],
                _ => return Err(err.into()),
            },
        };
        if let Err(err) = HarmonicMask::from_harmonics(&harmonics) {
            return Err(invalid_argument(
                "--harmonics <HARMONICS>",
                &err.to_string(),
                &format!("{:?}", harmonics),
            ));
        }
        let normalization = match matches.value_of("normalization") {
            Some("none") => QnNormalization::None,
            Some("sqrt-m") => QnNormalization::QoverSquareRootOfM,
            Some("q-length") => QnNormalization::QoverQlength,
            _ => QnNormalization::QoverM,
        };
        matches
            .values_of("detector")
            .into_iter()
            .flatten()
            .map(|input| -> Result<DetectorSettings, QnCorrError> {
                let (name, channels) = parse_detector(input)?;
                let mut builder = DetectorSettingsBuilder::default();
                builder
                    .name(name)
                    .harmonics(harmonics.clone())
                    .normalization(normalization)
                    .event_classes(event_classes.clone());
                if let Some(layout) = channels {
                    builder.channels(layout);
                }
                Ok(builder.build()?)
            })
            .collect()
    }

    /// Parse an iterator of arguments, `args` into a `QnCorrContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `QnCorrError::CLIError` if the arguments are invalid.
    /// - `QnCorrError::InvalidEventClass` for an empty event class range.
    /// - `QnCorrError::DryRun` if `--dry-run` was given.
    pub fn from_args<I, T>(args: I) -> Result<Self, QnCorrError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let io_ctx = Self::parse_io_matches(&matches)?;
        let pass_ctx = Self::parse_pass_matches(&matches)?;
        let (variable_names, event_classes) = Self::parse_event_class_matches(&matches)?;
        let detectors = Self::parse_detector_matches(&matches, &event_classes)?;

        let result = Self {
            io_ctx,
            pass_ctx,
            detectors,
            variable_names,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Read the events, run them through the corrections and write the outputs.
    ///
    /// # Errors
    ///
    /// can raise:
    /// - `QnCorrError::IOError` if an input can't be read or an output can't be written.
    /// - configuration errors from the detector settings, e.g. duplicate detector names.
    /// - errors from the event loop, e.g. data vectors for an unknown detector.
    pub fn run(self) -> Result<HashMap<String, Duration>, QnCorrError> {
        let QnCorrContext {
            io_ctx,
            pass_ctx,
            detectors,
            variable_names,
        } = self;

        // ////////// //
        // Prepare IO //
        // ////////// //

        let calibration_input = match io_ctx.calibration_in.as_ref() {
            Some(path) => Some(with_increment_duration!(
                "read",
                read_calibration_file(path)?
            )),
            None => None,
        };
        let events = with_increment_duration!(
            "read",
            read_events(&io_ctx.events_in, &variable_names)?
        );
        info!("read {} events from {}", events.len(), io_ctx.events_in);

        let mut qn_writer = match io_ctx.qn_out.as_ref() {
            Some(path) => Some(QnWriter::new(path)?),
            None => None,
        };

        // ///// //
        // Pass  //
        // ///// //

        let mut manager = pass_ctx.build_manager(detectors, calibration_input)?;
        pass_ctx.process_events(&mut manager, &events, qn_writer.as_mut())?;
        info!(
            "processed {} events, steps used:\n{}",
            manager.num_events(),
            usage_table(&manager)
        );

        // Finalise the outputs.
        if let Some(qn_writer) = qn_writer.as_mut() {
            with_increment_duration!("write", qn_writer.flush()?);
            info!("wrote {} Qn vector rows", qn_writer.rows());
        }
        if let Some(path) = io_ctx.calibration_out.as_ref() {
            with_increment_duration!(
                "write",
                write_calibration_file(path, manager.calibration_output())?
            );
            info!(
                "wrote {} calibration profiles to {}",
                manager.calibration_output().len(),
                path
            );
        }

        Ok(get_durations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_class_var() {
        let variable = parse_class_var(1, "centrality:10:0:100").unwrap();
        assert_eq!(variable.var_id, 1);
        assert_eq!(variable.name, "centrality");
        assert_eq!(variable.num_bins, 10);
        assert!(matches!(
            parse_class_var(0, "centrality:10:0"),
            Err(QnCorrError::CLIError(_))
        ));
        assert!(matches!(
            parse_class_var(0, "centrality:ten:0:100"),
            Err(QnCorrError::CLIError(_))
        ));
        assert!(matches!(
            parse_class_var(0, "centrality:10:100:0"),
            Err(QnCorrError::InvalidEventClass { .. })
        ));
    }

    #[test]
    fn test_parse_detector() {
        let (name, layout) = parse_detector("TPC").unwrap();
        assert_eq!(name, "TPC");
        assert!(layout.is_none());

        let (name, layout) = parse_detector("V0A:32").unwrap();
        assert_eq!(name, "V0A");
        assert_eq!(layout.unwrap().num_channels(), 32);

        let (_, layout) = parse_detector("V0A:32:4").unwrap();
        let layout = layout.unwrap();
        assert_eq!(layout.num_groups(), 4);
        assert_eq!(layout.group(0), Some(0));
        assert_eq!(layout.group(7), Some(0));
        assert_eq!(layout.group(8), Some(1));
        assert_eq!(layout.group(31), Some(3));

        for bad in ["", ":8", "V0A:0", "V0A:x", "V0A:4:8", "V0A:4:2:1"] {
            assert!(
                matches!(parse_detector(bad), Err(QnCorrError::CLIError(_))),
                "{bad}"
            );
        }
    }
}

#[cfg(test)]
mod argparse_tests {
    use crate::{error::QnCorrError, GainEqualizationMethod, QnCorrContext, QnNormalization};

    #[test]
    fn test_parse_missing_input() {
        // no events
        let args = vec!["qncorr", "-d", "TPC"];
        assert!(matches!(
            QnCorrContext::from_args(&args),
            Err(QnCorrError::ClapError(_))
        ));

        // no detector
        let args = vec!["qncorr", "-e", "events.csv"];
        assert!(matches!(
            QnCorrContext::from_args(&args),
            Err(QnCorrError::ClapError(_))
        ));
    }

    #[test]
    fn test_parse_defaults() {
        let args = vec!["qncorr", "-e", "events.csv", "-d", "TPC"];
        let qncorr_ctx = QnCorrContext::from_args(&args).unwrap();
        assert_eq!(qncorr_ctx.io_ctx.events_in, "events.csv");
        assert!(qncorr_ctx.io_ctx.calibration_in.is_none());
        assert_eq!(qncorr_ctx.detectors.len(), 1);
        assert_eq!(qncorr_ctx.detectors[0].harmonics, vec![2]);
        assert_eq!(
            qncorr_ctx.detectors[0].normalization,
            QnNormalization::QoverM
        );
        assert!(qncorr_ctx.variable_names.is_empty());
        assert!(qncorr_ctx.pass_ctx.recentering);
        assert_eq!(
            qncorr_ctx.pass_ctx.gain_equalization,
            GainEqualizationMethod::None
        );
    }

    #[test]
    fn test_parse_full() {
        #[rustfmt::skip]
        let args = vec![
            "qncorr",
            "-e", "events.csv",
            "-c", "pass1.qncal",
            "-d", "TPC",
            "-d", "V0A:32:4",
            "--harmonics", "1", "2", "3",
            "--normalization", "sqrt-m",
            "--class-var", "centrality:10:0:100",
            "--class-var", "vtxz:4:-10:10",
            "--gain-eq", "width",
            "--group-weights",
            "--width-eq",
            "--min-entries", "5",
            "--finish-calibration",
            "-o", "qn.csv",
            "-C", "pass2.qncal",
            "--no-draw-progress",
        ];
        let qncorr_ctx = QnCorrContext::from_args(&args).unwrap();
        assert_eq!(qncorr_ctx.io_ctx.calibration_in.as_deref(), Some("pass1.qncal"));
        assert_eq!(qncorr_ctx.io_ctx.qn_out.as_deref(), Some("qn.csv"));
        assert_eq!(
            qncorr_ctx.io_ctx.calibration_out.as_deref(),
            Some("pass2.qncal")
        );
        assert_eq!(qncorr_ctx.variable_names, vec!["centrality", "vtxz"]);
        let v0a = &qncorr_ctx.detectors[1];
        assert_eq!(v0a.name, "V0A");
        assert_eq!(v0a.harmonics, vec![1, 2, 3]);
        assert_eq!(v0a.normalization, QnNormalization::QoverSquareRootOfM);
        assert_eq!(v0a.event_classes.num_bins(), 40);
        assert_eq!(v0a.channels.as_ref().unwrap().num_channels(), 32);
        let pass_ctx = &qncorr_ctx.pass_ctx;
        assert_eq!(pass_ctx.gain_equalization, GainEqualizationMethod::Width);
        assert!(pass_ctx.use_channel_groups_weights);
        assert!(pass_ctx.width_equalization);
        assert_eq!(pass_ctx.min_entries, 5);
        assert!(pass_ctx.finish_calibration);
        assert!(!pass_ctx.draw_progress);

        let display = format!("{}", &qncorr_ctx);
        assert!(display.contains("Will equalize channel gains by width"));
        assert!(display.contains("Will write Qn vectors to qn.csv"));
        assert!(display.contains("centrality (var 0)"));
    }

    #[test]
    fn test_parse_invalid_harmonics() {
        let args = vec!["qncorr", "-e", "events.csv", "-d", "TPC", "--harmonics", "16"];
        assert!(matches!(
            QnCorrContext::from_args(&args),
            Err(QnCorrError::CLIError(_))
        ));
        let args = vec!["qncorr", "-e", "events.csv", "-d", "TPC", "--harmonics", "two"];
        assert!(matches!(
            QnCorrContext::from_args(&args),
            Err(QnCorrError::ClapError(_))
        ));
    }

    #[test]
    fn test_parse_invalid_min_entries() {
        let args = vec!["qncorr", "-e", "events.csv", "-d", "TPC", "--min-entries", "-1"];
        assert!(QnCorrContext::from_args(&args).is_err());
    }

    #[test]
    fn test_width_eq_conflicts_with_no_recentering() {
        let args = vec![
            "qncorr",
            "-e",
            "events.csv",
            "-d",
            "TPC",
            "--width-eq",
            "--no-recentering",
        ];
        assert!(matches!(
            QnCorrContext::from_args(&args),
            Err(QnCorrError::ClapError(_))
        ));
    }

    #[test]
    fn test_dry_run() {
        let args = vec!["qncorr", "-e", "events.csv", "-d", "TPC", "--dry-run"];
        assert!(matches!(
            QnCorrContext::from_args(&args),
            Err(QnCorrError::DryRun {})
        ));
    }
}
