//! Errors that can occur in qncorr

use crate::io::error::IOError;
use thiserror::Error;

#[derive(Error, Debug)]
/// Errors that can occur in the command line interface
pub enum CLIError {
    #[error("Invalid Command Line Argument {option}\nexpected:\n{expected}\nreceived:\n{received}")]
    /// A command line argument could not be understood.
    InvalidCommandLineArgument {
        /// The option the value was given to
        option: String,
        /// What was expected
        expected: String,
        /// What was received
        received: String,
    },
}

#[derive(Error, Debug)]
/// All the errors that can occur while configuring or running corrections
pub enum QnCorrError {
    #[error("harmonic {harmonic} is outside of the supported range 1..={max}")]
    /// A harmonic number of zero, or above the supported maximum.
    HarmonicOutOfRange {
        /// The offending harmonic
        harmonic: u32,
        /// The highest harmonic supported
        max: u32,
    },

    #[error("harmonic structures differ in {function}. expected {expected}, received {received}")]
    /// Two Qn vectors with different active harmonics were combined.
    HarmonicStructureMismatch {
        /// The function where the mismatch was detected
        function: &'static str,
        /// The harmonics of the receiving vector
        expected: String,
        /// The harmonics of the other vector
        received: String,
    },

    #[error("detector configuration {detector} is built from tracks, {step} needs channels")]
    /// A channel based step was added to a tracks detector configuration.
    NotChannelized {
        /// The detector configuration name
        detector: String,
        /// The name of the step
        step: &'static str,
    },

    #[error("channel {channel} is invalid for detector configuration {detector} with {num_channels} channels")]
    /// A data vector referenced a channel outside the detector's layout.
    BadChannel {
        /// The detector configuration name
        detector: String,
        /// The offending channel id
        channel: usize,
        /// How many channels the detector has
        num_channels: usize,
    },

    #[error("detector configuration {detector} needs a channel id for every data vector")]
    /// A channelized detector received a data vector without a channel id.
    MissingChannel {
        /// The detector configuration name
        detector: String,
    },

    #[error("detector configuration {detector} is built from tracks, data vectors must not carry a channel id (got {channel})")]
    /// A tracks detector received a data vector with a channel id.
    UnexpectedChannel {
        /// The detector configuration name
        detector: String,
        /// The channel id which was supplied
        channel: usize,
    },

    #[error("no detector configuration named {0}")]
    /// A detector configuration name was not registered.
    UnknownDetector(String),

    #[error("a detector configuration named {0} already exists")]
    /// Two detector configurations were registered with the same name.
    DuplicateDetector(String),

    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    /// Error for bad array shape in provided argument
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("invalid event class variable {name}: {reason}")]
    /// An event class variable with an empty or inverted range.
    InvalidEventClass {
        /// The variable name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    #[error("invalid detector settings: {0}")]
    /// The settings builder was missing a field or had an invalid one.
    InvalidSettings(String),

    #[error("{0}")]
    /// Error derived from [`IOError`]
    IOError(#[from] IOError),

    #[error("{0}")]
    /// Error derived from [`CLIError`]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    #[error(transparent)]
    /// Error derived from [`indicatif::style::TemplateError`]
    ProgressTemplate(#[from] indicatif::style::TemplateError),

    #[error("Dry run")]
    /// The arguments were valid, but nothing should be processed.
    DryRun {},
}
