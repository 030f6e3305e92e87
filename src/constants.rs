//! Useful constants shared by every correction step.

/// Magnitudes (weights, averages, widths, lengths) below this value are treated as zero.
pub const MINIMUM_SIGNIFICANT_VALUE: f64 = 1e-6;

/// The highest external harmonic number a Qn vector can hold. Harmonics are labelled from 1.
pub const MAX_HARMONIC_NUMBER_SUPPORTED: u32 = 15;

/// The minimum number of entries an event class bin needs before its recentering
/// statistics are used.
pub const DEFAULT_MIN_NO_OF_ENTRIES: u64 = 2;

/// Name reported for the Qn vector a detector builds before any correction step applies.
pub const PLAIN_QN_VECTOR_NAME: &str = "plain";
