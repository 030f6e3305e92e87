#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]

//! qncorr corrects event-by-event Qn flow vectors for the distortions introduced by a
//! non-uniform detector acceptance.
//!
//! Each detector configuration turns the per-particle azimuthal angles and weights of an event
//! into a raw Qn vector, then feeds it through an ordered chain of correction steps. Every step
//! runs through the same three states: it first collects calibration statistics, then applies
//! the statistics of a previous pass while collecting new ones, and finally only applies.
//!
//! # Examples
//!
//! A first (calibration) pass over some events, collecting recentering statistics.
//!
//! ```rust
//! use qncorr::{CorrectionsManager, DetectorConfiguration, DetectorSettingsBuilder, Recentering};
//!
//! // a detector measuring the second and third harmonics from tracks
//! let settings = DetectorSettingsBuilder::default()
//!     .name("TPC")
//!     .harmonics(vec![2, 3])
//!     .build()
//!     .unwrap();
//! let mut detector = DetectorConfiguration::new(settings).unwrap();
//! detector.add_qn_correction(Box::new(Recentering::new()));
//!
//! let mut manager = CorrectionsManager::new();
//! manager.add_detector(detector).unwrap();
//! manager.initialize();
//!
//! for event in 0..10 {
//!     let phi = 0.1 * event as f64;
//!     manager.add_data_vector("TPC", None, phi, 1.0).unwrap();
//!     manager.process_event(&[]).unwrap();
//!     manager.clear_event();
//! }
//!
//! // statistics for the next pass
//! assert!(manager.calibration_output().contains("Qn TPC"));
//! ```
//!
//! # Details
//!
//! The statistics of one pass are kept in a [`CalibrationList`], which can be persisted with
//! [`io::write_calibration_file`] and attached to the next pass with
//! [`CorrectionsManager::set_calibration_input`].

use cfg_if::cfg_if;
use lazy_static::lazy_static;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

pub mod calibration;
pub use calibration::{
    BinStats, CalibrationList, CalibrationStore, Profile, SharedProfile, StoreKey,
};
pub mod constants;
pub mod correction_step;
pub use correction_step::{
    CorrectionState, CorrectionStep, InputDataCorrection, QnChain, QnVectorCorrection,
    StepContext, UsageReport,
};
pub mod data_vector;
pub use data_vector::{DataVector, DataVectorBank};
pub mod detector;
pub use detector::{
    ChannelLayout, DetectorConfiguration, DetectorSettings, DetectorSettingsBuilder,
};
pub mod error;
pub use error::QnCorrError;
pub mod event_classes;
pub use event_classes::{EventClassVariable, EventClassVariablesSet};
pub mod gain_equalization;
pub use gain_equalization::{GainEqualizationMethod, InputGainEqualization};
pub mod harmonics;
pub use harmonics::HarmonicMask;
pub mod io;
pub mod manager;
pub use manager::CorrectionsManager;
pub mod pipeline;
pub use pipeline::{PassContext, PassContextBuilder};
pub mod qn_vector;
pub use qn_vector::{QnNormalization, QnVector, QnVectorBuild};
pub mod recentering;
pub use recentering::Recentering;

cfg_if! {
    if #[cfg(feature = "cli")] {
        pub mod cli;
        pub use cli::QnCorrContext;
    }
}

#[cfg(test)]
pub mod test_common;

lazy_static! {
    static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Add `duration` to the total time spent in the phase called `name`.
pub fn increment_duration(name: &str, duration: Duration) {
    let mut durations = DURATIONS.lock().unwrap_or_else(PoisonError::into_inner);
    *durations.entry(name.into()).or_insert(Duration::ZERO) += duration;
}

/// A snapshot of the total time spent in each named phase so far.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Evaluate an expression, adding the time it took to the named phase.
///
/// ```rust
/// use qncorr::{get_durations, with_increment_duration};
///
/// let total: u64 = with_increment_duration!("sum", (0..100u64).sum());
/// assert_eq!(total, 4950);
/// assert!(get_durations().contains_key("sum"));
/// ```
#[macro_export]
macro_rules! with_increment_duration {
    ($name:expr, $e:expr) => {{
        let _now = std::time::Instant::now();
        let _res = $e;
        $crate::increment_duration($name, _now.elapsed());
        _res
    }};
}
