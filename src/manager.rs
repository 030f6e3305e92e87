//! Drives every detector configuration through the events of a pass.

use log::{info, trace};
use rayon::prelude::*;

use crate::{
    CalibrationList, DetectorConfiguration, QnCorrError, UsageReport,
};

/// Owns the detector configurations, the attached calibration input and the calibration output
/// of the current pass.
#[derive(Debug, Default)]
pub struct CorrectionsManager {
    detectors: Vec<DetectorConfiguration>,
    calibration_input: Option<CalibrationList>,
    calibration_output: CalibrationList,
    initialized: bool,
    num_events: u64,
}

impl CorrectionsManager {
    /// A manager without detectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector configuration.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::DuplicateDetector`] if the name is already taken.
    pub fn add_detector(&mut self, detector: DetectorConfiguration) -> Result<(), QnCorrError> {
        if self.detector(detector.name()).is_some() {
            return Err(QnCorrError::DuplicateDetector(detector.name().to_string()));
        }
        self.detectors.push(detector);
        Ok(())
    }

    /// Use the statistics of a previous pass. Takes effect at [`CorrectionsManager::initialize`].
    pub fn set_calibration_input(&mut self, list: CalibrationList) {
        self.calibration_input = Some(list);
    }

    /// Create every step's accumulators and attach the calibration input. Called implicitly by
    /// the first [`CorrectionsManager::process_event`].
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        trace!("start initialize");
        for detector in self.detectors.iter_mut() {
            detector.create_support_histograms(&mut self.calibration_output);
            if let Some(input) = &self.calibration_input {
                let attached = detector.attach_inputs(input);
                info!("{}: {} steps attached to calibration input", detector.name(), attached);
            }
        }
        for (name, report) in self.report_usage() {
            info!(
                "{}: collecting {:?}, applying {:?}",
                name, report.collecting, report.applying
            );
        }
        self.initialized = true;
        trace!("end initialize");
    }

    /// The detector configurations, in registration order.
    pub fn detectors(&self) -> &[DetectorConfiguration] {
        &self.detectors
    }

    /// The detector configuration called `name`.
    pub fn detector(&self, name: &str) -> Option<&DetectorConfiguration> {
        self.detectors.iter().find(|d| d.name() == name)
    }

    /// Mutable access to the detector configuration called `name`.
    pub fn detector_mut(&mut self, name: &str) -> Option<&mut DetectorConfiguration> {
        self.detectors.iter_mut().find(|d| d.name() == name)
    }

    /// Add a data vector to detector `detector` for the current event.
    ///
    /// # Errors
    ///
    /// - [`QnCorrError::UnknownDetector`] if there is no such detector.
    /// - See [`DetectorConfiguration::add_data_vector`].
    pub fn add_data_vector(
        &mut self,
        detector: &str,
        channel: Option<usize>,
        phi: f64,
        weight: f64,
    ) -> Result<bool, QnCorrError> {
        self.detector_mut(detector)
            .ok_or_else(|| QnCorrError::UnknownDetector(detector.to_string()))?
            .add_data_vector(channel, phi, weight)
    }

    /// Process the current event in every detector configuration, in parallel.
    ///
    /// # Errors
    ///
    /// The first error of any detector configuration.
    pub fn process_event(&mut self, vars: &[f64]) -> Result<(), QnCorrError> {
        self.initialize();
        self.detectors
            .par_iter_mut()
            .try_for_each(|detector| detector.process_event(vars).map(|_| ()))?;
        self.num_events += 1;
        Ok(())
    }

    /// Forget the current event in every detector configuration.
    pub fn clear_event(&mut self) {
        for detector in self.detectors.iter_mut() {
            detector.clear_event();
        }
    }

    /// Stop collecting in every step that already applies.
    pub fn finish_calibration(&mut self) {
        for detector in self.detectors.iter_mut() {
            detector.finish_calibration();
        }
    }

    /// The statistics collected in this pass.
    pub fn calibration_output(&self) -> &CalibrationList {
        &self.calibration_output
    }

    /// The statistics of the previous pass, if any.
    pub fn calibration_input(&self) -> Option<&CalibrationList> {
        self.calibration_input.as_ref()
    }

    /// The usage report of every detector configuration.
    pub fn report_usage(&self) -> Vec<(&str, UsageReport)> {
        self.detectors
            .iter()
            .map(|d| (d.name(), d.report_usage()))
            .collect()
    }

    /// The number of events processed.
    pub fn num_events(&self) -> u64 {
        self.num_events
    }
}
