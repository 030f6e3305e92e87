//! The contract shared by every correction step.
//!
//! A step moves through three states, never backwards:
//!
//! - [`CorrectionState::Calibration`]: no statistics from a previous pass are available, the step
//!   only collects.
//! - [`CorrectionState::ApplyCollect`]: statistics were attached, the step applies them and
//!   keeps collecting for the next pass.
//! - [`CorrectionState::Apply`]: calibration is finished, the step only applies.

use std::fmt::{self, Debug, Display};

use crate::{
    detector::ChannelLayout, CalibrationList, DataVectorBank, EventClassVariablesSet,
    HarmonicMask, QnCorrError, QnVector,
};

/// The calibration state of a correction step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CorrectionState {
    /// Only collect statistics
    #[default]
    Calibration,
    /// Apply attached statistics and collect new ones
    ApplyCollect,
    /// Only apply attached statistics
    Apply,
}

impl CorrectionState {
    /// Move forward to `state`. Requests to move backwards are ignored.
    pub fn advance(&mut self, state: CorrectionState) {
        if state > *self {
            *self = state;
        }
    }

    /// Whether statistics are collected in this state.
    pub fn is_collecting(self) -> bool {
        self != Self::Apply
    }

    /// Whether corrections are applied in this state.
    pub fn is_applying(self) -> bool {
        self != Self::Calibration
    }
}

impl Display for CorrectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Calibration => "calibration",
                Self::ApplyCollect => "apply and collect",
                Self::Apply => "apply",
            }
        )
    }
}

/// The step names of one detector configuration, split by what they do this pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageReport {
    /// Steps filling statistics for the next pass
    pub collecting: Vec<String>,
    /// Steps applying statistics from a previous pass
    pub applying: Vec<String>,
}

/// What a step knows about the detector configuration that owns it.
#[derive(Clone, Copy, Debug)]
pub struct StepContext<'a> {
    /// The detector configuration name
    pub detector: &'a str,
    /// The event classes calibration statistics are binned in
    pub event_classes: &'a EventClassVariablesSet,
    /// The harmonics of the detector's Qn vectors
    pub harmonics: HarmonicMask,
    /// The channel layout, for channelized detectors
    pub channels: Option<&'a ChannelLayout>,
}

impl<'a> StepContext<'a> {
    /// Bundle the parts of a detector configuration a step reads.
    pub fn new(
        detector: &'a str,
        event_classes: &'a EventClassVariablesSet,
        harmonics: HarmonicMask,
        channels: Option<&'a ChannelLayout>,
    ) -> Self {
        Self {
            detector,
            event_classes,
            harmonics,
            channels,
        }
    }
}

/// The two Qn vectors a Qn vector correction reads.
#[derive(Clone, Copy, Debug)]
pub struct QnChain<'a> {
    /// The detector's live current vector, which corrections are applied to
    pub current: &'a QnVector,
    /// The step's designated input, which statistics are collected from: the previous step's
    /// corrected output, or the plain vector for the first step
    pub input: &'a QnVector,
}

/// Operations common to every correction step.
pub trait CorrectionStep: Debug + Send {
    /// Human readable name.
    fn name(&self) -> &'static str;

    /// Sort key: steps of a detector configuration run in ascending key order.
    fn key(&self) -> &'static str;

    /// The current state.
    fn state(&self) -> CorrectionState;

    /// Allocate the accumulators for the next pass and register them in `list`. Calling this
    /// again is a no-op. Returns whether the accumulators exist.
    fn create_support_histograms(&mut self, ctx: &StepContext, list: &mut CalibrationList)
        -> bool;

    /// Bind the statistics of a previous pass from `list`. On success the step leaves
    /// [`CorrectionState::Calibration`].
    fn attach_input(&mut self, ctx: &StepContext, list: &CalibrationList) -> bool;

    /// Stop collecting: an [`CorrectionState::ApplyCollect`] step moves to
    /// [`CorrectionState::Apply`].
    fn finish_calibration(&mut self);

    /// Reset the per event output.
    fn clear_correction_step(&mut self);

    /// Add this step's name to `report`. Returns whether the step is applying.
    fn report_usage(&self, report: &mut UsageReport) -> bool {
        let state = self.state();
        if state.is_collecting() {
            report.collecting.push(self.name().to_string());
        }
        if state.is_applying() {
            report.applying.push(self.name().to_string());
        }
        state.is_applying()
    }
}

/// A correction applied to a detector's Qn vector.
pub trait QnVectorCorrection: CorrectionStep {
    /// Allocate the corrected output for the detector's harmonics.
    fn create_support_data_structures(&mut self, harmonics: HarmonicMask);

    /// The corrected output of the last event.
    fn corrected_qn_vector(&self) -> &QnVector;

    /// Fold `chain.input` into the calibration accumulators. Never changes the event's vectors.
    /// Returns whether the step is past calibration.
    fn process_data_collection(&mut self, ctx: &StepContext, vars: &[f64], chain: QnChain)
        -> bool;

    /// Correct `chain.current` into the step's own output. Returns whether the correction was
    /// applied, in which case the output becomes the detector's current vector.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicStructureMismatch`] if the chain's vectors don't match the
    /// step's output.
    fn process_corrections(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        chain: QnChain,
    ) -> Result<bool, QnCorrError>;

    /// Run the step for one event: collect then apply, as the state allows.
    ///
    /// # Errors
    ///
    /// See [`QnVectorCorrection::process_corrections`].
    fn process(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        chain: QnChain,
    ) -> Result<bool, QnCorrError> {
        match self.state() {
            CorrectionState::Calibration => {
                self.process_data_collection(ctx, vars, chain);
                Ok(false)
            }
            CorrectionState::ApplyCollect => {
                self.process_data_collection(ctx, vars, chain);
                self.process_corrections(ctx, vars, chain)
            }
            CorrectionState::Apply => self.process_corrections(ctx, vars, chain),
        }
    }
}

/// A correction applied to the data vectors, before Qn vectors are built.
pub trait InputDataCorrection: CorrectionStep {
    /// Fold the data vectors into the calibration accumulators. Returns whether the step is
    /// past calibration.
    fn process_data_collection(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        bank: &DataVectorBank,
    ) -> bool;

    /// Correct the data vectors in place. Returns whether the correction was applied.
    fn process_corrections(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        bank: &mut DataVectorBank,
    ) -> bool;

    /// Run the step for one event: collect then apply, as the state allows.
    fn process(&mut self, ctx: &StepContext, vars: &[f64], bank: &mut DataVectorBank) -> bool {
        match self.state() {
            CorrectionState::Calibration => {
                self.process_data_collection(ctx, vars, bank);
                false
            }
            CorrectionState::ApplyCollect => {
                self.process_data_collection(ctx, vars, bank);
                self.process_corrections(ctx, vars, bank)
            }
            CorrectionState::Apply => self.process_corrections(ctx, vars, bank),
        }
    }
}
