//! Detector configurations: a detector's data vectors, its Qn vectors and its ordered chain of
//! correction steps.

use std::fmt::{self, Display};

use derive_builder::Builder;
use log::{debug, trace};

use crate::{
    constants::{MINIMUM_SIGNIFICANT_VALUE, PLAIN_QN_VECTOR_NAME},
    correction_step::{
        CorrectionStep, InputDataCorrection, QnChain, QnVectorCorrection, StepContext,
    },
    CalibrationList, DataVector, DataVectorBank, EventClassVariablesSet, HarmonicMask,
    QnCorrError, QnNormalization, QnVector, QnVectorBuild, UsageReport,
};

/// The channels of a channelized detector: which are used, how they are grouped, and their
/// hard coded weights.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelLayout {
    num_channels: usize,
    used: Vec<bool>,
    groups: Option<Vec<usize>>,
    hard_coded_weights: Option<Vec<f64>>,
}

impl ChannelLayout {
    /// `num_channels` channels, all used, ungrouped.
    pub fn new(num_channels: usize) -> Self {
        Self {
            num_channels,
            used: vec![true; num_channels],
            groups: None,
            hard_coded_weights: None,
        }
    }

    fn check_len(&self, argument: &str, len: usize) -> Result<(), QnCorrError> {
        if len != self.num_channels {
            return Err(QnCorrError::BadArrayShape {
                argument: argument.into(),
                function: "ChannelLayout".into(),
                expected: format!("({},)", self.num_channels),
                received: format!("({len},)"),
            });
        }
        Ok(())
    }

    /// Only the channels flagged `true` contribute data vectors.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::BadArrayShape`] unless there is one flag per channel.
    pub fn with_used_channels(mut self, used: Vec<bool>) -> Result<Self, QnCorrError> {
        self.check_len("used", used.len())?;
        self.used = used;
        Ok(self)
    }

    /// Assign each channel to a group, numbered from zero.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::BadArrayShape`] unless there is one group per channel.
    pub fn with_groups(mut self, groups: Vec<usize>) -> Result<Self, QnCorrError> {
        self.check_len("groups", groups.len())?;
        self.groups = Some(groups);
        Ok(self)
    }

    /// Fixed per channel weights multiplied into the gain equalized weights.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::BadArrayShape`] unless there is one weight per channel.
    pub fn with_hard_coded_group_weights(mut self, weights: Vec<f64>) -> Result<Self, QnCorrError> {
        self.check_len("weights", weights.len())?;
        self.hard_coded_weights = Some(weights);
        Ok(self)
    }

    /// The number of channels.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Whether `channel` contributes data vectors.
    pub fn is_used(&self, channel: usize) -> bool {
        self.used.get(channel).copied().unwrap_or(false)
    }

    /// The group of `channel`, if channels are grouped.
    pub fn group(&self, channel: usize) -> Option<usize> {
        self.groups.as_ref()?.get(channel).copied()
    }

    /// The number of groups.
    pub fn num_groups(&self) -> usize {
        self.groups
            .as_ref()
            .and_then(|groups| groups.iter().max())
            .map_or(0, |&max| max + 1)
    }

    /// The hard coded weight of `channel`, if any.
    pub fn hard_coded_weight(&self, channel: usize) -> Option<f64> {
        self.hard_coded_weights.as_ref()?.get(channel).copied()
    }
}

/// How to set up a [`DetectorConfiguration`].
#[derive(Builder, Debug, Clone)]
pub struct DetectorSettings {
    /// Unique name of the configuration
    #[builder(setter(into))]
    pub name: String,
    /// The harmonics its Qn vectors are built for
    #[builder(default = "vec![2]")]
    pub harmonics: Vec<u32>,
    /// The channel layout. Without one, the detector is built from tracks.
    #[builder(default, setter(strip_option))]
    pub channels: Option<ChannelLayout>,
    /// How the plain Qn vector is normalized
    #[builder(default)]
    pub normalization: QnNormalization,
    /// The event classes calibration statistics are binned in
    #[builder(default)]
    pub event_classes: EventClassVariablesSet,
}

impl Display for DetectorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Detector configuration {}:", self.name)?;
        writeln!(f, "  harmonics:     {:?}", self.harmonics)?;
        match &self.channels {
            Some(layout) => {
                let used = (0..layout.num_channels())
                    .filter(|&ch| layout.is_used(ch))
                    .count();
                writeln!(
                    f,
                    "  channels:      {} ({} used, {} groups)",
                    layout.num_channels(),
                    used,
                    layout.num_groups()
                )?;
            }
            None => writeln!(f, "  channels:      none (tracks)")?,
        }
        writeln!(f, "  normalization: {}", self.normalization)?;
        if self.event_classes.is_empty() {
            writeln!(f, "  event classes: single")?;
        }
        for variable in self.event_classes.iter() {
            writeln!(f, "  event class:   {}", variable)?;
        }
        Ok(())
    }
}

impl From<DetectorSettingsBuilderError> for QnCorrError {
    fn from(err: DetectorSettingsBuilderError) -> Self {
        QnCorrError::InvalidSettings(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CurrentQn {
    Plain,
    Step(usize),
}

/// One detector's share of the correction framework.
///
/// Per event it collects data vectors, runs the input data corrections, builds the raw and
/// plain Qn vectors, and feeds the plain vector through the Qn vector corrections in key order.
/// The chain stops at the first step that does not apply.
#[derive(Debug)]
pub struct DetectorConfiguration {
    name: String,
    harmonics: HarmonicMask,
    channels: Option<ChannelLayout>,
    normalization: QnNormalization,
    event_classes: EventClassVariablesSet,
    data_bank: DataVectorBank,
    raw: QnVectorBuild,
    plain: QnVectorBuild,
    current: CurrentQn,
    input_corrections: Vec<Box<dyn InputDataCorrection>>,
    qn_corrections: Vec<Box<dyn QnVectorCorrection>>,
}

impl DetectorConfiguration {
    /// Set up a configuration without correction steps.
    ///
    /// # Errors
    ///
    /// - [`QnCorrError::HarmonicOutOfRange`] for an unsupported harmonic.
    /// - [`QnCorrError::InvalidSettings`] if no harmonic is requested.
    pub fn new(settings: DetectorSettings) -> Result<Self, QnCorrError> {
        let harmonics = HarmonicMask::from_harmonics(&settings.harmonics)?;
        if harmonics.is_empty() {
            return Err(QnCorrError::InvalidSettings(format!(
                "detector configuration {} has no harmonics",
                settings.name
            )));
        }
        Ok(Self {
            name: settings.name,
            harmonics,
            channels: settings.channels,
            normalization: settings.normalization,
            event_classes: settings.event_classes,
            data_bank: DataVectorBank::new(),
            raw: QnVectorBuild::new(harmonics),
            plain: QnVectorBuild::new(harmonics),
            current: CurrentQn::Plain,
            input_corrections: vec![],
            qn_corrections: vec![],
        })
    }

    /// The configuration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The harmonics of its Qn vectors.
    pub fn harmonic_mask(&self) -> HarmonicMask {
        self.harmonics
    }

    /// The channel layout, if the detector is channelized.
    pub fn channels(&self) -> Option<&ChannelLayout> {
        self.channels.as_ref()
    }

    /// The event classes calibration statistics are binned in.
    pub fn event_classes(&self) -> &EventClassVariablesSet {
        &self.event_classes
    }

    /// Add a correction on the data vectors.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::NotChannelized`] if the detector is built from tracks.
    pub fn add_input_correction(
        &mut self,
        correction: Box<dyn InputDataCorrection>,
    ) -> Result<(), QnCorrError> {
        if self.channels.is_none() {
            return Err(QnCorrError::NotChannelized {
                detector: self.name.clone(),
                step: correction.name(),
            });
        }
        let idx = self
            .input_corrections
            .partition_point(|step| step.key() <= correction.key());
        self.input_corrections.insert(idx, correction);
        Ok(())
    }

    /// Add a correction on the Qn vector. Steps run in ascending key order, steps with equal keys
    /// in the order they were added.
    pub fn add_qn_correction(&mut self, mut correction: Box<dyn QnVectorCorrection>) {
        correction.create_support_data_structures(self.harmonics);
        let idx = self
            .qn_corrections
            .partition_point(|step| step.key() <= correction.key());
        self.qn_corrections.insert(idx, correction);
    }

    /// Add a data vector to the current event. Returns whether it was kept: data vectors of unused
    /// channels are dropped.
    ///
    /// # Errors
    ///
    /// - [`QnCorrError::MissingChannel`] if a channelized detector gets no channel.
    /// - [`QnCorrError::BadChannel`] if the channel is outside the layout.
    /// - [`QnCorrError::UnexpectedChannel`] if a tracks detector gets a channel.
    pub fn add_data_vector(
        &mut self,
        channel: Option<usize>,
        phi: f64,
        weight: f64,
    ) -> Result<bool, QnCorrError> {
        match (&self.channels, channel) {
            (None, None) => {
                self.data_bank.push(DataVector::new(phi, weight));
                Ok(true)
            }
            (None, Some(channel)) => Err(QnCorrError::UnexpectedChannel {
                detector: self.name.clone(),
                channel,
            }),
            (Some(_), None) => Err(QnCorrError::MissingChannel {
                detector: self.name.clone(),
            }),
            (Some(layout), Some(channel)) if channel >= layout.num_channels() => {
                Err(QnCorrError::BadChannel {
                    detector: self.name.clone(),
                    channel,
                    num_channels: layout.num_channels(),
                })
            }
            (Some(layout), Some(channel)) => {
                if !layout.is_used(channel) {
                    return Ok(false);
                }
                self.data_bank
                    .push(DataVector::channelized(channel, phi, weight));
                Ok(true)
            }
        }
    }

    /// Register the accumulators of every step in `list`.
    pub fn create_support_histograms(&mut self, list: &mut CalibrationList) {
        let ctx = StepContext::new(
            &self.name,
            &self.event_classes,
            self.harmonics,
            self.channels.as_ref(),
        );
        for step in self.input_corrections.iter_mut() {
            step.create_support_histograms(&ctx, list);
        }
        for step in self.qn_corrections.iter_mut() {
            step.create_support_histograms(&ctx, list);
        }
    }

    /// Bind every step to the statistics of a previous pass. Returns how many steps attached.
    pub fn attach_inputs(&mut self, list: &CalibrationList) -> usize {
        let ctx = StepContext::new(
            &self.name,
            &self.event_classes,
            self.harmonics,
            self.channels.as_ref(),
        );
        let inputs = self
            .input_corrections
            .iter_mut()
            .map(|step| step.attach_input(&ctx, list))
            .filter(|&attached| attached)
            .count();
        let qns = self
            .qn_corrections
            .iter_mut()
            .map(|step| step.attach_input(&ctx, list))
            .filter(|&attached| attached)
            .count();
        inputs + qns
    }

    /// Stop collecting statistics in every step that is already applying.
    pub fn finish_calibration(&mut self) {
        for step in self.input_corrections.iter_mut() {
            step.finish_calibration();
        }
        for step in self.qn_corrections.iter_mut() {
            step.finish_calibration();
        }
    }

    /// Build the raw and plain Qn vectors from the data vectors.
    fn build_qn_vectors(&mut self) {
        self.raw.reset();
        self.plain.reset();
        for vector in &self.data_bank {
            self.raw.add_contribution(vector.phi(), vector.weight());
            self.plain
                .add_contribution(vector.phi(), vector.equalized_weight());
        }
        for qn in [&mut self.raw, &mut self.plain] {
            let good = qn.entries() > 0 && qn.sum_of_weights() >= MINIMUM_SIGNIFICANT_VALUE;
            qn.set_good(good);
            qn.normalize(self.normalization);
        }
    }

    /// Process the current event. Returns whether every correction step was applied.
    ///
    /// # Errors
    ///
    /// [`QnCorrError::HarmonicStructureMismatch`] if a step's vectors are inconsistent.
    pub fn process_event(&mut self, vars: &[f64]) -> Result<bool, QnCorrError> {
        trace!("start process_event {}", self.name);
        self.current = CurrentQn::Plain;

        let mut inputs_applied = true;
        {
            let ctx = StepContext::new(
                &self.name,
                &self.event_classes,
                self.harmonics,
                self.channels.as_ref(),
            );
            for step in self.input_corrections.iter_mut() {
                if !step.process(&ctx, vars, &mut self.data_bank) {
                    debug!("{}: {} not applied", self.name, step.name());
                    inputs_applied = false;
                    break;
                }
            }
        }

        self.build_qn_vectors();
        if !inputs_applied {
            trace!("end process_event {}", self.name);
            return Ok(false);
        }

        let ctx = StepContext::new(
            &self.name,
            &self.event_classes,
            self.harmonics,
            self.channels.as_ref(),
        );
        for idx in 0..self.qn_corrections.len() {
            let (done, rest) = self.qn_corrections.split_at_mut(idx);
            let current = match self.current {
                CurrentQn::Step(step_idx) => done
                    .get(step_idx)
                    .map_or(self.plain.qn(), |step| step.corrected_qn_vector()),
                CurrentQn::Plain => self.plain.qn(),
            };
            let input = done
                .last()
                .map_or(self.plain.qn(), |step| step.corrected_qn_vector());
            let step = &mut rest[0];
            if !step.process(&ctx, vars, QnChain { current, input })? {
                debug!("{}: {} not applied", self.name, step.name());
                trace!("end process_event {}", self.name);
                return Ok(false);
            }
            self.current = CurrentQn::Step(idx);
        }
        trace!("end process_event {}", self.name);
        Ok(true)
    }

    /// Forget the current event.
    pub fn clear_event(&mut self) {
        self.data_bank.clear();
        self.raw.reset();
        self.plain.reset();
        for step in self.qn_corrections.iter_mut() {
            step.clear_correction_step();
        }
        for step in self.input_corrections.iter_mut() {
            step.clear_correction_step();
        }
        self.current = CurrentQn::Plain;
    }

    /// The data vectors of the current event.
    pub fn data_bank(&self) -> &DataVectorBank {
        &self.data_bank
    }

    /// The Qn vector built from raw weights.
    pub fn raw_qn_vector(&self) -> &QnVectorBuild {
        &self.raw
    }

    /// The Qn vector built from equalized weights, before any Qn vector correction.
    pub fn plain_qn_vector(&self) -> &QnVectorBuild {
        &self.plain
    }

    /// The most corrected Qn vector of the current event.
    pub fn current_qn_vector(&self) -> &QnVector {
        match self.current {
            CurrentQn::Step(idx) => self
                .qn_corrections
                .get(idx)
                .map_or(self.plain.qn(), |step| step.corrected_qn_vector()),
            CurrentQn::Plain => self.plain.qn(),
        }
    }

    /// The name of the step that produced the current Qn vector, or `"plain"`.
    pub fn current_step_name(&self) -> &str {
        match self.current {
            CurrentQn::Step(idx) => self
                .qn_corrections
                .get(idx)
                .map_or(PLAIN_QN_VECTOR_NAME, |step| step.name()),
            CurrentQn::Plain => PLAIN_QN_VECTOR_NAME,
        }
    }

    /// The Qn vector step `idx` collects from: the output of the step before it, or the plain
    /// vector for the first step.
    pub fn previous_corrected_qn_vector(&self, idx: usize) -> &QnVector {
        match idx.checked_sub(1).and_then(|prev| self.qn_corrections.get(prev)) {
            Some(step) => step.corrected_qn_vector(),
            None => self.plain.qn(),
        }
    }

    /// The output of the Qn vector correction called `name`.
    pub fn corrected_qn_vector(&self, name: &str) -> Option<&QnVector> {
        self.qn_corrections
            .iter()
            .find(|step| step.name() == name)
            .map(|step| step.corrected_qn_vector())
    }

    /// The input data corrections, in processing order.
    pub fn input_corrections(&self) -> impl Iterator<Item = &dyn InputDataCorrection> {
        self.input_corrections.iter().map(|step| &**step)
    }

    /// The Qn vector corrections, in processing order.
    pub fn qn_corrections(&self) -> impl Iterator<Item = &dyn QnVectorCorrection> {
        self.qn_corrections.iter().map(|step| &**step)
    }

    /// The Qn vector corrections applied to the current event, in processing order. Empty after
    /// [`DetectorConfiguration::clear_event`].
    pub fn applied_qn_corrections(&self) -> impl Iterator<Item = &dyn QnVectorCorrection> {
        let applied = match self.current {
            CurrentQn::Step(idx) => idx + 1,
            CurrentQn::Plain => 0,
        };
        self.qn_corrections.iter().take(applied).map(|step| &**step)
    }

    /// Which steps collect and which apply. Steps after the first one that is not applying are
    /// not reached, and not reported.
    pub fn report_usage(&self) -> UsageReport {
        let mut report = UsageReport::default();
        for step in self.input_corrections.iter() {
            if !step.report_usage(&mut report) {
                return report;
            }
        }
        for step in self.qn_corrections.iter() {
            if !step.report_usage(&mut report) {
                return report;
            }
        }
        report
    }
}
