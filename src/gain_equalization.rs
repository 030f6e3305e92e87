//! Input gain equalization: per channel weight equalization of the data vectors.

use std::fmt::{self, Display};

use log::{debug, info, warn};
use ndarray::Array2;

use crate::{
    calibration::{read_profile, write_profile},
    constants::MINIMUM_SIGNIFICANT_VALUE,
    correction_step::{CorrectionStep, InputDataCorrection, StepContext},
    detector::ChannelLayout,
    BinStats, CalibrationList, CalibrationStore, CorrectionState, DataVectorBank, Profile,
    SharedProfile, StoreKey,
};

/// How the equalized weight of a data vector is derived from its channel's statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GainEqualizationMethod {
    /// Equalized weight is the raw weight
    #[default]
    None,
    /// Raw weight over the channel average
    Average,
    /// Raw weight shifted by the channel average and scaled by the channel width
    Width,
}

impl Display for GainEqualizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "none",
                Self::Average => "average",
                Self::Width => "width",
            }
        )
    }
}

/// Equalizes the gains of a channelized detector's channels.
///
/// Collects the multiplicity of every channel per event class, and once a previous pass is
/// attached, replaces each data vector's equalized weight according to the
/// [`GainEqualizationMethod`].
#[derive(Debug)]
pub struct InputGainEqualization {
    state: CorrectionState,
    method: GainEqualizationMethod,
    shift: f64,
    scale: f64,
    use_channel_groups_weights: bool,
    input: Option<SharedProfile>,
    group_weights: Option<Array2<f64>>,
    calibration: Option<SharedProfile>,
}

impl Default for InputGainEqualization {
    fn default() -> Self {
        Self {
            state: CorrectionState::Calibration,
            method: GainEqualizationMethod::None,
            shift: 0.0,
            scale: 1.0,
            use_channel_groups_weights: false,
            input: None,
            group_weights: None,
            calibration: None,
        }
    }
}

impl InputGainEqualization {
    /// Human readable step name
    pub const NAME: &'static str = "Gain equalization";
    /// Sort key
    pub const KEY: &'static str = "CCCC";
    /// Prefix of the calibration profile name
    pub const SUPPORT_HISTOGRAM_NAME: &'static str = "Multiplicity";

    /// A step using `method`.
    pub fn new(method: GainEqualizationMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// The equalization method.
    pub fn method(&self) -> GainEqualizationMethod {
        self.method
    }

    /// Change the equalization method.
    pub fn set_method(&mut self, method: GainEqualizationMethod) {
        self.method = method;
    }

    /// Set the `a + b * (w - avg) / width` parameters of width equalization. Defaults are
    /// `a = 0`, `b = 1`.
    pub fn set_shift_and_scale(&mut self, shift: f64, scale: f64) {
        self.shift = shift;
        self.scale = scale;
    }

    /// Multiply equalized weights by the average of the channel's group instead of the
    /// detector's hard coded weights.
    pub fn set_use_channel_groups_weights(&mut self, use_groups: bool) {
        self.use_channel_groups_weights = use_groups;
    }

    fn profile_name(detector: &str) -> String {
        format!("{} {}", Self::SUPPORT_HISTOGRAM_NAME, detector)
    }

    /// The equalized weight of a data vector with raw weight `weight`.
    fn equalize(&self, weight: f64, stats: BinStats, group_weight: f64) -> f64 {
        match self.method {
            GainEqualizationMethod::None => weight,
            GainEqualizationMethod::Average => {
                if stats.content > MINIMUM_SIGNIFICANT_VALUE {
                    weight / stats.content * group_weight
                } else {
                    0.0
                }
            }
            GainEqualizationMethod::Width => {
                if stats.content > MINIMUM_SIGNIFICANT_VALUE && stats.width > MINIMUM_SIGNIFICANT_VALUE
                {
                    (self.shift + self.scale * (weight - stats.content) / stats.width) * group_weight
                } else {
                    0.0
                }
            }
        }
    }

    fn group_weight(&self, channels: Option<&ChannelLayout>, bin: usize, channel: usize) -> f64 {
        if self.use_channel_groups_weights {
            self.group_weights
                .as_ref()
                .and_then(|weights| weights.get((bin, channel)).copied())
                .unwrap_or(1.0)
        } else {
            channels
                .and_then(|layout| layout.hard_coded_weight(channel))
                .unwrap_or(1.0)
        }
    }
}

/// For every event class bin and channel, the mean of the averages of the used channels in the
/// channel's group. Ungrouped channels get a weight of 1.
fn derive_group_weights(input: &Profile, layout: &ChannelLayout) -> Array2<f64> {
    let num_groups = layout.num_groups();
    let mut weights = Array2::from_elem((input.num_bins(), layout.num_channels()), 1.0);
    for bin in 0..input.num_bins() {
        let mut sums = vec![0.0; num_groups];
        let mut counts = vec![0usize; num_groups];
        for channel in (0..layout.num_channels()).filter(|&ch| layout.is_used(ch)) {
            if let Some(group) = layout.group(channel) {
                sums[group] += input.read(StoreKey::new(bin, channel)).content;
                counts[group] += 1;
            }
        }
        for channel in 0..layout.num_channels() {
            if let Some(group) = layout.group(channel) {
                if counts[group] > 0 {
                    weights[(bin, channel)] = sums[group] / counts[group] as f64;
                }
            }
        }
    }
    weights
}

impl CorrectionStep for InputGainEqualization {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn state(&self) -> CorrectionState {
        self.state
    }

    fn create_support_histograms(
        &mut self,
        ctx: &StepContext,
        list: &mut CalibrationList,
    ) -> bool {
        if self.calibration.is_some() {
            return true;
        }
        let layout = match ctx.channels {
            Some(layout) => layout,
            None => {
                warn!("{} needs channels, {} has none", Self::NAME, ctx.detector);
                return false;
            }
        };
        let profile = Profile::new(
            Self::profile_name(ctx.detector),
            ctx.event_classes.num_bins(),
            layout.num_channels(),
        );
        self.calibration = Some(list.register(profile));
        true
    }

    fn attach_input(&mut self, ctx: &StepContext, list: &CalibrationList) -> bool {
        let layout = match ctx.channels {
            Some(layout) => layout,
            None => return false,
        };
        let name = Self::profile_name(ctx.detector);
        let input = match list.get(&name) {
            Some(input) => input,
            None => {
                debug!("no {} in calibration input", name);
                return false;
            }
        };
        {
            let profile = read_profile(&input);
            let expected = (ctx.event_classes.num_bins(), layout.num_channels());
            if (profile.num_bins(), profile.num_slots()) != expected {
                warn!(
                    "{} has shape {:?}, {:?} expected. Not attaching.",
                    name,
                    (profile.num_bins(), profile.num_slots()),
                    expected
                );
                return false;
            }
            if profile.total_entries() == 0 {
                debug!("{} is empty. Not attaching.", name);
                return false;
            }
            if self.use_channel_groups_weights {
                self.group_weights = Some(derive_group_weights(&profile, layout));
            }
        }
        self.input = Some(input);
        self.state.advance(CorrectionState::ApplyCollect);
        info!(
            "{} on {} going to be applied ({})",
            Self::NAME,
            ctx.detector,
            self.method
        );
        true
    }

    fn finish_calibration(&mut self) {
        if self.state == CorrectionState::ApplyCollect {
            self.state = CorrectionState::Apply;
        }
    }

    fn clear_correction_step(&mut self) {}
}

impl InputDataCorrection for InputGainEqualization {
    fn process_data_collection(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        bank: &DataVectorBank,
    ) -> bool {
        if !self.state.is_collecting() {
            return true;
        }
        if let (Some(calibration), Some(bin)) = (&self.calibration, ctx.event_classes.bin(vars)) {
            let mut calibration = write_profile(calibration);
            for vector in bank {
                if let Some(channel) = vector.channel() {
                    calibration.fill(StoreKey::new(bin, channel), vector.weight(), 1.0);
                }
            }
        }
        self.state.is_applying()
    }

    fn process_corrections(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        bank: &mut DataVectorBank,
    ) -> bool {
        if !self.state.is_applying() {
            return false;
        }
        if self.method == GainEqualizationMethod::None {
            for vector in bank.iter_mut() {
                vector.set_equalized_weight(vector.weight());
            }
            return true;
        }
        let bin = ctx.event_classes.bin(vars);
        let input = self.input.as_ref().map(read_profile);
        for vector in bank.iter_mut() {
            let equalized = match (&input, bin, vector.channel()) {
                (Some(input), Some(bin), Some(channel)) => {
                    let stats = input.read(StoreKey::new(bin, channel));
                    let group_weight = self.group_weight(ctx.channels, bin, channel);
                    self.equalize(vector.weight(), stats, group_weight)
                }
                _ => 0.0,
            };
            vector.set_equalized_weight(equalized);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_common::{fill_profile, single_class},
        DataVector, EventClassVariable, EventClassVariablesSet, HarmonicMask,
    };
    use float_cmp::assert_approx_eq;

    fn layout() -> ChannelLayout {
        ChannelLayout::new(4)
    }

    fn ctx<'a>(classes: &'a EventClassVariablesSet, layout: &'a ChannelLayout) -> StepContext<'a> {
        StepContext::new(
            "V0",
            classes,
            HarmonicMask::from_harmonics(&[2]).unwrap(),
            Some(layout),
        )
    }

    /// Calibration input where channel `ch` averages `averages[ch]` with the given spread.
    fn input_list(averages: &[f64], spread: f64) -> CalibrationList {
        let mut list = CalibrationList::new();
        let mut profile = Profile::new("Multiplicity V0", 1, averages.len());
        for (channel, &average) in averages.iter().enumerate() {
            fill_profile(
                &mut profile,
                StoreKey::new(0, channel),
                &[average - spread, average + spread],
            );
        }
        list.register(profile);
        list
    }

    fn bank(weights: &[f64]) -> DataVectorBank {
        let mut bank = DataVectorBank::new();
        for (channel, &weight) in weights.iter().enumerate() {
            bank.push(DataVector::channelized(channel, 0.0, weight));
        }
        bank
    }

    #[test]
    fn test_average_equalization() {
        let (classes, layout) = (single_class(), layout());
        let ctx = ctx(&classes, &layout);
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        assert!(step.attach_input(&ctx, &input_list(&[4.0, 2.0, 1.0, 0.0], 0.5)));
        assert_eq!(step.state(), CorrectionState::ApplyCollect);

        let mut bank = bank(&[2.0, 2.0, 3.0, 5.0]);
        assert!(step.process(&ctx, &[50.0], &mut bank));
        let equalized: Vec<f64> = bank.iter().map(DataVector::equalized_weight).collect();
        assert_approx_eq!(f64, equalized[0], 0.5);
        assert_approx_eq!(f64, equalized[1], 1.0);
        assert_approx_eq!(f64, equalized[2], 3.0);
        // insignificant average
        assert_eq!(equalized[3], 0.0);
        // raw weights untouched
        assert_eq!(bank.iter().map(DataVector::weight).collect::<Vec<_>>(), vec![2.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_width_equalization() {
        let (classes, layout) = (single_class(), layout());
        let ctx = ctx(&classes, &layout);
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Width);
        step.set_shift_and_scale(1.0, 1.0);
        // averages 4, width 1
        assert!(step.attach_input(&ctx, &input_list(&[4.0, 4.0, 4.0, 4.0], 1.0)));
        step.finish_calibration();

        let mut bank = bank(&[6.0, 4.0, 3.0, 4.0]);
        assert!(step.process(&ctx, &[50.0], &mut bank));
        let equalized: Vec<f64> = bank.iter().map(DataVector::equalized_weight).collect();
        assert_approx_eq!(f64, equalized[0], 3.0);
        assert_approx_eq!(f64, equalized[1], 1.0);
        assert_approx_eq!(f64, equalized[2], 0.0);
    }

    #[test]
    fn test_width_equalization_zero_width() {
        let (classes, layout) = (single_class(), layout());
        let ctx = ctx(&classes, &layout);
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Width);
        assert!(step.attach_input(&ctx, &input_list(&[4.0, 4.0, 4.0, 4.0], 0.0)));
        let mut bank = bank(&[6.0]);
        assert!(step.process(&ctx, &[50.0], &mut bank));
        assert_eq!(bank.as_slice()[0].equalized_weight(), 0.0);
    }

    #[test]
    fn test_hard_coded_weights() {
        let classes = single_class();
        let layout = ChannelLayout::new(2)
            .with_hard_coded_group_weights(vec![2.0, 0.5])
            .unwrap();
        let ctx = ctx(&classes, &layout);
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        assert!(step.attach_input(&ctx, &input_list(&[4.0, 4.0], 0.5)));
        let mut bank = bank(&[2.0, 2.0]);
        step.process(&ctx, &[50.0], &mut bank);
        assert_approx_eq!(f64, bank.as_slice()[0].equalized_weight(), 1.0);
        assert_approx_eq!(f64, bank.as_slice()[1].equalized_weight(), 0.25);
    }

    #[test]
    fn test_group_weights() {
        let classes = single_class();
        let layout = ChannelLayout::new(4)
            .with_groups(vec![0, 0, 1, 1])
            .unwrap()
            .with_used_channels(vec![true, true, true, false])
            .unwrap();
        let ctx = ctx(&classes, &layout);
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        step.set_use_channel_groups_weights(true);
        assert!(step.attach_input(&ctx, &input_list(&[2.0, 4.0, 6.0, 100.0], 0.5)));

        let mut bank = bank(&[2.0, 2.0, 3.0]);
        step.process(&ctx, &[50.0], &mut bank);
        let equalized: Vec<f64> = bank.iter().map(DataVector::equalized_weight).collect();
        // group 0 averages 3, group 1 only counts channel 2
        assert_approx_eq!(f64, equalized[0], 3.0);
        assert_approx_eq!(f64, equalized[1], 1.5);
        assert_approx_eq!(f64, equalized[2], 3.0);
    }

    #[test]
    fn test_calibration_collects_without_equalizing() {
        let (classes, layout) = (single_class(), layout());
        let ctx = ctx(&classes, &layout);
        let mut output = CalibrationList::new();
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        assert!(step.create_support_histograms(&ctx, &mut output));
        // idempotent
        assert!(step.create_support_histograms(&ctx, &mut output));
        assert_eq!(output.len(), 1);

        let mut bank = bank(&[2.0, 3.0]);
        assert!(!step.process(&ctx, &[50.0], &mut bank));
        assert_eq!(bank.as_slice()[0].equalized_weight(), 2.0);

        let profile = output.get("Multiplicity V0").unwrap();
        let profile = read_profile(&profile);
        assert_eq!(profile.read(StoreKey::new(0, 1)).entries, 1);
        assert_approx_eq!(f64, profile.read(StoreKey::new(0, 1)).content, 3.0);
    }

    #[test]
    fn test_no_collection_once_finished() {
        let (classes, layout) = (single_class(), layout());
        let ctx = ctx(&classes, &layout);
        let mut output = CalibrationList::new();
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        step.create_support_histograms(&ctx, &mut output);
        assert!(step.attach_input(&ctx, &input_list(&[4.0, 4.0, 4.0, 4.0], 0.5)));
        step.finish_calibration();
        assert_eq!(step.state(), CorrectionState::Apply);

        let bank = bank(&[2.0, 3.0]);
        assert!(step.process_data_collection(&ctx, &[50.0], &bank));
        let profile = output.get("Multiplicity V0").unwrap();
        assert_eq!(read_profile(&profile).total_entries(), 0);
    }

    #[test]
    fn test_outside_event_classes() {
        let (classes, layout) = (single_class(), layout());
        let ctx = ctx(&classes, &layout);
        let mut output = CalibrationList::new();
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        step.create_support_histograms(&ctx, &mut output);
        assert!(step.attach_input(&ctx, &input_list(&[4.0, 4.0, 4.0, 4.0], 0.5)));

        let mut bank = bank(&[2.0]);
        assert!(step.process(&ctx, &[150.0], &mut bank));
        assert_eq!(bank.as_slice()[0].equalized_weight(), 0.0);
        let profile = output.get("Multiplicity V0").unwrap();
        assert_eq!(read_profile(&profile).total_entries(), 0);
    }

    #[test]
    fn test_attach_rejects_mismatched_shape() {
        let classes = EventClassVariablesSet::new(vec![
            EventClassVariable::new(0, "centrality", 2, 0.0, 100.0).unwrap(),
        ]);
        let layout = layout();
        let ctx = ctx(&classes, &layout);
        let mut step = InputGainEqualization::new(GainEqualizationMethod::Average);
        assert!(!step.attach_input(&ctx, &input_list(&[4.0, 4.0, 4.0, 4.0], 0.5)));
        assert!(!step.attach_input(&ctx, &CalibrationList::new()));
        assert_eq!(step.state(), CorrectionState::Calibration);
    }

    #[test]
    fn test_tracks_detector_refused() {
        let classes = single_class();
        let ctx = StepContext::new(
            "TPC",
            &classes,
            HarmonicMask::from_harmonics(&[2]).unwrap(),
            None,
        );
        let mut step = InputGainEqualization::default();
        assert!(!step.create_support_histograms(&ctx, &mut CalibrationList::new()));
    }
}
