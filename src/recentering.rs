//! Recentering, with optional width equalization, of a detector's Qn vector.

use log::{debug, info, warn};

use crate::{
    calibration::{read_profile, write_profile},
    constants::{DEFAULT_MIN_NO_OF_ENTRIES, MINIMUM_SIGNIFICANT_VALUE},
    correction_step::{CorrectionStep, QnChain, QnVectorCorrection, StepContext},
    BinStats, CalibrationList, CalibrationStore, CorrectionState, HarmonicMask, Profile,
    QnCorrError, QnVector, SharedProfile, StoreKey,
};

/// Subtracts the event class average of the Qn vector, and optionally divides by its spread.
///
/// Calibration statistics hold two slots per active harmonic: `2k` for x and `2k + 1` for y,
/// where `k` is the rank of the harmonic.
#[derive(Debug)]
pub struct Recentering {
    state: CorrectionState,
    apply_width_equalization: bool,
    min_entries: u64,
    corrected: QnVector,
    input: Option<SharedProfile>,
    calibration: Option<SharedProfile>,
    not_validated: Option<SharedProfile>,
    not_validated_events: u64,
}

impl Default for Recentering {
    fn default() -> Self {
        Self {
            state: CorrectionState::Calibration,
            apply_width_equalization: false,
            min_entries: DEFAULT_MIN_NO_OF_ENTRIES,
            corrected: QnVector::new(HarmonicMask::default()),
            input: None,
            calibration: None,
            not_validated: None,
            not_validated_events: 0,
        }
    }
}

impl Recentering {
    /// Human readable step name
    pub const NAME: &'static str = "Recentering and width equalization";
    /// Sort key
    pub const KEY: &'static str = "CCCC";
    /// Prefix of the calibration profile name
    pub const SUPPORT_HISTOGRAM_NAME: &'static str = "Qn";
    /// Name of the corrected Qn vector
    pub const CORRECTED_QN_VECTOR_NAME: &'static str = "rec";
    /// Prefix of the not validated entries profile name
    pub const QA_NOT_VALIDATED_HISTOGRAM_NAME: &'static str = "Rec NvE";

    /// A recentering step without width equalization.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the recentered components are also divided by their spread.
    pub fn set_apply_width_equalization(&mut self, apply: bool) {
        self.apply_width_equalization = apply;
    }

    /// The number of entries a bin needs before its statistics are used.
    pub fn set_min_entries(&mut self, min_entries: u64) {
        self.min_entries = min_entries;
    }

    /// How many events were left uncorrected because their bin was not validated.
    pub fn not_validated_count(&self) -> u64 {
        self.not_validated_events
    }

    /// The name of the calibration profile for `detector`.
    pub fn profile_name(detector: &str) -> String {
        format!("{} {}", Self::SUPPORT_HISTOGRAM_NAME, detector)
    }

    /// The name of the not validated entries profile for `detector`.
    pub fn qa_profile_name(detector: &str) -> String {
        format!("{} {}", Self::QA_NOT_VALIDATED_HISTOGRAM_NAME, detector)
    }

    /// The (mean, width) of every active harmonic's x and y, or `None` if the bin can't be used.
    fn corrections(&self, input: &Profile, bin: usize) -> Option<Vec<(u32, BinStats, BinStats)>> {
        self.corrected
            .harmonics()
            .enumerate()
            .map(|(rank, harmonic)| {
                let x = input.read(StoreKey::new(bin, 2 * rank));
                let y = input.read(StoreKey::new(bin, 2 * rank + 1));
                let validated = x.is_validated(self.min_entries)
                    && y.is_validated(self.min_entries)
                    && (!self.apply_width_equalization
                        || (x.width >= MINIMUM_SIGNIFICANT_VALUE
                            && y.width >= MINIMUM_SIGNIFICANT_VALUE));
                validated.then_some((harmonic, x, y))
            })
            .collect()
    }

    fn count_not_validated(&mut self, ctx: &StepContext, bin: Option<usize>) {
        debug!("{}: bin {:?} not validated, Qn left as is", ctx.detector, bin);
        self.not_validated_events += 1;
        if let (Some(qa), Some(bin)) = (&self.not_validated, bin) {
            write_profile(qa).fill(StoreKey::new(bin, 0), 1.0, 1.0);
        }
    }
}

impl CorrectionStep for Recentering {
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
        let num_bins = ctx.event_classes.num_bins();
        if self.calibration.is_none() {
            self.calibration = Some(list.register(Profile::new(
                Self::profile_name(ctx.detector),
                num_bins,
                2 * ctx.harmonics.len(),
            )));
        }
        if self.not_validated.is_none() {
            self.not_validated = Some(list.register(Profile::new(
                Self::qa_profile_name(ctx.detector),
                num_bins,
                1,
            )));
        }
        true
    }

    fn attach_input(&mut self, ctx: &StepContext, list: &CalibrationList) -> bool {
        let name = Self::profile_name(ctx.detector);
        let input = match list.get(&name) {
            Some(input) => input,
            None => {
                debug!("no {} in calibration input", name);
                return false;
            }
        };
        let (shape, total_entries) = {
            let profile = read_profile(&input);
            ((profile.num_bins(), profile.num_slots()), profile.total_entries())
        };
        let expected = (ctx.event_classes.num_bins(), 2 * ctx.harmonics.len());
        if shape != expected {
            warn!(
                "{} has shape {:?}, {:?} expected. Not attaching.",
                name, shape, expected
            );
            return false;
        }
        if total_entries == 0 {
            debug!("{} is empty. Not attaching.", name);
            return false;
        }
        self.input = Some(input);
        self.state.advance(CorrectionState::ApplyCollect);
        info!(
            "{} on {} going to be applied{}",
            Self::NAME,
            ctx.detector,
            if self.apply_width_equalization {
                " with width equalization"
            } else {
                ""
            }
        );
        true
    }

    fn finish_calibration(&mut self) {
        if self.state == CorrectionState::ApplyCollect {
            self.state = CorrectionState::Apply;
        }
    }

    fn clear_correction_step(&mut self) {
        self.corrected.reset();
    }
}

impl QnVectorCorrection for Recentering {
    fn create_support_data_structures(&mut self, harmonics: HarmonicMask) {
        self.corrected = QnVector::new(harmonics);
    }

    fn corrected_qn_vector(&self) -> &QnVector {
        &self.corrected
    }

    fn process_data_collection(&mut self, ctx: &StepContext, vars: &[f64], chain: QnChain) -> bool {
        if !self.state.is_collecting() {
            return true;
        }
        if chain.input.is_good_quality() {
            if let (Some(calibration), Some(bin)) =
                (&self.calibration, ctx.event_classes.bin(vars))
            {
                let mut calibration = write_profile(calibration);
                for (rank, harmonic) in chain.input.harmonics().enumerate() {
                    calibration.fill(StoreKey::new(bin, 2 * rank), chain.input.qx(harmonic), 1.0);
                    calibration.fill(
                        StoreKey::new(bin, 2 * rank + 1),
                        chain.input.qy(harmonic),
                        1.0,
                    );
                }
            }
        }
        self.state.is_applying()
    }

    fn process_corrections(
        &mut self,
        ctx: &StepContext,
        vars: &[f64],
        chain: QnChain,
    ) -> Result<bool, QnCorrError> {
        if !self.state.is_applying() {
            return Ok(false);
        }
        if !chain.current.is_good_quality() {
            self.corrected.set_good(false);
            return Ok(true);
        }
        self.corrected.set(chain.current)?;

        let bin = ctx.event_classes.bin(vars);
        let corrections = match (&self.input, bin) {
            (Some(input), Some(bin)) => self.corrections(&read_profile(input), bin),
            _ => None,
        };
        match corrections {
            Some(corrections) => {
                for (harmonic, x, y) in corrections {
                    let (width_x, width_y) = if self.apply_width_equalization {
                        (x.width, y.width)
                    } else {
                        (1.0, 1.0)
                    };
                    let qx = (chain.current.qx(harmonic) - x.content) / width_x;
                    let qy = (chain.current.qy(harmonic) - y.content) / width_y;
                    self.corrected.set_qx(harmonic, qx);
                    self.corrected.set_qy(harmonic, qy);
                }
            }
            None => self.count_not_validated(ctx, bin),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_common::{fill_profile, qn_vector, single_class},
        EventClassVariablesSet,
    };
    use approx::assert_abs_diff_eq;

    fn mask() -> HarmonicMask {
        HarmonicMask::from_harmonics(&[2]).unwrap()
    }

    fn ctx(classes: &EventClassVariablesSet) -> StepContext<'_> {
        StepContext::new("TPC", classes, mask(), None)
    }

    /// Input where harmonic 2 has the given x and y samples in the single event class.
    fn input_list(xs: &[f64], ys: &[f64]) -> CalibrationList {
        let mut list = CalibrationList::new();
        let mut profile = Profile::new("Qn TPC", 1, 2);
        fill_profile(&mut profile, StoreKey::new(0, 0), xs);
        fill_profile(&mut profile, StoreKey::new(0, 1), ys);
        list.register(profile);
        list
    }

    fn attached(xs: &[f64], ys: &[f64], width_eq: bool) -> Recentering {
        let classes = single_class();
        let mut step = Recentering::new();
        step.set_apply_width_equalization(width_eq);
        step.create_support_data_structures(mask());
        assert!(step.attach_input(&ctx(&classes), &input_list(xs, ys)));
        step
    }

    #[test]
    fn test_recentering_subtracts_mean() {
        let classes = single_class();
        let mut step = attached(&[0.05, 0.15], &[-0.1, 0.1], false);
        let current = qn_vector(2, 0.3, 0.2, true);
        let chain = QnChain {
            current: &current,
            input: &current,
        };
        assert!(step.process(&ctx(&classes), &[50.0], chain).unwrap());
        let corrected = step.corrected_qn_vector();
        assert!(corrected.is_good_quality());
        assert_abs_diff_eq!(corrected.qx(2), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(corrected.qy(2), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_width_equalization() {
        let classes = single_class();
        // mean 0.1, width 0.05 in x; mean 0, width 0.1 in y
        let mut step = attached(&[0.05, 0.15], &[-0.1, 0.1], true);
        let current = qn_vector(2, 0.2, 0.3, true);
        let chain = QnChain {
            current: &current,
            input: &current,
        };
        step.process(&ctx(&classes), &[50.0], chain).unwrap();
        assert_abs_diff_eq!(step.corrected_qn_vector().qx(2), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(step.corrected_qn_vector().qy(2), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_width_is_not_validated() {
        let classes = single_class();
        let mut step = attached(&[0.1, 0.1], &[0.2, 0.2], true);
        let current = qn_vector(2, 0.3, 0.4, true);
        let chain = QnChain {
            current: &current,
            input: &current,
        };
        assert!(step.process(&ctx(&classes), &[50.0], chain).unwrap());
        assert_eq!(step.corrected_qn_vector(), &current);
        assert_eq!(step.not_validated_count(), 1);
    }

    #[test]
    fn test_unvalidated_bin_copies_current() {
        let classes = single_class();
        let mut output = CalibrationList::new();
        // a single entry is below the default minimum of 2
        let mut step = attached(&[0.1], &[0.1], false);
        step.create_support_histograms(&ctx(&classes), &mut output);
        let current = qn_vector(2, 0.3, 0.4, true);
        let chain = QnChain {
            current: &current,
            input: &current,
        };
        assert!(step.process(&ctx(&classes), &[50.0], chain).unwrap());
        assert_eq!(step.corrected_qn_vector(), &current);
        assert_eq!(step.not_validated_count(), 1);
        let qa = output.get("Rec NvE TPC").unwrap();
        assert_eq!(read_profile(&qa).read(StoreKey::new(0, 0)).entries, 1);

        // lowering the threshold validates the bin
        step.set_min_entries(1);
        step.process(&ctx(&classes), &[50.0], chain).unwrap();
        assert_abs_diff_eq!(step.corrected_qn_vector().qx(2), 0.2, epsilon = 1e-12);
        assert_eq!(step.not_validated_count(), 1);
    }

    #[test]
    fn test_bad_quality_input_marks_output_bad() {
        let classes = single_class();
        let mut step = attached(&[0.05, 0.15], &[-0.1, 0.1], false);
        let good = qn_vector(2, 0.3, 0.2, true);
        let chain = QnChain {
            current: &good,
            input: &good,
        };
        step.process(&ctx(&classes), &[50.0], chain).unwrap();

        let bad = qn_vector(2, 5.0, 5.0, false);
        let chain = QnChain {
            current: &bad,
            input: &bad,
        };
        assert!(step.process(&ctx(&classes), &[50.0], chain).unwrap());
        let corrected = step.corrected_qn_vector();
        assert!(!corrected.is_good_quality());
        // components untouched
        assert_abs_diff_eq!(corrected.qx(2), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_calibration_collects_input_only() {
        let classes = single_class();
        let mut output = CalibrationList::new();
        let mut step = Recentering::new();
        step.create_support_data_structures(mask());
        assert!(step.create_support_histograms(&ctx(&classes), &mut output));
        assert!(step.create_support_histograms(&ctx(&classes), &mut output));
        assert_eq!(output.len(), 2);

        let input = qn_vector(2, 0.1, 0.2, true);
        let current = qn_vector(2, 7.0, 7.0, true);
        let chain = QnChain {
            current: &current,
            input: &input,
        };
        assert!(!step.process(&ctx(&classes), &[50.0], chain).unwrap());
        // bad input is not collected
        let bad = qn_vector(2, 9.0, 9.0, false);
        let chain = QnChain {
            current: &current,
            input: &bad,
        };
        assert!(!step.process(&ctx(&classes), &[50.0], chain).unwrap());

        let profile = output.get("Qn TPC").unwrap();
        let profile = read_profile(&profile);
        let x = profile.read(StoreKey::new(0, 0));
        assert_eq!(x.entries, 1);
        assert_abs_diff_eq!(x.content, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(profile.read(StoreKey::new(0, 1)).content, 0.2, epsilon = 1e-12);
        // output untouched
        assert!(!step.corrected_qn_vector().is_good_quality());
    }

    #[test]
    fn test_apply_does_not_collect() {
        let classes = single_class();
        let mut output = CalibrationList::new();
        let mut step = attached(&[0.05, 0.15], &[-0.1, 0.1], false);
        step.create_support_histograms(&ctx(&classes), &mut output);
        step.finish_calibration();
        assert_eq!(step.state(), CorrectionState::Apply);
        let current = qn_vector(2, 0.3, 0.2, true);
        let chain = QnChain {
            current: &current,
            input: &current,
        };
        assert!(step.process(&ctx(&classes), &[50.0], chain).unwrap());
        let profile = output.get("Qn TPC").unwrap();
        assert_eq!(read_profile(&profile).total_entries(), 0);
    }

    #[test]
    fn test_attach_missing_or_mismatched_input() {
        let classes = single_class();
        let mut step = Recentering::new();
        assert!(!step.attach_input(&ctx(&classes), &CalibrationList::new()));
        let mut list = CalibrationList::new();
        list.register(Profile::new("Qn TPC", 1, 4));
        assert!(!step.attach_input(&ctx(&classes), &list));
        assert_eq!(step.state(), CorrectionState::Calibration);
    }

    #[test]
    fn test_clear_resets_output() {
        let classes = single_class();
        let mut step = attached(&[0.05, 0.15], &[-0.1, 0.1], false);
        let current = qn_vector(2, 0.3, 0.2, true);
        let chain = QnChain {
            current: &current,
            input: &current,
        };
        step.process(&ctx(&classes), &[50.0], chain).unwrap();
        step.clear_correction_step();
        assert!(!step.corrected_qn_vector().is_good_quality());
        assert_eq!(step.corrected_qn_vector().qx(2), 0.0);
    }
}
