//! Options for one pass over the events, and the event loop of a pass.
use crate::{
    constants::DEFAULT_MIN_NO_OF_ENTRIES,
    io::{EventRecord, QnWriter},
    with_increment_duration, CalibrationList, CorrectionsManager, DetectorConfiguration,
    DetectorSettings, GainEqualizationMethod, InputGainEqualization, QnCorrError, Recentering,
};
use derive_builder::Builder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, trace};
use std::fmt::Display;

/// Which corrections each detector gets, and how a pass runs.
#[derive(Builder, Debug, Clone)]
pub struct PassContext {
    /// Gain equalization of channelized detectors
    #[builder(default)]
    pub gain_equalization: GainEqualizationMethod,
    /// Whether gain equalized weights are scaled by their channel group average
    #[builder(default = "false")]
    pub use_channel_groups_weights: bool,
    /// Whether Qn vectors are recentered
    #[builder(default = "true")]
    pub recentering: bool,
    /// Whether recentered Qn vectors are also width equalized
    #[builder(default = "false")]
    pub width_equalization: bool,
    /// The number of entries a bin needs before recentering uses it
    #[builder(default = "DEFAULT_MIN_NO_OF_ENTRIES")]
    pub min_entries: u64,
    /// Whether steps that apply stop collecting
    #[builder(default = "false")]
    pub finish_calibration: bool,

    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Default for PassContext {
    fn default() -> Self {
        Self {
            gain_equalization: GainEqualizationMethod::default(),
            use_channel_groups_weights: false,
            recentering: true,
            width_equalization: false,
            min_entries: DEFAULT_MIN_NO_OF_ENTRIES,
            finish_calibration: false,
            draw_progress: true,
        }
    }
}

impl Display for PassContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.gain_equalization {
            GainEqualizationMethod::None => writeln!(f, "Will not equalize channel gains.")?,
            method => writeln!(
                f,
                "Will equalize channel gains by {}{}.",
                method,
                if self.use_channel_groups_weights {
                    ", with channel group weights"
                } else {
                    ""
                }
            )?,
        }
        writeln!(
            f,
            "{} recenter Qn vectors.",
            if self.recentering { "Will" } else { "Will not" }
        )?;
        if self.recentering {
            writeln!(
                f,
                "{} equalize Qn vector widths.",
                if self.width_equalization {
                    "Will"
                } else {
                    "Will not"
                }
            )?;
            writeln!(f, "Bins need {} entries to be used.", self.min_entries)?;
        }
        writeln!(
            f,
            "{} keep collecting in steps that apply.",
            if self.finish_calibration {
                "Will not"
            } else {
                "Will"
            }
        )?;
        Ok(())
    }
}

impl PassContext {
    /// A one line description of the corrections a detector will get.
    pub fn as_comment(&self) -> String {
        [
            match self.gain_equalization {
                GainEqualizationMethod::None => None,
                method => Some(format!("{method} gain equalization")),
            },
            if self.recentering {
                Some("recentering".to_string())
            } else {
                None
            },
            if self.recentering && self.width_equalization {
                Some("width equalization".to_string())
            } else {
                None
            },
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<String>>()
        .join(", ")
    }

    /// A detector configuration with the corrections this pass asks for. Gain equalization is
    /// only added to channelized detectors.
    ///
    /// # Errors
    ///
    /// See [`DetectorConfiguration::new`].
    pub fn configure(&self, settings: DetectorSettings) -> Result<DetectorConfiguration, QnCorrError> {
        let mut detector = DetectorConfiguration::new(settings)?;
        if self.gain_equalization != GainEqualizationMethod::None && detector.channels().is_some() {
            let mut step = InputGainEqualization::new(self.gain_equalization);
            step.set_use_channel_groups_weights(self.use_channel_groups_weights);
            detector.add_input_correction(Box::new(step))?;
        }
        if self.recentering {
            let mut step = Recentering::new();
            step.set_apply_width_equalization(self.width_equalization);
            step.set_min_entries(self.min_entries);
            detector.add_qn_correction(Box::new(step));
        }
        debug!("{}: {}", detector.name(), self.as_comment());
        Ok(detector)
    }

    /// An initialized manager with a configuration for each of `settings`, attached to
    /// `calibration_input`.
    ///
    /// # Errors
    ///
    /// - See [`PassContext::configure`].
    /// - [`QnCorrError::DuplicateDetector`] if two settings share a name.
    pub fn build_manager(
        &self,
        settings: Vec<DetectorSettings>,
        calibration_input: Option<CalibrationList>,
    ) -> Result<CorrectionsManager, QnCorrError> {
        let mut manager = CorrectionsManager::new();
        for settings in settings {
            manager.add_detector(self.configure(settings)?)?;
        }
        if let Some(input) = calibration_input {
            manager.set_calibration_input(input);
        }
        manager.initialize();
        if self.finish_calibration {
            manager.finish_calibration();
        }
        Ok(manager)
    }

    /// Run `events` through `manager`, writing the Qn vectors of each event to `writer`.
    ///
    /// # Errors
    ///
    /// - Errors from [`CorrectionsManager::process_event`] and
    ///     [`CorrectionsManager::add_data_vector`] stop the loop.
    /// - [`QnCorrError::IOError`] if the Qn vectors can't be written.
    pub fn process_events(
        &self,
        manager: &mut CorrectionsManager,
        events: &[EventRecord],
        mut writer: Option<&mut QnWriter>,
    ) -> Result<(), QnCorrError> {
        trace!("start process_events");
        let draw_target = if self.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };

        // Create a progress bar to show the status of the pass
        let pass_progress = ProgressBar::with_draw_target(Some(events.len() as u64), draw_target);
        pass_progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})",
                )?
                .progress_chars("=> "),
        );
        pass_progress.set_message("events");

        for event in events {
            with_increment_duration!("process", {
                event.add_to(manager)?;
                manager.process_event(&event.variables)?;
            });
            if let Some(writer) = writer.as_deref_mut() {
                with_increment_duration!("write", writer.write_event(event.event, manager)?);
            }
            manager.clear_event();
            pass_progress.inc(1);
        }

        pass_progress.finish();
        trace!("end process_events");
        Ok(())
    }
}
