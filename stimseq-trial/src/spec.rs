use crate::schedule::Schedule;
use serde_json::{Map, Value};
use stimseq_core::{Choices, ConfigError};
use std::time::Duration;

/// When the response listener is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowOnset {
    /// Together with the last stimulus of the sequence.
    #[default]
    FinalStimulus,
    /// At a fixed offset from trial start.
    At(Duration),
}

/// How long the response window stays open before the trial is ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowDuration {
    #[default]
    Unlimited,
    /// Measured from window onset. A zero limit behaves like `Unlimited`.
    Limited(Duration),
}

impl WindowDuration {
    pub fn limit(&self) -> Option<Duration> {
        match self {
            WindowDuration::Limited(d) if !d.is_zero() => Some(*d),
            _ => None,
        }
    }
}

/// Fully resolved description of one trial. Immutable once the trial starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpec<S> {
    pub stimuli: Vec<S>,
    /// `stimuli.len() - 1` entries: how long each stimulus stays before the next.
    pub stim_durations: Vec<Duration>,
    /// Stimuli are inline markup rather than image sources.
    pub is_markup: bool,
    pub choices: Choices,
    /// End the trial on the first qualifying response.
    pub continue_after_response: bool,
    pub window_onset: WindowOnset,
    pub window_duration: WindowDuration,
    pub prompt: Option<String>,
    /// Wait between the end of the trial and signalling the sequencer.
    pub post_trial_gap: Duration,
    /// Copied into the result record as is.
    pub data: Map<String, Value>,
}

impl<S> TrialSpec<S> {
    pub fn new(stimuli: impl IntoIterator<Item = S>) -> Self {
        Self {
            stimuli: stimuli.into_iter().collect(),
            stim_durations: Vec::new(),
            is_markup: false,
            choices: Choices::default(),
            continue_after_response: true,
            window_onset: WindowOnset::default(),
            window_duration: WindowDuration::default(),
            prompt: None,
            post_trial_gap: Duration::ZERO,
            data: Map::new(),
        }
    }

    pub fn durations(mut self, durations: impl IntoIterator<Item = Duration>) -> Self {
        self.stim_durations = durations.into_iter().collect();
        self
    }

    pub fn markup(mut self, is_markup: bool) -> Self {
        self.is_markup = is_markup;
        self
    }

    pub fn choices(mut self, choices: Choices) -> Self {
        self.choices = choices;
        self
    }

    pub fn continue_after_response(mut self, end_on_response: bool) -> Self {
        self.continue_after_response = end_on_response;
        self
    }

    pub fn window_onset(mut self, onset: WindowOnset) -> Self {
        self.window_onset = onset;
        self
    }

    pub fn window_duration(mut self, duration: WindowDuration) -> Self {
        self.window_duration = duration;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn post_trial_gap(mut self, gap: Duration) -> Self {
        self.post_trial_gap = gap;
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Checks the spec's invariants and derives its onset schedule.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        if self.stimuli.is_empty() {
            return Err(ConfigError::NoStimuli);
        }
        let expected = self.stimuli.len() - 1;
        if self.stim_durations.len() != expected {
            return Err(ConfigError::DurationCountMismatch {
                stimuli: self.stimuli.len(),
                expected,
                actual: self.stim_durations.len(),
            });
        }
        Ok(Schedule::from_durations(&self.stim_durations))
    }

    /// Offset at which the response listener is armed under `schedule`.
    pub fn effective_window_onset(&self, schedule: &Schedule) -> Duration {
        match self.window_onset {
            WindowOnset::At(d) => d,
            WindowOnset::FinalStimulus => schedule.final_onset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn builder_defaults() {
        let spec = TrialSpec::new(["a"]);
        assert!(spec.continue_after_response);
        assert_eq!(spec.window_onset, WindowOnset::FinalStimulus);
        assert_eq!(spec.window_duration, WindowDuration::Unlimited);
        assert_eq!(spec.choices, Choices::any_key());
        assert!(spec.prompt.is_none());
    }

    #[test]
    fn mismatched_durations_are_rejected() {
        let err = TrialSpec::new(["a", "b", "c"])
            .durations([ms(100)])
            .schedule()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DurationCountMismatch {
                stimuli: 3,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn empty_stimuli_are_rejected() {
        let spec: TrialSpec<&str> = TrialSpec::new([]);
        assert!(matches!(spec.schedule(), Err(ConfigError::NoStimuli)));
    }

    #[test]
    fn data_may_share_result_column_names() {
        let spec = TrialSpec::new(["a"]).data("rt", 1).data("stimulus", "override");
        assert!(spec.schedule().is_ok());
    }

    #[test]
    fn window_onset_resolves_against_schedule() {
        let spec = TrialSpec::new(["a", "b"]).durations([ms(250)]);
        let schedule = spec.schedule().unwrap();
        assert_eq!(spec.effective_window_onset(&schedule), ms(250));

        let spec = spec.window_onset(WindowOnset::At(ms(40)));
        assert_eq!(spec.effective_window_onset(&schedule), ms(40));
    }

    #[test]
    fn zero_limit_means_no_timeout() {
        assert_eq!(WindowDuration::Limited(Duration::ZERO).limit(), None);
        assert_eq!(WindowDuration::Limited(ms(5)).limit(), Some(ms(5)));
        assert_eq!(WindowDuration::Unlimited.limit(), None);
    }
}
