use crate::spec::{TrialSpec, WindowDuration, WindowOnset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stimseq_core::{Choices, ConfigError, Key, StimulusRef};
use std::time::Duration;

/// Raw trial parameters as written in a session file. Millisecond values are
/// signed: a negative display duration or post-trial gap is a configuration
/// error, while a negative response window field (conventionally `-1`) means
/// the field is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrialParams {
    pub stimuli: Vec<StimulusRef>,
    pub stim_durations_ms: Vec<i64>,
    pub is_html: bool,
    pub choices: ChoicesParam,
    pub continue_after_response: bool,
    /// Absent or negative: open the response window with the final stimulus.
    pub resp_onset_ms: Option<i64>,
    /// Absent, zero or negative: wait for a response forever.
    pub resp_offset_ms: Option<i64>,
    pub prompt: Option<String>,
    pub timing_post_trial_ms: i64,
    pub data: Map<String, Value>,
}

/// `"none"` or a list of accepted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoicesParam {
    Keys(Vec<Key>),
    Named(String),
}

impl Default for ChoicesParam {
    fn default() -> Self {
        ChoicesParam::Keys(Vec::new())
    }
}

impl Default for TrialParams {
    fn default() -> Self {
        Self {
            stimuli: Vec::new(),
            stim_durations_ms: Vec::new(),
            is_html: false,
            choices: ChoicesParam::default(),
            continue_after_response: true,
            resp_onset_ms: None,
            resp_offset_ms: None,
            prompt: None,
            timing_post_trial_ms: 1000,
            data: Map::new(),
        }
    }
}

fn non_negative(
    field: &'static str,
    index: Option<usize>,
    value_ms: i64,
) -> Result<Duration, ConfigError> {
    u64::try_from(value_ms)
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::NegativeDelay {
            field,
            index,
            value_ms,
        })
}

impl TrialParams {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves every default and sentinel into a concrete, validated spec.
    pub fn resolve(&self) -> Result<TrialSpec<StimulusRef>, ConfigError> {
        let stim_durations = self
            .stim_durations_ms
            .iter()
            .enumerate()
            .map(|(i, ms)| non_negative("stim_durations_ms", Some(i), *ms))
            .collect::<Result<Vec<_>, _>>()?;

        let choices = match &self.choices {
            ChoicesParam::Keys(keys) => Choices::keys(keys.iter().cloned()),
            ChoicesParam::Named(name) if name.eq_ignore_ascii_case("none") => Choices::NoResponse,
            ChoicesParam::Named(other) => return Err(ConfigError::InvalidChoices(other.clone())),
        };

        let window_onset = match self.resp_onset_ms.and_then(|ms| u64::try_from(ms).ok()) {
            Some(ms) => WindowOnset::At(Duration::from_millis(ms)),
            None => WindowOnset::FinalStimulus,
        };

        let window_duration = match self.resp_offset_ms.and_then(|ms| u64::try_from(ms).ok()) {
            Some(ms) if ms > 0 => WindowDuration::Limited(Duration::from_millis(ms)),
            _ => WindowDuration::Unlimited,
        };

        let spec = TrialSpec {
            stimuli: self.stimuli.clone(),
            stim_durations,
            is_markup: self.is_html,
            choices,
            continue_after_response: self.continue_after_response,
            window_onset,
            window_duration,
            prompt: self.prompt.clone().filter(|p| !p.is_empty()),
            post_trial_gap: non_negative("timing_post_trial_ms", None, self.timing_post_trial_ms)?,
            data: self.data.clone(),
        };
        spec.schedule()?;
        Ok(spec)
    }
}
