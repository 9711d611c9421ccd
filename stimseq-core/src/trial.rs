use crate::stimulus::Key;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Trial lifecycle. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrialState {
    #[default]
    NotStarted,
    Running,
    Ended,
}

/// What moved a trial into `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Response,
    Timeout,
    Forced,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndReason::Response => "response",
            EndReason::Timeout => "timeout",
            EndReason::Forced => "forced",
        })
    }
}

/// Handle issued by a keyboard listener service when it is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// A single key press as delivered by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Measured from the moment the listener was armed.
    pub reaction_time: Duration,
    pub key: Key,
}

impl Response {
    pub fn new(reaction_time: Duration, key: impl Into<Key>) -> Self {
        Self {
            reaction_time,
            key: key.into(),
        }
    }
}

/// Column names a result record writes for its own fields.
pub const RESULT_FIELDS: [&str; 3] = ["rt", "key_press", "stimulus"];

/// Recorded result per trial.
///
/// Serializes as one flat record. A passthrough `data` entry that shares a
/// name with one of [`RESULT_FIELDS`] replaces that column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrialResult<S> {
    #[serde(rename = "rt", deserialize_with = "opt_millis::deserialize", default)]
    pub reaction_time: Option<Duration>,
    #[serde(rename = "key_press", default)]
    pub key: Option<Key>,
    #[serde(rename = "stimulus")]
    pub stimuli: Vec<S>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl<S> TrialResult<S> {
    pub fn responded(&self) -> bool {
        self.key.is_some()
    }
}

impl<S: Serialize> Serialize for TrialResult<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        let own = RESULT_FIELDS
            .iter()
            .filter(|f| !self.data.contains_key(**f))
            .count();
        let mut map = serializer.serialize_map(Some(own + self.data.len()))?;
        if !self.data.contains_key("rt") {
            map.serialize_entry("rt", &self.reaction_time.map(|d| d.as_secs_f64() * 1e3))?;
        }
        if !self.data.contains_key("key_press") {
            map.serialize_entry("key_press", &self.key)?;
        }
        if !self.data.contains_key("stimulus") {
            map.serialize_entry("stimulus", &self.stimuli)?;
        }
        for (k, v) in &self.data {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms: Option<f64> = Option::deserialize(d)?;
        ms.map(|ms| Duration::try_from_secs_f64(ms / 1e3).map_err(serde::de::Error::custom))
            .transpose()
    }
}
