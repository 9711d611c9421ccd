use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Defines stimuli handed to the display surface
pub trait Stimulus: Clone + fmt::Debug {
    /// Image path, URL or inline markup, depending on how the trial renders it.
    fn source(&self) -> &str;
}

/// A stimulus given by its source string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StimulusRef(String);

impl StimulusRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }
}

impl Stimulus for StimulusRef {
    fn source(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StimulusRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StimulusRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for StimulusRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a response key, e.g. `"f"` or `"space"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keys a trial accepts as a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choices {
    /// No response is accepted and no listener is armed.
    NoResponse,
    /// Accepted keys. An empty set accepts every key.
    Keys(BTreeSet<Key>),
}

impl Choices {
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Choices::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn any_key() -> Self {
        Choices::Keys(BTreeSet::new())
    }

    pub fn accepts_responses(&self) -> bool {
        matches!(self, Choices::Keys(_))
    }

    /// Whether `key` is a qualifying response.
    pub fn accepts(&self, key: &Key) -> bool {
        match self {
            Choices::NoResponse => false,
            Choices::Keys(set) => set.is_empty() || set.contains(key),
        }
    }
}

impl Default for Choices {
    fn default() -> Self {
        Self::any_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_set_accepts_anything() {
        let choices = Choices::default();
        assert!(choices.accepts_responses());
        assert!(choices.accepts(&Key::from("q")));
    }

    #[test]
    fn key_set_filters() {
        let choices = Choices::keys(["f", "j"]);
        assert!(choices.accepts(&Key::from("f")));
        assert!(!choices.accepts(&Key::from("k")));
    }

    #[test]
    fn no_response_accepts_nothing() {
        assert!(!Choices::NoResponse.accepts_responses());
        assert!(!Choices::NoResponse.accepts(&Key::from("f")));
    }
}
