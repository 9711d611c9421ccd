use thiserror::Error;

/// Malformed trial parameters. A trial that fails validation never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a trial needs at least one stimulus")]
    NoStimuli,

    #[error("{stimuli} stimuli need {expected} display durations, got {actual}")]
    DurationCountMismatch {
        stimuli: usize,
        expected: usize,
        actual: usize,
    },

    #[error("negative delay {value_ms} ms in `{field}`{}", at_index(.index))]
    NegativeDelay {
        field: &'static str,
        index: Option<usize>,
        value_ms: i64,
    },

    #[error("choices must be \"none\" or a list of keys, got \"{0}\"")]
    InvalidChoices(String),

    #[error("invalid trial parameters: {0}")]
    Parse(#[from] serde_json::Error),
}

fn at_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum TrialError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("trial has already been started")]
    AlreadyStarted,

    #[error("trial has not been started")]
    NotStarted,

    #[error("display surface failed")]
    Display(#[source] anyhow::Error),

    #[error("keyboard listener failed")]
    Keyboard(#[source] anyhow::Error),

    #[error("recorder failed")]
    Recorder(#[source] anyhow::Error),
}
