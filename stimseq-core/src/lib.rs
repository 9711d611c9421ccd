pub mod collaborator;
pub mod error;
pub mod stimulus;
pub mod trial;

pub use collaborator::{DisplaySurface, KeyboardListener, Recorder, TrialHost, TrialSequencer};
pub use error::{ConfigError, TrialError};
pub use stimulus::{Choices, Key, Stimulus, StimulusRef};
pub use trial::{EndReason, ListenerHandle, RESULT_FIELDS, Response, TrialResult, TrialState};
