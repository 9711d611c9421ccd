pub mod capture;
pub mod engine;
pub mod observer;
pub mod params;
pub mod schedule;
pub mod spec;

pub use capture::ResponseCapture;
pub use engine::TrialEngine;
pub use observer::{IgnoreReason, TimerAction, TracingObserver, TrialEvent, TrialObserver};
pub use params::{ChoicesParam, TrialParams};
pub use schedule::{Schedule, ScheduleEntry};
pub use spec::{TrialSpec, WindowDuration, WindowOnset};
