pub mod stats;
pub mod timer;
pub mod timer_set;

pub use stats::{LatenessLog, TimingStats};
pub use timer::{HighPrecisionTimer, ManualTimer, Timer};
pub use timer_set::{Fired, TimerHandle, TimerSet};
