use std::time::Duration;
use stimseq_core::{EndReason, Key, ListenerHandle};
use stimseq_timing::TimerHandle;
use tracing::{debug, info};

/// Timer payloads a trial arms. Each one carries its own target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    SwapTo(usize),
    OpenResponseWindow,
    CloseResponseWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotQualifying,
    AlreadyRecorded,
    StaleListener,
    TrialEnded,
}

/// Structured trace of what a trial did, for whoever is watching.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialEvent {
    Started {
        stimuli: usize,
        final_onset: Duration,
        /// Every timer armed by `start`, in arming order.
        timers: Vec<TimerHandle>,
    },
    StimulusShown {
        index: usize,
    },
    PromptShown,
    ResponseWindowOpened {
        listener: ListenerHandle,
    },
    ResponseRecorded {
        key: Key,
        reaction_time: Duration,
    },
    ResponseIgnored {
        key: Key,
        reason: IgnoreReason,
    },
    /// A timer popped after the trial had already ended.
    LateCallback {
        timer: TimerHandle,
        action: TimerAction,
    },
    Ended {
        reason: EndReason,
        cancelled_timers: usize,
        responded: bool,
    },
    Finished,
}

/// Receives every `TrialEvent` with its offset from trial start.
pub trait TrialObserver {
    fn observe(&mut self, at: Duration, event: &TrialEvent);
}

impl<F: FnMut(Duration, &TrialEvent)> TrialObserver for F {
    fn observe(&mut self, at: Duration, event: &TrialEvent) {
        self(at, event)
    }
}

/// Forwards trial events to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    trial: Option<usize>,
}

impl TracingObserver {
    pub fn for_trial(trial: usize) -> Self {
        Self { trial: Some(trial) }
    }
}

impl TrialObserver for TracingObserver {
    fn observe(&mut self, at: Duration, event: &TrialEvent) {
        let at_ms = at.as_secs_f64() * 1e3;
        let trial = self.trial;
        match event {
            TrialEvent::Started {
                stimuli,
                final_onset,
                timers,
            } => info!(
                ?trial,
                stimuli,
                final_onset_ms = final_onset.as_secs_f64() * 1e3,
                timers = timers.len(),
                "trial started"
            ),
            TrialEvent::StimulusShown { index } => {
                debug!(?trial, at_ms, index, "stimulus shown")
            }
            TrialEvent::PromptShown => debug!(?trial, at_ms, "prompt shown"),
            TrialEvent::ResponseWindowOpened { listener } => {
                debug!(?trial, at_ms, listener = listener.0, "response window opened")
            }
            TrialEvent::ResponseRecorded { key, reaction_time } => info!(
                ?trial,
                at_ms,
                %key,
                rt_ms = reaction_time.as_secs_f64() * 1e3,
                "response recorded"
            ),
            TrialEvent::ResponseIgnored { key, reason } => {
                debug!(?trial, at_ms, %key, ?reason, "response ignored")
            }
            TrialEvent::LateCallback { timer, action } => {
                debug!(?trial, at_ms, ?timer, ?action, "timer fired after trial end")
            }
            TrialEvent::Ended {
                reason,
                cancelled_timers,
                responded,
            } => info!(
                ?trial,
                at_ms,
                %reason,
                cancelled_timers,
                responded,
                "trial ended"
            ),
            TrialEvent::Finished => debug!(?trial, at_ms, "trial finished"),
        }
    }
}
