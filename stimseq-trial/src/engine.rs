use crate::capture::ResponseCapture;
use crate::observer::{IgnoreReason, TimerAction, TracingObserver, TrialEvent, TrialObserver};
use crate::schedule::Schedule;
use crate::spec::TrialSpec;
use stimseq_core::{
    EndReason, ListenerHandle, Response, Stimulus, TrialError, TrialHost, TrialResult, TrialState,
};
use stimseq_timing::{Fired, Timer, TimerSet};
use std::time::Duration;

/// Runs one trial from first stimulus to the sequencer's finished signal.
///
/// The engine never blocks. The owner drives it by calling [`update`] whenever
/// the clock reaches [`next_deadline`] and by forwarding listener matches to
/// [`deliver_response`]. All callbacks are checked against the trial state
/// before they take effect, so a timer or key press that races the end of the
/// trial is a no-op.
///
/// [`update`]: TrialEngine::update
/// [`next_deadline`]: TrialEngine::next_deadline
/// [`deliver_response`]: TrialEngine::deliver_response
pub struct TrialEngine<S, T> {
    timer: T,
    host: TrialHost<S>,
    observer: Box<dyn TrialObserver>,
    state: TrialState,
    spec: Option<TrialSpec<S>>,
    schedule: Schedule,
    timers: TimerSet<TimerAction>,
    capture: ResponseCapture,
    listener: Option<ListenerHandle>,
    origin: Duration,
    finish_at: Option<Duration>,
    finished: bool,
    result: Option<TrialResult<S>>,
}

impl<S, T> TrialEngine<S, T>
where
    S: Stimulus,
    T: Timer,
{
    pub fn new(timer: T, host: TrialHost<S>) -> Self {
        Self {
            timer,
            host,
            observer: Box::new(TracingObserver::default()),
            state: TrialState::NotStarted,
            spec: None,
            schedule: Schedule::default(),
            timers: TimerSet::new(),
            capture: ResponseCapture::new(),
            listener: None,
            origin: Duration::ZERO,
            finish_at: None,
            finished: false,
            result: None,
        }
    }

    pub fn with_observer(mut self, observer: impl TrialObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Validates `spec`, arms every timer and shows the first stimulus.
    ///
    /// A spec that fails validation leaves the engine in `NotStarted`.
    pub fn start(&mut self, spec: TrialSpec<S>) -> Result<(), TrialError> {
        if self.state != TrialState::NotStarted {
            return Err(TrialError::AlreadyStarted);
        }
        let schedule = spec.schedule()?;

        self.origin = self.timer.now();
        self.state = TrialState::Running;

        // Swaps are armed before the window timers so that a window opening
        // together with the final stimulus fires after it is on screen.
        let mut armed = Vec::with_capacity(schedule.len() + 1);
        for entry in schedule.entries().iter().skip(1) {
            armed.push(
                self.timers
                    .schedule(entry.onset, TimerAction::SwapTo(entry.stimulus_index)),
            );
        }
        if spec.choices.accepts_responses() {
            let onset = spec.effective_window_onset(&schedule);
            armed.push(self.timers.schedule(onset, TimerAction::OpenResponseWindow));
            if let Some(limit) = spec.window_duration.limit() {
                armed.push(
                    self.timers
                        .schedule(onset.saturating_add(limit), TimerAction::CloseResponseWindow),
                );
            }
        }

        self.observer.observe(
            Duration::ZERO,
            &TrialEvent::Started {
                stimuli: spec.stimuli.len(),
                final_onset: schedule.final_onset(),
                timers: armed,
            },
        );
        self.schedule = schedule;
        let spec = self.spec.insert(spec);

        self.host
            .display
            .render(&spec.stimuli[0], spec.is_markup)
            .map_err(TrialError::Display)?;
        self.observer
            .observe(Duration::ZERO, &TrialEvent::StimulusShown { index: 0 });

        if let Some(prompt) = &spec.prompt {
            self.host
                .display
                .append_prompt(prompt)
                .map_err(TrialError::Display)?;
            self.observer.observe(Duration::ZERO, &TrialEvent::PromptShown);
        }
        Ok(())
    }

    /// Fires every timer that is due and, once the trial has ended and the
    /// post-trial gap has elapsed, signals the sequencer.
    ///
    /// A collaborator failure aborts the pass; timers that were not reached
    /// stay armed and fire on the next call.
    pub fn update(&mut self) -> Result<(), TrialError> {
        if self.state == TrialState::NotStarted {
            return Ok(());
        }
        let now = self.elapsed();
        while let Some(fired) = self.timers.pop_due(now) {
            self.dispatch(fired)?;
        }
        if self.state == TrialState::Ended && !self.finished {
            if let Some(at) = self.finish_at {
                if now >= at {
                    self.finish();
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, fired: Fired<TimerAction>) -> Result<(), TrialError> {
        let at = self.elapsed();
        let Some(spec) = self.spec.as_ref().filter(|_| self.state == TrialState::Running) else {
            self.observer.observe(
                at,
                &TrialEvent::LateCallback {
                    timer: fired.handle,
                    action: fired.action,
                },
            );
            return Ok(());
        };

        match fired.action {
            TimerAction::SwapTo(index) => {
                self.host
                    .display
                    .render(&spec.stimuli[index], spec.is_markup)
                    .map_err(TrialError::Display)?;
                self.observer
                    .observe(at, &TrialEvent::StimulusShown { index });
            }
            TimerAction::OpenResponseWindow => {
                let handle = self
                    .host
                    .keyboard
                    .arm(&spec.choices)
                    .map_err(TrialError::Keyboard)?;
                self.listener = Some(handle);
                self.observer
                    .observe(at, &TrialEvent::ResponseWindowOpened { listener: handle });
            }
            TimerAction::CloseResponseWindow => self.end(EndReason::Timeout)?,
        }
        Ok(())
    }

    /// Hands a key press from the listener armed under `handle` to the trial.
    ///
    /// Returns whether the press was captured. Only the first qualifying
    /// press of a trial is kept; presses after the trial ended, from a stale
    /// listener or with keys outside the accepted set are ignored.
    pub fn deliver_response(
        &mut self,
        handle: ListenerHandle,
        response: Response,
    ) -> Result<bool, TrialError> {
        let at = self.elapsed();
        match self.state {
            TrialState::NotStarted => return Err(TrialError::NotStarted),
            TrialState::Ended => {
                self.ignore(at, response, IgnoreReason::TrialEnded);
                return Ok(false);
            }
            TrialState::Running => {}
        }
        if self.listener != Some(handle) {
            self.ignore(at, response, IgnoreReason::StaleListener);
            return Ok(false);
        }
        let (qualifies, end_now) = match &self.spec {
            Some(spec) => (
                spec.choices.accepts(&response.key),
                spec.continue_after_response,
            ),
            None => return Err(TrialError::NotStarted),
        };
        if !qualifies {
            self.ignore(at, response, IgnoreReason::NotQualifying);
            return Ok(false);
        }

        let marked = self
            .host
            .display
            .mark_responded()
            .map_err(TrialError::Display);

        let event = TrialEvent::ResponseRecorded {
            key: response.key.clone(),
            reaction_time: response.reaction_time,
        };
        let ignored_key = response.key.clone();
        let recorded = self.capture.try_record(response);
        if recorded {
            self.observer.observe(at, &event);
        } else {
            self.observer.observe(
                at,
                &TrialEvent::ResponseIgnored {
                    key: ignored_key,
                    reason: IgnoreReason::AlreadyRecorded,
                },
            );
        }

        let ended = if end_now {
            self.end(EndReason::Response)
        } else {
            Ok(())
        };
        marked.and(ended).map(|_| recorded)
    }

    /// Ends a running trial from the outside, exactly like a timeout would.
    pub fn force_end(&mut self) -> Result<(), TrialError> {
        match self.state {
            TrialState::NotStarted => Err(TrialError::NotStarted),
            _ => self.end(EndReason::Forced),
        }
    }

    /// The single `Running -> Ended` transition. Every step runs even if a
    /// collaborator fails; the first failure is returned afterwards.
    fn end(&mut self, reason: EndReason) -> Result<(), TrialError> {
        if self.state != TrialState::Running {
            return Ok(());
        }
        let Some(spec) = self.spec.as_ref() else {
            return Err(TrialError::NotStarted);
        };
        let at = self.elapsed();
        self.state = TrialState::Ended;
        let cancelled_timers = self.timers.cancel_all();

        let mut failure: Option<TrialError> = None;
        if let Some(handle) = self.listener.take() {
            if let Err(e) = self.host.keyboard.disarm(handle) {
                keep_first(&mut failure, TrialError::Keyboard(e));
            }
        }

        let captured = self.capture.value();
        let result = TrialResult {
            reaction_time: captured.map(|r| r.reaction_time),
            key: captured.map(|r| r.key.clone()),
            stimuli: spec.stimuli.clone(),
            data: spec.data.clone(),
        };
        if let Err(e) = self.host.recorder.write(&result) {
            keep_first(&mut failure, TrialError::Recorder(e));
        }
        if let Err(e) = self.host.display.clear() {
            keep_first(&mut failure, TrialError::Display(e));
        }
        let gap = spec.post_trial_gap;

        self.observer.observe(
            at,
            &TrialEvent::Ended {
                reason,
                cancelled_timers,
                responded: result.responded(),
            },
        );
        self.result = Some(result);

        if gap.is_zero() {
            self.finish();
        } else {
            self.finish_at = Some(at.saturating_add(gap));
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.finish_at = None;
        self.host.sequencer.signal_finished();
        let at = self.elapsed();
        self.observer.observe(at, &TrialEvent::Finished);
    }

    fn ignore(&mut self, at: Duration, response: Response, reason: IgnoreReason) {
        self.observer.observe(
            at,
            &TrialEvent::ResponseIgnored {
                key: response.key,
                reason,
            },
        );
    }

    /// Time since the trial started.
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed(self.origin)
    }

    /// Timer time at which `update` next has something to do.
    pub fn next_deadline(&self) -> Option<Duration> {
        let offset = match self.state {
            TrialState::Running => self.timers.next_deadline(),
            TrialState::Ended if !self.finished => self.finish_at,
            _ => None,
        };
        offset.map(|d| self.origin.saturating_add(d))
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    /// Whether the sequencer has been told this trial is over.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn response(&self) -> Option<&Response> {
        self.capture.value()
    }

    pub fn listener(&self) -> Option<ListenerHandle> {
        self.listener
    }

    pub fn result(&self) -> Option<&TrialResult<S>> {
        self.result.as_ref()
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Gives the collaborators back once the engine is no longer needed.
    pub fn into_host(self) -> TrialHost<S> {
        self.host
    }
}

fn keep_first(slot: &mut Option<TrialError>, err: TrialError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}
