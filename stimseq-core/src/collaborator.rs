//! Services a trial delegates to. The engine only ever talks to the outside
//! world through these traits.

use crate::stimulus::Choices;
use crate::trial::{ListenerHandle, TrialResult};
use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;

/// Presentation surface owned by the experiment runner.
pub trait DisplaySurface<S> {
    fn render(&mut self, stimulus: &S, is_markup: bool) -> Result<()>;
    fn append_prompt(&mut self, content: &str) -> Result<()>;
    /// Visual feedback that a response was registered. Must be idempotent.
    fn mark_responded(&mut self) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

/// Keyboard subscription service.
///
/// Matching presses are fed back to the engine through
/// `TrialEngine::deliver_response` tagged with the handle returned by `arm`.
pub trait KeyboardListener {
    fn arm(&mut self, choices: &Choices) -> Result<ListenerHandle>;
    fn disarm(&mut self, handle: ListenerHandle) -> Result<()>;
}

pub trait Recorder<S> {
    fn write(&mut self, record: &TrialResult<S>) -> Result<()>;
}

/// Whatever sequences trials; told once per trial that it may move on.
pub trait TrialSequencer {
    fn signal_finished(&mut self);
}

impl<S, T: DisplaySurface<S> + ?Sized> DisplaySurface<S> for Rc<RefCell<T>> {
    fn render(&mut self, stimulus: &S, is_markup: bool) -> Result<()> {
        self.borrow_mut().render(stimulus, is_markup)
    }

    fn append_prompt(&mut self, content: &str) -> Result<()> {
        self.borrow_mut().append_prompt(content)
    }

    fn mark_responded(&mut self) -> Result<()> {
        self.borrow_mut().mark_responded()
    }

    fn clear(&mut self) -> Result<()> {
        self.borrow_mut().clear()
    }
}

impl<T: KeyboardListener + ?Sized> KeyboardListener for Rc<RefCell<T>> {
    fn arm(&mut self, choices: &Choices) -> Result<ListenerHandle> {
        self.borrow_mut().arm(choices)
    }

    fn disarm(&mut self, handle: ListenerHandle) -> Result<()> {
        self.borrow_mut().disarm(handle)
    }
}

impl<S, T: Recorder<S> + ?Sized> Recorder<S> for Rc<RefCell<T>> {
    fn write(&mut self, record: &TrialResult<S>) -> Result<()> {
        self.borrow_mut().write(record)
    }
}

impl<T: TrialSequencer + ?Sized> TrialSequencer for Rc<RefCell<T>> {
    fn signal_finished(&mut self) {
        self.borrow_mut().signal_finished()
    }
}

/// The full set of collaborators one trial talks to.
pub struct TrialHost<S> {
    pub display: Box<dyn DisplaySurface<S>>,
    pub keyboard: Box<dyn KeyboardListener>,
    pub recorder: Box<dyn Recorder<S>>,
    pub sequencer: Box<dyn TrialSequencer>,
}

impl<S> TrialHost<S> {
    pub fn new(
        display: impl DisplaySurface<S> + 'static,
        keyboard: impl KeyboardListener + 'static,
        recorder: impl Recorder<S> + 'static,
        sequencer: impl TrialSequencer + 'static,
    ) -> Self {
        Self {
            display: Box::new(display),
            keyboard: Box::new(keyboard),
            recorder: Box::new(recorder),
            sequencer: Box::new(sequencer),
        }
    }
}
