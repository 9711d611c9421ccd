use anyhow::{Context, Result};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use stimseq_core::{
    Choices, DisplaySurface, Key, KeyboardListener, ListenerHandle, Recorder, Response, Stimulus,
    StimulusRef, TrialResult, TrialSequencer,
};
use stimseq_timing::Timer;
use tracing::{debug, info};

/// Display surface that reports what would be on screen through the log.
#[derive(Debug, Default)]
pub struct ConsoleDisplay {
    showing: Option<String>,
    responded: bool,
}

impl DisplaySurface<StimulusRef> for ConsoleDisplay {
    fn render(&mut self, stimulus: &StimulusRef, is_markup: bool) -> Result<()> {
        info!(stimulus = stimulus.source(), is_markup, "render");
        self.showing = Some(stimulus.source().to_string());
        Ok(())
    }

    fn append_prompt(&mut self, content: &str) -> Result<()> {
        info!(prompt = content, "prompt");
        Ok(())
    }

    fn mark_responded(&mut self) -> Result<()> {
        if !self.responded {
            debug!("stimulus marked as responded");
            self.responded = true;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        debug!(was_showing = ?self.showing, "display cleared");
        self.showing = None;
        self.responded = false;
        Ok(())
    }
}

/// How the simulated participant behaves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParticipantConfig {
    pub rt_min_ms: u64,
    pub rt_max_ms: u64,
    /// Probability of not responding at all within a window.
    pub miss_rate: f64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            rt_min_ms: 250,
            rt_max_ms: 800,
            miss_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
struct Armed {
    handle: ListenerHandle,
    armed_at: Duration,
    press: Option<(Duration, Key)>,
}

/// Keyboard listener that answers on its own: once armed it schedules a
/// single press of a random accepted key after a random reaction time.
pub struct SimulatedParticipant<T, R> {
    timer: T,
    rng: R,
    config: ParticipantConfig,
    next_handle: u64,
    armed: Option<Armed>,
}

impl<T: Timer, R: Rng> SimulatedParticipant<T, R> {
    pub fn new(timer: T, rng: R, config: ParticipantConfig) -> Self {
        Self {
            timer,
            rng,
            config,
            next_handle: 0,
            armed: None,
        }
    }

    /// Timer time of the pending press, if any.
    pub fn next_press_at(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .and_then(|a| a.press.as_ref())
            .map(|(at, _)| *at)
    }

    /// Takes the pending press once its time has come.
    pub fn take_due_press(&mut self, now: Duration) -> Option<(ListenerHandle, Response)> {
        let armed = self.armed.as_mut()?;
        match &armed.press {
            Some((at, _)) if *at <= now => {}
            _ => return None,
        }
        let (at, key) = armed.press.take()?;
        Some((armed.handle, Response::new(at - armed.armed_at, key)))
    }

    fn plan_press(&mut self, choices: &Choices) -> Option<(Duration, Key)> {
        let miss_rate = self.config.miss_rate.clamp(0.0, 1.0);
        if self.rng.random_bool(miss_rate) {
            return None;
        }
        let key = match choices {
            Choices::NoResponse => return None,
            Choices::Keys(set) if set.is_empty() => Key::from("space"),
            Choices::Keys(set) => {
                let keys: Vec<&Key> = set.iter().collect();
                (*keys.choose(&mut self.rng)?).clone()
            }
        };
        let lo = self.config.rt_min_ms.min(self.config.rt_max_ms);
        let hi = self.config.rt_min_ms.max(self.config.rt_max_ms);
        let rt = Duration::from_millis(self.rng.random_range(lo..=hi));
        Some((self.timer.now() + rt, key))
    }
}

impl<T: Timer, R: Rng> KeyboardListener for SimulatedParticipant<T, R> {
    fn arm(&mut self, choices: &Choices) -> Result<ListenerHandle> {
        self.next_handle += 1;
        let handle = ListenerHandle(self.next_handle);
        let press = self.plan_press(choices);
        debug!(handle = handle.0, planned = press.is_some(), "listener armed");
        self.armed = Some(Armed {
            handle,
            armed_at: self.timer.now(),
            press,
        });
        Ok(handle)
    }

    fn disarm(&mut self, handle: ListenerHandle) -> Result<()> {
        if self.armed.as_ref().is_some_and(|a| a.handle == handle) {
            self.armed = None;
        }
        Ok(())
    }
}

/// Writes each result as one line of JSON.
pub struct JsonLinesRecorder<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesRecorder<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Recorder<StimulusRef> for JsonLinesRecorder<W> {
    fn write(&mut self, record: &TrialResult<StimulusRef>) -> Result<()> {
        serde_json::to_writer(&mut self.out, record).context("failed to serialize result")?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Counts finished trials.
#[derive(Debug, Default)]
pub struct TrialCounter {
    finished: usize,
}

impl TrialCounter {
    pub fn finished(&self) -> usize {
        self.finished
    }
}

impl TrialSequencer for TrialCounter {
    fn signal_finished(&mut self) {
        self.finished += 1;
        debug!(finished = self.finished, "trial finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use stimseq_timing::ManualTimer;

    fn participant(config: ParticipantConfig) -> (ManualTimer, SimulatedParticipant<ManualTimer, StdRng>) {
        let timer = ManualTimer::new();
        let p = SimulatedParticipant::new(timer.clone(), StdRng::seed_from_u64(7), config);
        (timer, p)
    }

    #[test]
    fn press_lands_inside_reaction_window() {
        let (timer, mut p) = participant(ParticipantConfig {
            rt_min_ms: 200,
            rt_max_ms: 400,
            miss_rate: 0.0,
        });
        timer.set(Duration::from_millis(1_000));
        let handle = p.arm(&Choices::keys(["f", "j"])).unwrap();

        let at = p.next_press_at().unwrap();
        assert!(at >= Duration::from_millis(1_200) && at <= Duration::from_millis(1_400));
        assert!(p.take_due_press(at - Duration::from_millis(1)).is_none());

        let (h, response) = p.take_due_press(at).unwrap();
        assert_eq!(h, handle);
        assert_eq!(response.reaction_time, at - Duration::from_millis(1_000));
        assert!(["f", "j"].contains(&response.key.as_str()));
        assert!(p.take_due_press(at).is_none());
        assert!(p.next_press_at().is_none());
    }

    #[test]
    fn always_missing_participant_never_presses() {
        let (_, mut p) = participant(ParticipantConfig {
            miss_rate: 1.0,
            ..Default::default()
        });
        p.arm(&Choices::any_key()).unwrap();
        assert!(p.next_press_at().is_none());
    }

    #[test]
    fn any_key_trials_get_space() {
        let (_, mut p) = participant(ParticipantConfig {
            rt_min_ms: 10,
            rt_max_ms: 10,
            miss_rate: 0.0,
        });
        p.arm(&Choices::any_key()).unwrap();
        let (_, response) = p.take_due_press(Duration::from_millis(10)).unwrap();
        assert_eq!(response.key.as_str(), "space");
    }

    #[test]
    fn disarm_drops_pending_press() {
        let (_, mut p) = participant(ParticipantConfig {
            miss_rate: 0.0,
            ..Default::default()
        });
        let first = p.arm(&Choices::any_key()).unwrap();
        p.disarm(ListenerHandle(first.0 + 1)).unwrap();
        assert!(p.next_press_at().is_some());
        p.disarm(first).unwrap();
        assert!(p.next_press_at().is_none());
    }

    #[test]
    fn recorder_writes_one_line_per_result() {
        let mut recorder = JsonLinesRecorder::new(Vec::new());
        let record = TrialResult {
            reaction_time: None,
            key: None,
            stimuli: vec![StimulusRef::new("a.png")],
            data: Default::default(),
        };
        recorder.write(&record).unwrap();
        recorder.write(&record).unwrap();

        let text = String::from_utf8(recorder.out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["stimulus"][0], "a.png");
    }

    #[test]
    fn recorded_line_lets_data_override_columns() {
        let mut recorder = JsonLinesRecorder::new(Vec::new());
        let mut data = serde_json::Map::new();
        data.insert("key_press".into(), serde_json::json!("none"));
        let record = TrialResult {
            reaction_time: None,
            key: Some(Key::from("f")),
            stimuli: vec![StimulusRef::new("a.png")],
            data,
        };
        recorder.write(&record).unwrap();

        let text = String::from_utf8(recorder.out).unwrap();
        assert_eq!(text.matches("key_press").count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["key_press"], "none");
        assert_eq!(value["stimulus"][0], "a.png");
    }

    #[test]
    fn console_display_tracks_screen() {
        let mut display = ConsoleDisplay::default();
        display.render(&StimulusRef::new("a.png"), false).unwrap();
        assert_eq!(display.showing.as_deref(), Some("a.png"));
        display.mark_responded().unwrap();
        display.mark_responded().unwrap();
        assert!(display.responded);
        display.clear().unwrap();
        assert_eq!(display.showing, None);
        assert!(!display.responded);
    }
}
