use anyhow::{Context, Result, bail};
use rand::Rng;
use serde::Deserialize;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use stimseq_core::{Recorder, StimulusRef, TrialHost, TrialResult};
use stimseq_timing::{LatenessLog, Timer, TimingStats};
use stimseq_trial::{TracingObserver, TrialEngine, TrialParams, TrialSpec};
use tracing::{info, warn};

use crate::devices::{ConsoleDisplay, ParticipantConfig, SimulatedParticipant, TrialCounter};

/// A session file: the trials to run, in order, and who runs them.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub trials: Vec<TrialParams>,
    #[serde(default)]
    pub participant: ParticipantConfig,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid session file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if !(0.0..=1.0).contains(&config.participant.miss_rate) {
            bail!(
                "participant miss_rate must be within 0..=1, got {}",
                config.participant.miss_rate
            );
        }
        Ok(config)
    }

    /// Resolves every trial, failing on the first invalid one.
    pub fn resolve_trials(&self) -> Result<Vec<TrialSpec<StimulusRef>>> {
        self.trials
            .iter()
            .enumerate()
            .map(|(i, params)| params.resolve().with_context(|| format!("trial {i}")))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub trials: usize,
    pub finished: usize,
    pub responded: usize,
    pub timing: TimingStats,
}

/// Runs trials back to back, one engine per trial, on a single thread.
pub struct Session<T, R> {
    timer: T,
    participant: Rc<RefCell<SimulatedParticipant<T, R>>>,
    counter: Rc<RefCell<TrialCounter>>,
    host: Option<TrialHost<StimulusRef>>,
    lateness: LatenessLog,
}

impl<T, R> Session<T, R>
where
    T: Timer + 'static,
    R: Rng + 'static,
{
    pub fn new(
        timer: T,
        rng: R,
        participant: ParticipantConfig,
        recorder: impl Recorder<StimulusRef> + 'static,
    ) -> Self {
        let participant = Rc::new(RefCell::new(SimulatedParticipant::new(
            timer.clone(),
            rng,
            participant,
        )));
        let counter = Rc::new(RefCell::new(TrialCounter::default()));
        let host = TrialHost::new(
            ConsoleDisplay::default(),
            participant.clone(),
            recorder,
            counter.clone(),
        );
        Self {
            timer,
            participant,
            counter,
            host: Some(host),
            lateness: LatenessLog::default(),
        }
    }

    pub fn run(&mut self, specs: Vec<TrialSpec<StimulusRef>>) -> Result<SessionSummary> {
        let trials = specs.len();
        let mut responded = 0;
        for (index, spec) in specs.into_iter().enumerate() {
            let result = self
                .run_trial(index, spec)
                .with_context(|| format!("trial {index} failed"))?;
            if result.responded() {
                responded += 1;
            }
        }

        let timing = self.lateness.stats();
        let finished = self.finished_trials();
        info!(
            trials,
            responded,
            finished,
            mean_lateness_ms = timing.mean_lateness_ns / 1e6,
            jitter_ms = timing.jitter_ns / 1e6,
            max_lateness_ms = timing.max_lateness_ns / 1e6,
            "session complete"
        );
        Ok(SessionSummary {
            trials,
            finished,
            responded,
            timing,
        })
    }

    pub fn finished_trials(&self) -> usize {
        self.counter.borrow().finished()
    }

    fn run_trial(
        &mut self,
        index: usize,
        spec: TrialSpec<StimulusRef>,
    ) -> Result<TrialResult<StimulusRef>> {
        let Some(host) = self.host.take() else {
            bail!("collaborators were not returned by the previous trial");
        };
        let mut engine = TrialEngine::new(self.timer.clone(), host)
            .with_observer(TracingObserver::for_trial(index));
        let outcome = self.drive(index, &mut engine, spec);
        self.host = Some(engine.into_host());
        outcome
    }

    fn drive(
        &mut self,
        index: usize,
        engine: &mut TrialEngine<StimulusRef, T>,
        spec: TrialSpec<StimulusRef>,
    ) -> Result<TrialResult<StimulusRef>> {
        engine.start(spec)?;
        while !engine.is_finished() {
            engine.update()?;

            let press = self
                .participant
                .borrow_mut()
                .take_due_press(self.timer.now());
            if let Some((handle, response)) = press {
                engine.deliver_response(handle, response)?;
                continue;
            }
            if engine.is_finished() {
                break;
            }

            let next_press = self.participant.borrow().next_press_at();
            match [engine.next_deadline(), next_press].into_iter().flatten().min() {
                Some(deadline) => {
                    self.timer.sleep_until(deadline);
                    self.lateness.record(deadline, self.timer.now());
                }
                None => {
                    // Nothing armed can ever end this trial.
                    warn!(trial = index, "trial cannot end on its own, forcing end");
                    engine.force_end()?;
                }
            }
        }
        engine
            .result()
            .cloned()
            .context("trial finished without a result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::Value;
    use std::io::Write;
    use std::time::Duration;
    use stimseq_timing::ManualTimer;

    use crate::devices::JsonLinesRecorder;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn records(&self) -> Vec<Value> {
            String::from_utf8(self.0.borrow().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn session(
        participant: ParticipantConfig,
    ) -> (ManualTimer, SharedBuf, Session<ManualTimer, StdRng>) {
        let timer = ManualTimer::new();
        let buf = SharedBuf::default();
        let session = Session::new(
            timer.clone(),
            StdRng::seed_from_u64(42),
            participant,
            JsonLinesRecorder::new(buf.clone()),
        );
        (timer, buf, session)
    }

    fn always_responds(rt_ms: u64) -> ParticipantConfig {
        ParticipantConfig {
            rt_min_ms: rt_ms,
            rt_max_ms: rt_ms,
            miss_rate: 0.0,
        }
    }

    fn never_responds() -> ParticipantConfig {
        ParticipantConfig {
            miss_rate: 1.0,
            ..Default::default()
        }
    }

    const SESSION: &str = r#"{
        "seed": 3,
        "participant": {"rt_min_ms": 50, "rt_max_ms": 50, "miss_rate": 0.0},
        "trials": [
            {
                "stimuli": ["A", "B", "C"],
                "stim_durations_ms": [100, 200],
                "choices": ["f", "j"],
                "timing_post_trial_ms": 0,
                "data": {"block": 1}
            },
            {
                "stimuli": ["fixation"],
                "choices": "none",
                "timing_post_trial_ms": 500
            }
        ]
    }"#;

    #[test]
    fn session_file_parses_and_resolves() {
        let config = SessionConfig::from_json(SESSION).unwrap();
        assert_eq!(config.seed, Some(3));
        assert_eq!(config.participant, always_responds(50));
        let specs = config.resolve_trials().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].stim_durations.len(), 2);
    }

    #[test]
    fn invalid_trial_is_reported_with_its_index() {
        let config = SessionConfig::from_json(
            r#"{"trials": [{"stimuli": ["a"]}, {"stimuli": ["a", "b"]}]}"#,
        )
        .unwrap();
        let err = config.resolve_trials().unwrap_err();
        assert_eq!(err.to_string(), "trial 1");
    }

    #[test]
    fn out_of_range_miss_rate_is_rejected() {
        assert!(
            SessionConfig::from_json(r#"{"trials": [], "participant": {"miss_rate": 1.5}}"#)
                .is_err()
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SESSION.as_bytes()).unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.trials.len(), 2);

        let missing = SessionConfig::load(Path::new("/definitely/not/here.json"));
        assert!(missing.is_err());
    }

    #[test]
    fn sequence_trial_ends_on_response() {
        let (timer, buf, mut session) = session(always_responds(50));
        let spec = TrialSpec::new(["A", "B", "C"].map(StimulusRef::new))
            .durations([Duration::from_millis(100), Duration::from_millis(200)])
            .choices(stimseq_core::Choices::keys(["f", "j"]));

        let summary = session.run(vec![spec]).unwrap();
        assert_eq!(summary.trials, 1);
        assert_eq!(summary.responded, 1);
        assert_eq!(session.finished_trials(), 1);
        assert_eq!(timer.now(), Duration::from_millis(350));

        let records = buf.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["rt"], 50.0);
        assert!(["f", "j"].contains(&records[0]["key_press"].as_str().unwrap()));
        assert_eq!(records[0]["stimulus"], serde_json::json!(["A", "B", "C"]));
        assert_eq!(summary.timing.max_lateness_ns, 0.0);
    }

    #[test]
    fn missed_window_times_out() {
        let (timer, buf, mut session) = session(never_responds());
        let spec = TrialSpec::new(["A", "B"].map(StimulusRef::new))
            .durations([Duration::from_millis(100)])
            .window_duration(stimseq_trial::WindowDuration::Limited(Duration::from_millis(400)))
            .post_trial_gap(Duration::from_millis(1_000));

        session.run(vec![spec]).unwrap();
        assert_eq!(timer.now(), Duration::from_millis(1_500));
        let records = buf.records();
        assert_eq!(records[0]["rt"], Value::Null);
        assert_eq!(records[0]["key_press"], Value::Null);
    }

    #[test]
    fn stuck_trial_is_forced_to_end() {
        let (_, buf, mut session) = session(never_responds());
        let spec = TrialSpec::new(["A"].map(StimulusRef::new));
        let summary = session.run(vec![spec]).unwrap();
        assert_eq!(summary.responded, 0);
        assert_eq!(buf.records().len(), 1);
        assert_eq!(session.finished_trials(), 1);
    }

    #[test]
    fn response_without_ending_waits_for_timeout() {
        let (timer, buf, mut session) = session(always_responds(120));
        let spec = TrialSpec::new(["A"].map(StimulusRef::new))
            .continue_after_response(false)
            .window_duration(stimseq_trial::WindowDuration::Limited(Duration::from_millis(500)));

        session.run(vec![spec]).unwrap();
        assert_eq!(timer.now(), Duration::from_millis(500));
        assert_eq!(buf.records()[0]["rt"], 120.0);
    }

    #[test]
    fn whole_session_runs_in_order() {
        let config = SessionConfig::from_json(SESSION).unwrap();
        let (timer, buf, mut session) = session(config.participant.clone());
        let summary = session.run(config.resolve_trials().unwrap()).unwrap();

        assert_eq!(summary.trials, 2);
        assert_eq!(summary.responded, 1);
        assert_eq!(session.finished_trials(), 2);
        // 300 ms sequence + 50 ms response, then a forced end and a 500 ms gap
        assert_eq!(timer.now(), Duration::from_millis(850));

        let records = buf.records();
        assert_eq!(records[0]["block"], 1);
        assert_eq!(records[1]["stimulus"], serde_json::json!(["fixation"]));
        assert_eq!(records[1]["key_press"], Value::Null);
    }
}
