use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs::File;
use std::io::{BufWriter, Write};
use stimseq_core::StimulusRef;
use stimseq_timing::{HighPrecisionTimer, ManualTimer, Timer};
use stimseq_trial::{TrialSpec, WindowDuration, WindowOnset};
use tracing::info;

use crate::cli::{CheckArgs, RunArgs};
use crate::devices::{JsonLinesRecorder, ParticipantConfig};
use crate::session::{Session, SessionConfig, SessionSummary};

pub struct App {
    args: RunArgs,
    config: SessionConfig,
}

impl App {
    pub fn new(args: RunArgs) -> Result<Self> {
        let config = SessionConfig::load(&args.session)?;
        Ok(Self { args, config })
    }

    pub fn run(self) -> Result<()> {
        let specs = self.config.resolve_trials()?;
        let out: Box<dyn Write> = match &self.args.out {
            Some(path) => Box::new(BufWriter::new(
                File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?,
            )),
            None => Box::new(std::io::stdout().lock()),
        };
        let rng = match self.args.seed.or(self.config.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let participant = self.config.participant.clone();

        info!(
            trials = specs.len(),
            dry_run = self.args.dry_run,
            "starting session"
        );
        let summary = if self.args.dry_run {
            run_session(ManualTimer::new(), rng, participant, out, specs)?
        } else {
            run_session(HighPrecisionTimer::new(), rng, participant, out, specs)?
        };
        info!(
            trials = summary.trials,
            responded = summary.responded,
            finished = summary.finished,
            mean_lateness_ms = summary.timing.mean_lateness_ns / 1e6,
            "results written"
        );
        Ok(())
    }
}

fn run_session<T: Timer + 'static>(
    timer: T,
    rng: StdRng,
    participant: ParticipantConfig,
    out: Box<dyn Write>,
    specs: Vec<TrialSpec<StimulusRef>>,
) -> Result<SessionSummary> {
    let mut session = Session::new(timer, rng, participant, JsonLinesRecorder::new(out));
    session.run(specs)
}

/// Prints the resolved timeline of every trial in a session file.
pub fn check(args: &CheckArgs) -> Result<()> {
    let config = SessionConfig::load(&args.session)?;
    let specs = config.resolve_trials()?;
    for (i, spec) in specs.iter().enumerate() {
        println!("{}", describe(i, spec)?);
    }
    println!("{} trial(s) ok", specs.len());
    Ok(())
}

fn describe(index: usize, spec: &TrialSpec<StimulusRef>) -> Result<String> {
    let schedule = spec.schedule()?;
    let onsets: Vec<String> = schedule
        .onsets()
        .zip(&spec.stimuli)
        .map(|(onset, stim)| format!("{}@{}ms", stim, onset.as_millis()))
        .collect();
    let window = if spec.choices.accepts_responses() {
        let onset = spec.effective_window_onset(&schedule);
        let close = match spec.window_duration.limit() {
            Some(limit) => format!("{}ms", (onset + limit).as_millis()),
            None => "open".to_string(),
        };
        let from = match spec.window_onset {
            WindowOnset::FinalStimulus => "final stimulus",
            WindowOnset::At(_) => "fixed onset",
        };
        format!("window {}ms..{} ({from})", onset.as_millis(), close)
    } else {
        "no responses".to_string()
    };
    let stuck = !spec.choices.accepts_responses()
        || (spec.window_duration == WindowDuration::Unlimited && !spec.continue_after_response);
    Ok(format!(
        "trial {index}: {} | {window}{}",
        onsets.join(" "),
        if stuck { " | needs external end" } else { "" }
    ))
}
