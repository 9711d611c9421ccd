use std::time::Duration;

/// When stimulus `stimulus_index` appears, relative to trial start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub stimulus_index: usize,
    pub onset: Duration,
}

/// Absolute onsets of every stimulus in a trial. Computed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// `durations[i]` is how long stimulus `i` stays up before `i + 1` replaces
    /// it, so `n - 1` durations yield `n` onsets starting at zero.
    pub fn from_durations(durations: &[Duration]) -> Self {
        let mut onset = Duration::ZERO;
        let mut entries = Vec::with_capacity(durations.len() + 1);
        entries.push(ScheduleEntry {
            stimulus_index: 0,
            onset,
        });
        for (i, d) in durations.iter().enumerate() {
            onset = onset.saturating_add(*d);
            entries.push(ScheduleEntry {
                stimulus_index: i + 1,
                onset,
            });
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn onsets(&self) -> impl Iterator<Item = Duration> + '_ {
        self.entries.iter().map(|e| e.onset)
    }

    /// Onset of the last stimulus; zero for an empty schedule.
    pub fn final_onset(&self) -> Duration {
        self.entries.last().map_or(Duration::ZERO, |e| e.onset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
