use std::time::Duration;

/// How late scheduled events actually fired relative to their nominal deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingStats {
    pub samples: usize,
    pub mean_lateness_ns: f64,
    pub jitter_ns: f64,
    pub min_lateness_ns: f64,
    pub max_lateness_ns: f64,
}

/// Rolling window of lateness samples.
#[derive(Debug, Clone)]
pub struct LatenessLog {
    samples: Vec<Duration>,
    max_samples: usize,
}

impl LatenessLog {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples.min(1000)),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&mut self, nominal: Duration, actual: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(actual.saturating_sub(nominal));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> TimingStats {
        let times: Vec<f64> = self.samples.iter().map(|d| d.as_nanos() as f64).collect();
        if times.is_empty() {
            return TimingStats {
                samples: 0,
                mean_lateness_ns: 0.0,
                jitter_ns: 0.0,
                min_lateness_ns: 0.0,
                max_lateness_ns: 0.0,
            };
        }
        let sum: f64 = times.iter().sum();
        let avg = sum / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        TimingStats {
            samples: times.len(),
            mean_lateness_ns: avg,
            jitter_ns: var.sqrt(),
            min_lateness_ns: min,
            max_lateness_ns: max,
        }
    }
}

impl Default for LatenessLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
