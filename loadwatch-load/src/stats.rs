use loadwatch_common::RequestOutcome;

/// Order statistics over successful response times, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// The p50 order statistic (not interpolated).
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencySummary {
    /// Summarize `samples`; `None` when there are none.
    pub fn from_samples(mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable_by(f64::total_cmp);
        let n = samples.len();
        Some(Self {
            min: samples[0],
            max: samples[n - 1],
            mean: samples.iter().sum::<f64>() / n as f64,
            median: percentile(&samples, 0.50)?,
            p90: percentile(&samples, 0.90)?,
            p95: percentile(&samples, 0.95)?,
            p99: percentile(&samples, 0.99)?,
        })
    }
}

/// Counts and latency statistics for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStatistics {
    pub phase: String,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// `None` when no request in the phase succeeded.
    pub latency: Option<LatencySummary>,
}

impl PhaseStatistics {
    pub fn from_outcomes(phase: &str, outcomes: &[RequestOutcome]) -> Self {
        let counts = Counts::from_outcomes(outcomes);
        Self {
            phase: phase.to_string(),
            total: counts.total,
            succeeded: counts.succeeded,
            failed: counts.total - counts.succeeded,
            latency: LatencySummary::from_samples(counts.success_times),
        }
    }

    /// Fraction of requests that succeeded; `None` for an empty phase.
    pub fn success_rate(&self) -> Option<f64> {
        ratio(self.succeeded, self.total)
    }
}

/// Counts and latency statistics across every phase of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed_secs: f64,
    pub latency: Option<LatencySummary>,
}

impl RunStatistics {
    pub fn from_outcomes<'a>(
        outcomes: impl IntoIterator<Item = &'a RequestOutcome>,
        elapsed_secs: f64,
    ) -> Self {
        let counts = Counts::from_outcomes(outcomes);
        Self {
            total: counts.total,
            succeeded: counts.succeeded,
            failed: counts.total - counts.succeeded,
            elapsed_secs,
            latency: LatencySummary::from_samples(counts.success_times),
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        ratio(self.succeeded, self.total)
    }

    pub fn error_rate(&self) -> Option<f64> {
        ratio(self.failed, self.total)
    }

    /// Completed requests per second of wall-clock time.
    pub fn throughput_rps(&self) -> Option<f64> {
        if self.elapsed_secs > 0.0 {
            Some(self.total as f64 / self.elapsed_secs)
        } else {
            None
        }
    }
}

struct Counts {
    total: u64,
    succeeded: u64,
    success_times: Vec<f64>,
}

impl Counts {
    fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a RequestOutcome>) -> Self {
        let mut counts = Counts { total: 0, succeeded: 0, success_times: Vec::new() };
        for o in outcomes {
            counts.total += 1;
            if o.success {
                counts.succeeded += 1;
                counts.success_times.push(o.response_time);
            }
        }
        counts
    }
}

fn ratio(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        None
    } else {
        Some(part as f64 / whole as f64)
    }
}

/// Return the element of ascending-sorted `sorted` at index `floor(p * n)`,
/// clamped to the last element. Biased low for small samples.
/// Returns `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (p * sorted.len() as f64).floor() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}
