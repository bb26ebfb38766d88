use loadwatch_common::{LoadPhase, Result};
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

use crate::scheduler::{Dispatch, StopFlag};
use crate::sink::ResultSink;

/// How often the probe logs its running success rate.
pub const PROBE_REPORT_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeSummary {
    pub requests: u64,
    pub succeeded: u64,
}

impl ProbeSummary {
    pub fn success_rate(&self) -> Option<f64> {
        if self.requests == 0 {
            None
        } else {
            Some(self.succeeded as f64 / self.requests as f64)
        }
    }
}

/// Issue one request every `interval` until stopped (or until `max_requests`
/// have been sent), appending each outcome to `sink`.
///
/// A write failure on the result log ends the probe with an error; request
/// failures are recorded and the probe carries on.
pub async fn run_probe<D: Dispatch, W: Write>(
    dispatcher: &D,
    phase: &LoadPhase,
    sink: &mut ResultSink<W>,
    interval: Duration,
    max_requests: Option<u64>,
    stop: &StopFlag,
) -> Result<ProbeSummary> {
    let mut summary = ProbeSummary::default();

    while !stop.is_stopped() {
        let outcome = dispatcher.dispatch(phase, 0, summary.requests).await;
        sink.append(&outcome)?;

        summary.requests += 1;
        if outcome.success {
            summary.succeeded += 1;
            info!(
                status = %outcome.status,
                response_secs = %format!("{:.3}", outcome.response_time),
                server_secs = %format!("{:.3}", outcome.server_time.unwrap_or(0.0)),
                network_secs = %outcome.network_time().map(|t| format!("{t:.3}")).unwrap_or_else(|| "N/A".to_string()),
                "probe ok"
            );
        } else {
            warn!(
                status = %outcome.status,
                error = outcome.error.as_deref().unwrap_or(""),
                "probe failed"
            );
        }

        if summary.requests % PROBE_REPORT_EVERY == 0 {
            let rate = summary.success_rate().unwrap_or(0.0) * 100.0;
            info!(requests = summary.requests, success_pct = %format!("{rate:.1}"), "probe progress");
        }

        if max_requests.is_some_and(|max| summary.requests >= max) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.stopped() => break,
        }
    }

    Ok(summary)
}
