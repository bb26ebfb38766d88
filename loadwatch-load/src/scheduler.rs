use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use loadwatch_client::RequestExecutor;
use loadwatch_common::{truncate_error, LoadPhase, LoadWatchError, OutcomeStatus, RequestOutcome};
use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::sink::ResultSink;
use crate::stats::{PhaseStatistics, RunStatistics};

/// Abstraction over issuing one request, for testability.
pub trait Dispatch: Send + Sync + 'static {
    /// Issue one request for `phase`. Must always resolve to an outcome.
    fn dispatch(
        &self,
        phase: &LoadPhase,
        user_id: usize,
        sequence: u64,
    ) -> impl Future<Output = RequestOutcome> + Send;
}

impl Dispatch for RequestExecutor {
    fn dispatch(
        &self,
        phase: &LoadPhase,
        user_id: usize,
        sequence: u64,
    ) -> impl Future<Output = RequestOutcome> + Send {
        self.execute(phase, user_id, sequence)
    }
}

/// Cooperative stop signal. Checked between rounds and between phases;
/// in-flight requests are never cancelled.
#[derive(Clone, Default)]
pub struct StopFlag {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once [`StopFlag::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Everything recorded while one phase ran.
pub struct PhaseReport {
    pub phase: LoadPhase,
    pub rounds_completed: u64,
    pub elapsed: Duration,
    pub stats: PhaseStatistics,
    /// In completion order, as appended to the result log.
    pub outcomes: Vec<RequestOutcome>,
}

pub struct RunSummary {
    /// Phases that started, in execution order. A phase cut short by an
    /// interrupt is still reported with what it recorded.
    pub phases: Vec<PhaseReport>,
    pub interrupted: bool,
    pub elapsed: Duration,
    /// Set when the result log could not be written; the run stops at that round.
    pub sink_error: Option<LoadWatchError>,
}

impl RunSummary {
    pub fn global_statistics(&self) -> RunStatistics {
        RunStatistics::from_outcomes(
            self.phases.iter().flat_map(|p| p.outcomes.iter()),
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Drives phases strictly in order, one barrier-synchronised round at a time.
pub struct PhaseScheduler<D: Dispatch, W: Write> {
    dispatcher: Arc<D>,
    sink: ResultSink<W>,
    stop: StopFlag,
    sink_error: Option<LoadWatchError>,
}

impl<D: Dispatch, W: Write> PhaseScheduler<D, W> {
    pub fn new(dispatcher: Arc<D>, sink: ResultSink<W>, stop: StopFlag) -> Self {
        Self { dispatcher, sink, stop, sink_error: None }
    }

    /// Run every phase in order. Stops early, without error, on interrupt.
    pub async fn run(&mut self, phases: &[LoadPhase]) -> RunSummary {
        let run_start = Instant::now();
        let mut reports = Vec::with_capacity(phases.len());

        for phase in phases {
            if self.should_halt() {
                break;
            }
            reports.push(self.run_phase(phase).await);
        }

        let interrupted = self.stop.is_stopped();
        if interrupted {
            warn!(completed_phases = reports.len(), "run interrupted, remaining phases skipped");
        }

        RunSummary {
            phases: reports,
            interrupted,
            elapsed: run_start.elapsed(),
            sink_error: self.sink_error.take(),
        }
    }

    /// Run rounds of `phase.concurrency` requests until the phase's time
    /// budget is used up. The deadline is only checked between rounds, so a
    /// phase may overrun by up to one round.
    pub async fn run_phase(&mut self, phase: &LoadPhase) -> PhaseReport {
        info!(
            phase = %phase.name,
            concurrency = phase.concurrency,
            duration_secs = phase.duration_secs,
            params = ?phase.params,
            "phase started"
        );

        let shared = Arc::new(phase.clone());
        let duration = phase.duration();
        let phase_start = Instant::now();
        let mut outcomes = Vec::new();
        let mut rounds_completed: u64 = 0;

        while phase_start.elapsed() < duration && !self.should_halt() {
            let first_sequence = rounds_completed * phase.concurrency as u64;
            let round = self.run_round(&shared, first_sequence).await;
            rounds_completed += 1;

            let ok = round.iter().filter(|o| o.success).count();
            let mean = round.iter().map(|o| o.response_time).sum::<f64>() / round.len().max(1) as f64;
            outcomes.extend(round);

            info!(
                phase = %phase.name,
                elapsed_secs = %format!("{:.1}", phase_start.elapsed().as_secs_f64()),
                requests = outcomes.len(),
                ok = %format!("{ok}/{}", phase.concurrency),
                mean_secs = %format!("{mean:.3}"),
                "round complete"
            );
        }

        let stats = PhaseStatistics::from_outcomes(&phase.name, &outcomes);
        if stats.succeeded == 0 {
            warn!(phase = %phase.name, total = stats.total, "no successful requests in phase");
        }

        PhaseReport {
            phase: phase.clone(),
            rounds_completed,
            elapsed: phase_start.elapsed(),
            stats,
            outcomes,
        }
    }

    /// Launch one request per user, append each outcome as it completes, and
    /// return once all of them have.
    async fn run_round(&mut self, phase: &Arc<LoadPhase>, first_sequence: u64) -> Vec<RequestOutcome> {
        let mut in_flight: FuturesUnordered<_> = (0..phase.concurrency)
            .map(|user_id| {
                let sequence = first_sequence + user_id as u64;
                let dispatcher = Arc::clone(&self.dispatcher);
                let task_phase = Arc::clone(phase);
                let handle = tokio::spawn(async move {
                    dispatcher.dispatch(&task_phase, user_id, sequence).await
                });
                async move { (user_id, sequence, handle.await) }
            })
            .collect();

        let mut round = Vec::with_capacity(phase.concurrency);
        while let Some((user_id, sequence, joined)) = in_flight.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                lost_task_outcome(&phase.name, user_id, sequence, &e.to_string())
            });
            self.record(&outcome);
            round.push(outcome);
        }
        round
    }

    fn record(&mut self, outcome: &RequestOutcome) {
        if self.sink_error.is_some() {
            return;
        }
        if let Err(e) = self.sink.append(outcome) {
            error!(error = %e, "result log write failed, stopping after this round");
            self.sink_error = Some(e);
        }
    }

    fn should_halt(&self) -> bool {
        self.stop.is_stopped() || self.sink_error.is_some()
    }

    pub fn sink(&self) -> &ResultSink<W> {
        &self.sink
    }

    pub fn into_sink(self) -> ResultSink<W> {
        self.sink
    }
}

/// Failed outcome for a request task that died before producing its own.
fn lost_task_outcome(phase: &str, user_id: usize, sequence: u64, reason: &str) -> RequestOutcome {
    let now = Utc::now();
    RequestOutcome {
        phase: phase.to_string(),
        user_id,
        sequence,
        started_at: now,
        completed_at: now,
        status: OutcomeStatus::Error,
        response_time: 0.0,
        server_time: None,
        response_bytes: 0,
        success: false,
        error: Some(truncate_error(&format!("request task failed: {reason}"))),
    }
}
