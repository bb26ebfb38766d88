use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters kept from an error description.
pub const MAX_ERROR_TEXT: usize = 100;

/// Default per-request timeout. Generously above the slowest expected
/// processing time so the target's own saturation shows up as latency.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Error types for LoadWatch operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadWatchError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Duplicate phase name: {0}")]
    DuplicatePhase(String),

    #[error("Result log error: {0}")]
    ResultLog(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}: {1}")]
    Http(u16, String),

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("Snapshot construction failed: {0}")]
    Snapshot(String),
}

/// JSON error envelope used for error payloads on HTTP and stream surfaces
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Result type for LoadWatch operations
pub type Result<T> = std::result::Result<T, LoadWatchError>;

/// Numeric workload parameters passed to the target as query parameters.
pub type WorkloadParams = BTreeMap<String, serde_json::Number>;

/// One time-boxed segment of a load run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadPhase {
    pub name: String,
    pub concurrency: usize,
    pub duration_secs: f64,
    #[serde(default)]
    pub params: WorkloadParams,
}

impl LoadPhase {
    pub fn new(name: impl Into<String>, concurrency: usize, duration_secs: f64) -> Self {
        Self {
            name: name.into(),
            concurrency,
            duration_secs,
            params: WorkloadParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Number>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Time budget of the phase. Non-finite or negative durations collapse to zero.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or_default()
    }

    /// Workload parameters rendered as query-string pairs, in key order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

/// Classification of how a request attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// A response arrived with this HTTP status code.
    Http(u16),
    Timeout,
    /// Connection failure or any other transport error.
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Http(code) => write!(f, "{code}"),
            OutcomeStatus::Timeout => f.write_str("TIMEOUT"),
            OutcomeStatus::Error => f.write_str("ERROR"),
        }
    }
}

/// The recorded result of one completed request attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub phase: String,
    pub user_id: usize,
    /// Position of the request within its phase, in launch order.
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: OutcomeStatus,
    /// Total client-observed round-trip time in seconds.
    pub response_time: f64,
    /// Processing time reported by the target, when it reported one.
    pub server_time: Option<f64>,
    pub response_bytes: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl RequestOutcome {
    /// `response_time - server_time`, or `None` when the server time is unknown or negative.
    pub fn network_time(&self) -> Option<f64> {
        self.server_time
            .filter(|s| *s >= 0.0)
            .map(|s| self.response_time - s)
    }
}

/// Truncate an error description to [`MAX_ERROR_TEXT`] characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_TEXT).collect()
}
