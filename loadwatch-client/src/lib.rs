use chrono::Utc;
use loadwatch_common::{
    truncate_error, ErrorResponse, LoadPhase, LoadWatchError, OutcomeStatus, RequestOutcome,
    Result, DEFAULT_REQUEST_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Where the target reports how long it spent processing a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ServerTimeSource {
    /// A response header carrying seconds as a decimal number.
    Header(String),
    /// A numeric top-level field of a JSON response body.
    BodyField(String),
    /// The target does not report processing time.
    None,
}

impl Default for ServerTimeSource {
    fn default() -> Self {
        ServerTimeSource::Header("X-Server-Time".to_string())
    }
}

/// Target endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Scheme, host and port, e.g. `http://localhost:5000`.
    pub base_url: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default)]
    pub server_time: ServerTimeSource,
}

fn default_endpoint() -> String {
    "/stress".to_string()
}

fn default_timeout_secs() -> f64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs_f64()
}

impl TargetConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            server_time: ServerTimeSource::default(),
        }
    }

    /// Full URL of the stressed endpoint (without query string).
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoint)
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

/// What a successful attempt observed before it was turned into an outcome.
struct Received {
    status: u16,
    server_time: Option<f64>,
    bytes: u64,
}

/// A failed attempt: how it is classified plus the underlying error.
struct Failed {
    status: OutcomeStatus,
    error: LoadWatchError,
}

/// Issues single bounded-timeout requests against the target.
///
/// [`RequestExecutor::execute`] never returns an error: every failure mode is
/// folded into a failed [`RequestOutcome`].
#[derive(Clone)]
pub struct RequestExecutor {
    pub config: TargetConfig,
    http_client: reqwest::Client,
}

impl RequestExecutor {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Issue one GET with `phase`'s workload parameters and record its outcome.
    pub async fn execute(&self, phase: &LoadPhase, user_id: usize, sequence: u64) -> RequestOutcome {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = self.attempt(phase).await;
        let response_time = start.elapsed().as_secs_f64();
        let completed_at = Utc::now();

        match result {
            Ok(received) => RequestOutcome {
                phase: phase.name.clone(),
                user_id,
                sequence,
                started_at,
                completed_at,
                status: OutcomeStatus::Http(received.status),
                response_time,
                server_time: received.server_time,
                response_bytes: received.bytes,
                success: true,
                error: None,
            },
            Err(failed) => {
                debug!(phase = %phase.name, user_id, sequence, error = %failed.error, "request failed");
                RequestOutcome {
                    phase: phase.name.clone(),
                    user_id,
                    sequence,
                    started_at,
                    completed_at,
                    status: failed.status,
                    response_time,
                    server_time: None,
                    response_bytes: 0,
                    success: false,
                    error: Some(truncate_error(&failed.error.to_string())),
                }
            }
        }
    }

    async fn attempt(&self, phase: &LoadPhase) -> std::result::Result<Received, Failed> {
        let timeout = self.config.timeout();

        let response = self
            .http_client
            .get(self.config.url())
            .query(&phase.query_pairs())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_failure(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failed {
                status: OutcomeStatus::Http(status.as_u16()),
                error: parse_error_response(status, response).await,
            });
        }

        let header_time = match &self.config.server_time {
            ServerTimeSource::Header(name) => parse_header_seconds(&response, name),
            _ => None,
        };

        // Drain the whole body even when its content is unused, so response
        // time covers the full transfer.
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_failure(e, timeout))?;

        let server_time = match &self.config.server_time {
            ServerTimeSource::Header(_) => header_time,
            ServerTimeSource::BodyField(field) => {
                parse_body_seconds(&body, field).map_err(|error| Failed {
                    status: OutcomeStatus::Http(status.as_u16()),
                    error,
                })?
            }
            ServerTimeSource::None => None,
        };

        Ok(Received {
            status: status.as_u16(),
            server_time,
            bytes: body.len() as u64,
        })
    }
}

fn transport_failure(e: reqwest::Error, timeout: Duration) -> Failed {
    if e.is_timeout() {
        Failed {
            status: OutcomeStatus::Timeout,
            error: LoadWatchError::Timeout(timeout),
        }
    } else {
        Failed {
            status: OutcomeStatus::Error,
            error: LoadWatchError::Network(e.to_string()),
        }
    }
}

/// Parse a header as seconds; returns `None` if absent or unparseable.
fn parse_header_seconds(response: &reqwest::Response, name: &str) -> Option<f64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Read `field` from a JSON body. A body that is not JSON is an error; a
/// missing or non-numeric field is not.
pub fn parse_body_seconds(body: &[u8], field: &str) -> Result<Option<f64>> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| LoadWatchError::MalformedBody(e.to_string()))?;
    Ok(value
        .get(field)
        .and_then(serde_json::Value::as_f64)
        .filter(|v| v.is_finite()))
}

async fn parse_error_response(status: reqwest::StatusCode, response: reqwest::Response) -> LoadWatchError {
    let error_msg = response
        .json::<ErrorResponse>()
        .await
        .map(|r| r.error)
        .unwrap_or_else(|_| format!("Server returned status: {}", status));

    LoadWatchError::Http(status.as_u16(), error_msg)
}
