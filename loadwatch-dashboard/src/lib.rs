use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::stream::{self, Stream};
use loadwatch_common::ErrorResponse;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

pub mod config;
pub mod history;
pub mod publisher;
pub mod reader;
pub mod snapshot;

use config::{DashboardConfig, KEEP_ALIVE_INTERVAL};
use publisher::{LatestSnapshot, SnapshotPublisher, SubscriberRegistry};
use reader::MetricSourceReader;
use snapshot::{MetricsCollector, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub latest: LatestSnapshot,
}

impl AppState {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::new(subscriber_buffer)),
            latest: LatestSnapshot::default(),
        }
    }
}

/// Metrics dashboard: one publisher task plus the HTTP surface.
pub struct Server {
    config: DashboardConfig,
}

impl Server {
    pub fn new(config: DashboardConfig) -> Self {
        Self { config }
    }

    /// Get the server's configured address
    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/api/stream", get(handle_stream))
            .route("/api/metrics", get(handle_metrics))
            .route("/health", get(handle_health))
            .with_state(state)
    }

    /// Run the server, signalling `ready_tx` with the bound address once accepting connections
    pub async fn run(
        self,
        ready_tx: tokio::sync::oneshot::Sender<SocketAddr>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let state = AppState::new(self.config.subscriber_buffer);
        let collector = MetricsCollector::new(
            MetricSourceReader::new(self.config.files.clone()),
            self.config.history_capacity,
        );
        let publisher = SnapshotPublisher::new(
            collector,
            Arc::new(SystemClock),
            Arc::clone(&state.registry),
            state.latest.clone(),
        );
        let ticker = tokio::spawn(publisher.run(self.config.update_interval));

        let app = Self::create_router(state);
        let listener = tokio::net::TcpListener::bind(self.config.address).await?;
        let local_addr = listener.local_addr()?;
        info!(
            address = %local_addr,
            interval_secs = self.config.update_interval.as_secs_f64(),
            "dashboard listening"
        );
        ready_tx.send(local_addr).ok();

        let served = axum::serve(listener, app).await;
        ticker.abort();
        served?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

/// Handler for GET /api/stream: one SSE event per published snapshot, starting
/// with the next tick. The server never ends the stream.
pub async fn handle_stream(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.registry.subscribe();
    debug!(subscribers = state.registry.len(), "subscriber connected");

    let stream = stream::unfold(rx, |mut rx| async move {
        let payload = rx.recv().await?;
        Some((Ok::<_, Infallible>(Event::default().data(&*payload)), rx))
    });

    // Stops reverse proxies from buffering the event stream.
    ([(HeaderName::from_static("x-accel-buffering"), "no")], event_stream(stream))
}

fn event_stream<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}

/// Handler for GET /api/metrics: the last published snapshot, or 503 before the first tick.
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    match state.latest.get() {
        Some(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            payload.to_string(),
        )
            .into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "No snapshot published yet"),
    }
}

/// Handler for GET /health
pub async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "dashboard" }))
}
