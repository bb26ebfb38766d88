use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use loadwatch_client::{RequestExecutor, TargetConfig};
use loadwatch_common::{ErrorResponse, LoadPhase, OutcomeStatus};
use loadwatch_dashboard::config::DashboardConfig;
use loadwatch_dashboard::Server;
use loadwatch_load::probe::run_probe;
use loadwatch_load::scheduler::{PhaseScheduler, StopFlag};
use loadwatch_load::sink::ResultSink;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::time::timeout;

const SERVER_READY_TIMEOUT: Duration = Duration::from_secs(60);

// --- Fake stressed endpoint ---

/// Work units above which the fake target answers 503.
const OVERLOAD_ITERATIONS: u64 = 1_000;

#[derive(Clone, Default)]
struct TargetState {
    hits: Arc<AtomicU64>,
}

async fn handle_stress(
    State(state): State<TargetState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let iterations: u64 = params
        .get("cpu_iterations")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if iterations > OVERLOAD_ITERATIONS {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse { error: "overloaded".to_string() }),
        )
            .into_response();
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    (
        [("X-Server-Time", "0.004")],
        Json(serde_json::json!({ "status": "ok", "cpu_iterations": iterations })),
    )
        .into_response()
}

async fn start_target() -> (String, TargetState) {
    let state = TargetState::default();
    let app = Router::new()
        .route("/stress", get(handle_stress))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("target failed");
    });
    (format!("http://{}", addr), state)
}

async fn start_dashboard(metrics_dir: &Path) -> SocketAddr {
    let (ready_tx, ready_rx) = oneshot::channel();

    let mut config = DashboardConfig::new("127.0.0.1:0".parse().unwrap(), metrics_dir);
    config.update_interval = Duration::from_millis(50);
    let server = Server::new(config);

    tokio::spawn(async move {
        server.run(ready_tx).await.expect("dashboard failed");
    });

    timeout(SERVER_READY_TIMEOUT, ready_rx)
        .await
        .expect("dashboard did not start within 60 seconds")
        .expect("dashboard ready signal dropped")
}

fn write_cpu_log(dir: &Path) {
    std::fs::write(
        dir.join("cpu_metrics.csv"),
        "timestamp,cpu_user,cpu_system,cpu_iowait,load1,load5,load15,mem_used,mem_free\n\
         2024-05-01T10:00:00,40.0,10.0,0.5,3.0,2.0,1.0,6144,2048\n",
    )
    .unwrap();
}

/// Read from an SSE response until one complete `data:` event has arrived.
async fn next_event(response: &mut reqwest::Response, buffer: &mut String) -> Value {
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let event: String = buffer.drain(..end + 2).collect();
            if let Some(data) = event.lines().find_map(|l| l.strip_prefix("data:")) {
                return serde_json::from_str(data.trim()).unwrap();
            }
            continue;
        }
        let chunk = response.chunk().await.unwrap().expect("stream ended");
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());
    }
}

// --- Load generation ---

#[tokio::test]
async fn test_phased_run_against_live_target() {
    let (base_url, target) = start_target().await;
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("results.csv");

    let executor = Arc::new(RequestExecutor::new(TargetConfig::new(&base_url)));
    let sink = ResultSink::create(&log_path).unwrap();
    let mut scheduler = PhaseScheduler::new(executor, sink, StopFlag::new());

    let phases = [
        LoadPhase::new("Light", 3, 0.1).with_param("cpu_iterations", 10),
        LoadPhase::new("Overload", 2, 0.05).with_param("cpu_iterations", 5_000),
    ];
    let summary = scheduler.run(&phases).await;

    assert!(!summary.interrupted);
    assert!(summary.sink_error.is_none());
    assert_eq!(summary.phases.len(), 2);

    let light = &summary.phases[0];
    assert_eq!(light.stats.failed, 0);
    assert_eq!(light.stats.total, light.rounds_completed * 3);
    assert!(light.stats.latency.is_some());
    for outcome in &light.outcomes {
        assert_eq!(outcome.status, OutcomeStatus::Http(200));
        assert_eq!(outcome.server_time, Some(0.004));
        assert!(outcome.response_bytes > 0);
    }

    let overload = &summary.phases[1];
    assert_eq!(overload.stats.succeeded, 0);
    assert!(overload.stats.latency.is_none());
    let failed = &overload.outcomes[0];
    assert_eq!(failed.status, OutcomeStatus::Http(503));
    assert_eq!(failed.error.as_deref(), Some("HTTP 503: overloaded"));

    let global = summary.global_statistics();
    assert_eq!(global.total, target.hits.load(Ordering::SeqCst));

    let mut reader = csv::Reader::from_path(&log_path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len() as u64, global.total);
    assert_eq!(&rows[0][1], "Light");
    assert_eq!(&rows[rows.len() - 1][4], "503");
    assert_eq!(&rows[rows.len() - 1][9], "false");
}

#[tokio::test]
async fn test_probe_against_live_target() {
    let (base_url, target) = start_target().await;
    let dir = TempDir::new().unwrap();
    let mut sink = ResultSink::create(&dir.path().join("probe.csv")).unwrap();

    let executor = RequestExecutor::new(TargetConfig::new(&base_url));
    let phase = LoadPhase::new("probe", 1, 0.0).with_param("cpu_iterations", 1);
    let summary = run_probe(&executor, &phase, &mut sink, Duration::from_millis(10), Some(3), &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.requests, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(sink.written(), 3);
    assert_eq!(target.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unreachable_target_records_failures_without_aborting() {
    // Bind then drop to get a port nothing listens on.
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let mut config = TargetConfig::new(format!("http://{}", addr));
    config.timeout_secs = 2.0;

    let mut scheduler = PhaseScheduler::new(
        Arc::new(RequestExecutor::new(config)),
        ResultSink::new(Vec::new()).unwrap(),
        StopFlag::new(),
    );
    let summary = scheduler.run(&[LoadPhase::new("down", 2, 0.05)]).await;

    let report = &summary.phases[0];
    assert!(report.rounds_completed >= 1);
    assert_eq!(report.stats.succeeded, 0);
    assert!(report.outcomes.iter().all(|o| o.status == OutcomeStatus::Error));
}

// --- Dashboard ---

#[tokio::test]
async fn test_dashboard_health() {
    let dir = TempDir::new().unwrap();
    let addr = start_dashboard(dir.path()).await;

    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!({ "status": "ok", "service": "dashboard" }));
}

#[tokio::test]
async fn test_dashboard_streams_snapshots() {
    let dir = TempDir::new().unwrap();
    write_cpu_log(dir.path());
    let addr = start_dashboard(dir.path()).await;

    let mut response = reqwest::get(format!("http://{}/api/stream", addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let mut buffer = String::new();
    let first = timeout(Duration::from_secs(5), next_event(&mut response, &mut buffer))
        .await
        .expect("no snapshot streamed");
    assert_eq!(first["cpu"]["total"], 50.0);
    assert_eq!(first["memory"]["percent"], 75.0);
    assert_eq!(first["load"]["load1"], 3.0);
    assert_eq!(first["network"], Value::Null);
    assert_eq!(first["latency"], Value::Null);

    let second = timeout(Duration::from_secs(5), next_event(&mut response, &mut buffer))
        .await
        .expect("stream stalled after first snapshot");
    let first_len = first["history"]["cpu"].as_array().unwrap().len();
    let second_len = second["history"]["cpu"].as_array().unwrap().len();
    assert!(second_len > first_len);
}

#[tokio::test]
async fn test_dashboard_rest_snapshot_after_first_tick() {
    let dir = TempDir::new().unwrap();
    write_cpu_log(dir.path());
    let addr = start_dashboard(dir.path()).await;
    let url = format!("http://{}/api/metrics", addr);

    let body = timeout(Duration::from_secs(5), async {
        loop {
            let response = reqwest::get(&url).await.unwrap();
            if response.status() == reqwest::StatusCode::OK {
                return response.json::<Value>().await.unwrap();
            }
            assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no snapshot published");

    assert_eq!(body["cpu"]["user"], 40.0);
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}
