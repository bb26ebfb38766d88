use chrono::{DateTime, TimeZone, Utc};
use loadwatch_common::{LoadWatchError, Result};
use loadwatch_dashboard::config::MetricFiles;
use loadwatch_dashboard::history::MetricHistory;
use loadwatch_dashboard::publisher::{Delivery, LatestSnapshot, SnapshotPublisher, SubscriberRegistry};
use loadwatch_dashboard::reader::{MetricReadings, MetricSourceReader};
use loadwatch_dashboard::snapshot::{Clock, MetricsCollector, Snapshot, SnapshotSource};
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::error::TryRecvError;

// --- Test helpers ---

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()))
}

/// Emits empty snapshots, or fails every call when `failing`.
struct StubSource {
    failing: bool,
}

impl SnapshotSource for StubSource {
    fn snapshot(&mut self, now: DateTime<Utc>) -> Result<Snapshot> {
        if self.failing {
            return Err(LoadWatchError::Snapshot("history unavailable".to_string()));
        }
        Ok(Snapshot::from_readings(now, &MetricReadings::default(), &MetricHistory::new(4)))
    }
}

fn publisher(
    failing: bool,
    buffer: usize,
) -> (SnapshotPublisher<StubSource>, Arc<SubscriberRegistry>, LatestSnapshot) {
    let registry = Arc::new(SubscriberRegistry::new(buffer));
    let latest = LatestSnapshot::default();
    let publisher = SnapshotPublisher::new(
        StubSource { failing },
        clock(),
        Arc::clone(&registry),
        latest.clone(),
    );
    (publisher, registry, latest)
}

fn parse(payload: &str) -> Value {
    serde_json::from_str(payload).unwrap()
}

// --- Fan-out ---

#[tokio::test]
async fn test_closed_subscriber_dropped_others_unaffected() {
    let (mut publisher, registry, _) = publisher(false, 4);
    let mut alive = registry.subscribe();
    let gone = registry.subscribe();
    drop(gone);

    let delivery = publisher.tick();

    assert_eq!(delivery, Delivery { delivered: 1, lagged: 0, dropped: 1 });
    assert_eq!(registry.len(), 1);
    let payload = alive.try_recv().unwrap();
    assert_eq!(parse(&payload)["timestamp"], "2024-05-01T10:00:00.000000Z");
}

#[tokio::test]
async fn test_every_subscriber_gets_the_same_payload() {
    let (mut publisher, registry, _) = publisher(false, 4);
    let mut a = registry.subscribe();
    let mut b = registry.subscribe();

    publisher.tick();

    let pa = a.try_recv().unwrap();
    let pb = b.try_recv().unwrap();
    assert!(Arc::ptr_eq(&pa, &pb));
}

#[tokio::test]
async fn test_new_subscriber_gets_no_replay() {
    let (mut publisher, registry, _) = publisher(false, 4);
    publisher.tick();

    let mut late = registry.subscribe();
    assert_eq!(late.try_recv().unwrap_err(), TryRecvError::Empty);

    publisher.tick();
    assert!(late.try_recv().is_ok());
    assert_eq!(late.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[tokio::test]
async fn test_slow_subscriber_misses_snapshot_but_stays_registered() {
    let (mut publisher, registry, _) = publisher(false, 1);
    let mut slow = registry.subscribe();

    assert_eq!(publisher.tick().delivered, 1);
    let second = publisher.tick();
    assert_eq!(second, Delivery { delivered: 0, lagged: 1, dropped: 0 });
    assert_eq!(registry.len(), 1);

    slow.try_recv().unwrap();
    assert_eq!(slow.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(publisher.tick().delivered, 1);
}

#[tokio::test]
async fn test_failed_construction_emits_error_payload() {
    let (mut publisher, registry, latest) = publisher(true, 4);
    let mut rx = registry.subscribe();

    publisher.tick();

    let payload = parse(&rx.try_recv().unwrap());
    assert_eq!(payload, serde_json::json!({ "error": "Snapshot construction failed: history unavailable" }));
    assert!(latest.get().is_none());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_latest_tracks_last_published_snapshot() {
    let (mut publisher, _registry, latest) = publisher(false, 4);
    assert!(latest.get().is_none());
    publisher.tick();
    let payload = latest.get().unwrap();
    assert_eq!(parse(&payload)["cpu"], Value::Null);
}

#[tokio::test]
async fn test_run_publishes_on_each_tick() {
    let (publisher, registry, _) = publisher(false, 4);
    let mut rx = registry.subscribe();
    let task = tokio::spawn(publisher.run(Duration::from_millis(20)));

    for _ in 0..2 {
        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no snapshot within timeout")
            .unwrap();
        assert!(parse(&payload).get("history").is_some());
    }
    task.abort();
}

// --- Collector ---

#[test]
fn test_collector_merges_sources_and_grows_history() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("cpu_metrics.csv"),
        "timestamp,cpu_user,cpu_system,cpu_iowait,load1,load5,load15,mem_used,mem_free\n\
         2024-05-01T10:00:00,20.25,10.5,1.0,2.5,2.0,1.5,3000,1000\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("latency_metrics.csv"),
        "timestamp,time_connect,time_starttransfer,time_total,http_code\n\
         2024-05-01T10:00:00,0.001,0.2,0.25,200\n",
    )
    .unwrap();

    let mut collector = MetricsCollector::new(MetricSourceReader::new(MetricFiles::in_dir(dir.path())), 10);
    let now = clock().now();
    collector.snapshot(now).unwrap();
    let snapshot = collector.snapshot(now).unwrap();

    let cpu = snapshot.cpu.as_ref().unwrap();
    assert_eq!(cpu.total, 30.8);
    assert_eq!(cpu.user, 20.25);
    let memory = snapshot.memory.as_ref().unwrap();
    assert_eq!(memory.total_mb, 4000.0);
    assert_eq!(memory.percent, 75.0);
    assert_eq!(snapshot.load.as_ref().unwrap().load5, 2.0);
    assert!(snapshot.network.is_none());
    let latency = snapshot.latency.as_ref().unwrap();
    assert_eq!(latency.total_ms, 250.0);
    assert_eq!(latency.http_code, "200");

    assert_eq!(snapshot.history.cpu.contents(), vec![30.75, 30.75]);
    assert_eq!(snapshot.history.memory.contents(), vec![3000.0, 3000.0]);
    assert_eq!(snapshot.history.latency.len(), 2);
    assert!(snapshot.history.net_rx.is_empty());

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["network"], Value::Null);
    assert_eq!(json["history"]["load"], serde_json::json!([2.5, 2.5]));
}

#[test]
fn test_collector_with_no_logs_yields_null_categories() {
    let dir = TempDir::new().unwrap();
    let mut collector = MetricsCollector::new(MetricSourceReader::new(MetricFiles::in_dir(dir.path())), 10);
    let snapshot = collector.snapshot(clock().now()).unwrap();

    let json = serde_json::to_value(&snapshot).unwrap();
    for category in ["cpu", "memory", "load", "network", "latency"] {
        assert_eq!(json[category], Value::Null, "{category}");
    }
    assert!(collector.history().cpu.is_empty());
}
