use chrono::{DateTime, SecondsFormat, Utc};
use loadwatch_common::Result;
use serde::Serialize;

use crate::history::MetricHistory;
use crate::reader::{CpuSample, LatencySample, MetricReadings, MetricSourceReader, NetRates};

/// Abstraction over current time for testability.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuView {
    pub total: f64,
    pub user: f64,
    pub system: f64,
    pub iowait: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryView {
    pub used_mb: f64,
    pub free_mb: f64,
    pub total_mb: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadView {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkView {
    pub rx_kbs: f64,
    pub tx_kbs: f64,
    pub rx_total_mb: f64,
    pub tx_total_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyView {
    pub total_ms: f64,
    pub http_code: String,
}

/// One point-in-time aggregate of the latest value per category.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub cpu: Option<CpuView>,
    pub memory: Option<MemoryView>,
    pub load: Option<LoadView>,
    pub network: Option<NetworkView>,
    pub latency: Option<LatencyView>,
    pub history: MetricHistory,
}

impl Snapshot {
    /// Build from one round of readings. `history` must already include them.
    pub fn from_readings(now: DateTime<Utc>, readings: &MetricReadings, history: &MetricHistory) -> Self {
        Self {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            cpu: readings.cpu.as_ref().map(cpu_view),
            memory: readings.cpu.as_ref().map(memory_view),
            load: readings.cpu.as_ref().map(|c| LoadView {
                load1: c.load1,
                load5: c.load5,
                load15: c.load15,
            }),
            network: readings.net.as_ref().map(network_view),
            latency: readings.latency.as_ref().map(latency_view),
            history: history.clone(),
        }
    }
}

fn cpu_view(c: &CpuSample) -> CpuView {
    CpuView { total: round_to(c.total(), 1), user: c.user, system: c.system, iowait: c.iowait }
}

fn memory_view(c: &CpuSample) -> MemoryView {
    let total = c.mem_used_mb + c.mem_free_mb;
    let percent = if total > 0.0 { c.mem_used_mb / total * 100.0 } else { 0.0 };
    MemoryView {
        used_mb: round_to(c.mem_used_mb, 1),
        free_mb: round_to(c.mem_free_mb, 1),
        total_mb: round_to(total, 1),
        percent: round_to(percent, 1),
    }
}

fn network_view(n: &NetRates) -> NetworkView {
    NetworkView {
        rx_kbs: round_to(n.rx_bytes_per_sec / 1024.0, 2),
        tx_kbs: round_to(n.tx_bytes_per_sec / 1024.0, 2),
        rx_total_mb: round_to(n.rx_total_bytes / (1024.0 * 1024.0), 2),
        tx_total_mb: round_to(n.tx_total_bytes / (1024.0 * 1024.0), 2),
    }
}

fn latency_view(l: &LatencySample) -> LatencyView {
    LatencyView { total_ms: round_to(l.time_total * 1000.0, 2), http_code: l.http_code.clone() }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Anything that can produce the next snapshot. Called once per tick by a
/// single task, so implementations may keep mutable state.
pub trait SnapshotSource: Send + 'static {
    fn snapshot(&mut self, now: DateTime<Utc>) -> Result<Snapshot>;
}

/// Reads every metric log and folds the readings into the running history.
pub struct MetricsCollector {
    reader: MetricSourceReader,
    history: MetricHistory,
}

impl MetricsCollector {
    pub fn new(reader: MetricSourceReader, history_capacity: usize) -> Self {
        Self { reader, history: MetricHistory::new(history_capacity) }
    }

    pub fn history(&self) -> &MetricHistory {
        &self.history
    }

    /// Append the series of every source that had data this round.
    fn record(&mut self, readings: &MetricReadings) {
        if let Some(cpu) = &readings.cpu {
            self.history.cpu.append(cpu.total());
            self.history.memory.append(cpu.mem_used_mb);
            self.history.load.append(cpu.load1);
        }
        if let Some(net) = &readings.net {
            self.history.net_rx.append(round_to(net.rx_bytes_per_sec / 1024.0, 2));
            self.history.net_tx.append(round_to(net.tx_bytes_per_sec / 1024.0, 2));
        }
        if let Some(latency) = &readings.latency {
            self.history.latency.append(latency.time_total * 1000.0);
        }
    }
}

impl SnapshotSource for MetricsCollector {
    fn snapshot(&mut self, now: DateTime<Utc>) -> Result<Snapshot> {
        let readings = self.reader.read_all();
        self.record(&readings);
        Ok(Snapshot::from_readings(now, &readings, &self.history))
    }
}
