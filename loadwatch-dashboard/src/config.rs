use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How often a snapshot is built and pushed to subscribers.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(2);

/// Values kept per history series.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Undelivered snapshots buffered per subscriber before new ones are skipped for it.
pub const SUBSCRIBER_BUFFER: usize = 8;

/// Interval between SSE keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub const CPU_LOG: &str = "cpu_metrics.csv";
pub const NET_LOG: &str = "net_metrics.csv";
pub const LATENCY_LOG: &str = "latency_metrics.csv";

/// Locations of the metric logs written by the OS-sampling collectors.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFiles {
    pub cpu: PathBuf,
    pub net: PathBuf,
    pub latency: PathBuf,
}

impl MetricFiles {
    /// The standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cpu: dir.join(CPU_LOG),
            net: dir.join(NET_LOG),
            latency: dir.join(LATENCY_LOG),
        }
    }
}

/// Dashboard configuration
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub address: SocketAddr,
    pub files: MetricFiles,
    pub update_interval: Duration,
    pub history_capacity: usize,
    pub subscriber_buffer: usize,
}

impl DashboardConfig {
    pub fn new(address: SocketAddr, metrics_dir: &Path) -> Self {
        Self {
            address,
            files: MetricFiles::in_dir(metrics_dir),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_buffer: SUBSCRIBER_BUFFER,
        }
    }
}
