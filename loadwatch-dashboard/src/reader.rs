//! Tail reads of the collectors' metric logs.
//!
//! Every log is a comma-delimited file with one header row followed by
//! append-only data rows whose first column is an ISO-8601 timestamp. Reads
//! never fail: a missing, short or unreadable file yields `None`, and a
//! malformed numeric field reads as `0.0`.

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::MetricFiles;

const CPU_MIN_COLUMNS: usize = 8;
const NET_MIN_COLUMNS: usize = 3;
const LATENCY_MIN_COLUMNS: usize = 5;

/// Latest row of the CPU/memory log.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuSample {
    pub timestamp: String,
    pub user: f64,
    pub system: f64,
    pub iowait: f64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub mem_used_mb: f64,
    pub mem_free_mb: f64,
}

impl CpuSample {
    /// User plus system CPU percentage.
    pub fn total(&self) -> f64 {
        self.user + self.system
    }
}

/// One reading of a cumulative counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Per-second rate between two cumulative readings.
///
/// `None` when the timestamps do not strictly increase; the result is never
/// infinite or NaN.
pub fn derived_rate(prev: &CounterSample, last: &CounterSample) -> Option<f64> {
    let dt = (last.at - prev.at).num_microseconds()? as f64 / 1_000_000.0;
    if dt <= 0.0 {
        return None;
    }
    Some((last.value - prev.value) / dt).filter(|r| r.is_finite())
}

/// Receive/transmit rates derived from the last two rows of the network log.
#[derive(Debug, Clone, PartialEq)]
pub struct NetRates {
    pub timestamp: String,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub rx_total_bytes: f64,
    pub tx_total_bytes: f64,
}

/// Latest row of the probe latency log. Times are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub timestamp: String,
    pub time_connect: f64,
    pub time_start_transfer: f64,
    pub time_total: f64,
    pub http_code: String,
}

/// Latest reading of every source; `None` where a source has no data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricReadings {
    pub cpu: Option<CpuSample>,
    pub net: Option<NetRates>,
    pub latency: Option<LatencySample>,
}

/// Stateless reader over the configured logs. Each call re-reads the file
/// from scratch; no handles are kept between calls.
#[derive(Debug, Clone)]
pub struct MetricSourceReader {
    files: MetricFiles,
}

impl MetricSourceReader {
    pub fn new(files: MetricFiles) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &MetricFiles {
        &self.files
    }

    pub fn read_all(&self) -> MetricReadings {
        MetricReadings {
            cpu: self.read_cpu(),
            net: self.read_net(),
            latency: self.read_latency(),
        }
    }

    /// Columns: timestamp, user, system, iowait, load1, load5, load15, mem_used, [mem_free].
    pub fn read_cpu(&self) -> Option<CpuSample> {
        let last = tail_rows(&self.files.cpu, 1)?.pop_back()?;
        if last.len() < CPU_MIN_COLUMNS {
            return None;
        }
        Some(CpuSample {
            timestamp: last[0].to_string(),
            user: numeric(&last, 1),
            system: numeric(&last, 2),
            iowait: numeric(&last, 3),
            load1: numeric(&last, 4),
            load5: numeric(&last, 5),
            load15: numeric(&last, 6),
            mem_used_mb: numeric(&last, 7),
            mem_free_mb: numeric(&last, 8),
        })
    }

    /// Columns: timestamp, rx_bytes, tx_bytes (cumulative). Needs two data rows.
    pub fn read_net(&self) -> Option<NetRates> {
        let mut rows = tail_rows(&self.files.net, 2)?;
        if rows.len() < 2 {
            return None;
        }
        let last = rows.pop_back()?;
        let prev = rows.pop_back()?;
        if prev.len() < NET_MIN_COLUMNS || last.len() < NET_MIN_COLUMNS {
            return None;
        }

        let prev_at = parse_timestamp(&prev[0])?;
        let last_at = parse_timestamp(&last[0])?;
        let counter = |row: &StringRecord, at, idx| CounterSample { at, value: numeric(row, idx) };

        let rx = derived_rate(&counter(&prev, prev_at, 1), &counter(&last, last_at, 1))?;
        let tx = derived_rate(&counter(&prev, prev_at, 2), &counter(&last, last_at, 2))?;

        Some(NetRates {
            timestamp: last[0].to_string(),
            rx_bytes_per_sec: rx,
            tx_bytes_per_sec: tx,
            rx_total_bytes: numeric(&last, 1),
            tx_total_bytes: numeric(&last, 2),
        })
    }

    /// Columns: timestamp, time_connect, time_starttransfer, time_total, http_code.
    pub fn read_latency(&self) -> Option<LatencySample> {
        let last = tail_rows(&self.files.latency, 1)?.pop_back()?;
        if last.len() < LATENCY_MIN_COLUMNS {
            return None;
        }
        Some(LatencySample {
            timestamp: last[0].to_string(),
            time_connect: numeric(&last, 1),
            time_start_transfer: numeric(&last, 2),
            time_total: numeric(&last, 3),
            http_code: last[4].to_string(),
        })
    }
}

/// The last `keep` data rows of `path`, header excluded. `None` when the
/// file is missing, unreadable, or has no data rows.
fn tail_rows(path: &Path, keep: usize) -> Option<VecDeque<StringRecord>> {
    let mut reader = match ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
    {
        Ok(reader) => reader,
        Err(e) => {
            match e.kind() {
                csv::ErrorKind::Io(io) if io.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "metric log not found");
                }
                _ => warn!(path = %path.display(), error = %e, "cannot read metric log"),
            }
            return None;
        }
    };

    let mut tail = VecDeque::with_capacity(keep + 1);
    for record in reader.records() {
        // Rows that are not valid UTF-8 are skipped rather than ending the read.
        let Ok(record) = record else { continue };
        if record.iter().all(str::is_empty) {
            continue;
        }
        tail.push_back(record);
        if tail.len() > keep {
            tail.pop_front();
        }
    }

    if tail.is_empty() {
        None
    } else {
        Some(tail)
    }
}

/// Field `idx` as a number; absent, empty or malformed fields read as `0.0`.
fn numeric(record: &StringRecord, idx: usize) -> f64 {
    record
        .get(idx)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
