use chrono::SecondsFormat;
use loadwatch_common::{LoadWatchError, RequestOutcome, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Column order of the result log.
pub const RESULT_HEADER: [&str; 11] = [
    "timestamp",
    "phase",
    "user_id",
    "sequence",
    "status",
    "response_time",
    "server_time",
    "network_time",
    "response_bytes",
    "success",
    "error",
];

/// Append-only CSV log of request outcomes. Every row is flushed as soon as
/// it is written so an interrupted run loses nothing already recorded.
pub struct ResultSink<W: Write> {
    writer: csv::Writer<W>,
    written: u64,
}

impl ResultSink<File> {
    /// Create (truncating) the result log at `path` and write its header.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| LoadWatchError::ResultLog(format!("cannot open {}: {e}", path.display())))?;
        Self::new(file)
    }
}

impl<W: Write> ResultSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(RESULT_HEADER).map_err(csv_error)?;
        writer.flush().map_err(io_error)?;
        Ok(Self { writer, written: 0 })
    }

    pub fn append(&mut self, outcome: &RequestOutcome) -> Result<()> {
        self.writer.write_record(format_row(outcome)).map_err(csv_error)?;
        self.writer.flush().map_err(io_error)?;
        self.written += 1;
        Ok(())
    }

    /// Number of outcome rows written so far (header excluded).
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| LoadWatchError::ResultLog(e.to_string()))
    }
}

/// Render one outcome in [`RESULT_HEADER`] order. An unknown server time is
/// written as `0`; an unknown network time is left empty.
pub fn format_row(o: &RequestOutcome) -> [String; 11] {
    [
        o.completed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        o.phase.clone(),
        o.user_id.to_string(),
        o.sequence.to_string(),
        o.status.to_string(),
        format!("{:.6}", o.response_time),
        format!("{:.6}", o.server_time.unwrap_or(0.0)),
        o.network_time().map(|t| format!("{t:.6}")).unwrap_or_default(),
        o.response_bytes.to_string(),
        o.success.to_string(),
        o.error.clone().unwrap_or_default(),
    ]
}

fn csv_error(e: csv::Error) -> LoadWatchError {
    LoadWatchError::ResultLog(e.to_string())
}

fn io_error(e: std::io::Error) -> LoadWatchError {
    LoadWatchError::ResultLog(e.to_string())
}
