//! Record sinks - where completed execution records are exported

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Context;
use tracing::{debug, warn};

use super::error::TrackingError;
use crate::domain::JobExecutionRecord;

/// Destination for completed execution records
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: &JobExecutionRecord) -> Result<(), TrackingError>;
}

type SharedWriter = Arc<Mutex<Option<BufWriter<File>>>>;

/// Appends one JSON object per line to `<dir>/executions.jsonl`.
///
/// File IO runs on the blocking pool.
pub struct JsonlRecordSink {
    path: PathBuf,
    writer: SharedWriter,
}

impl JsonlRecordSink {
    pub const FILE_NAME: &'static str = "executions.jsonl";

    pub fn new(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(Self::FILE_NAME);
        debug!(?path, "JsonlRecordSink::new: called");
        Self {
            path,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(path: &Path, source: std::io::Error) -> TrackingError {
        TrackingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn open(path: &Path) -> Result<BufWriter<File>, TrackingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_error(path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Self::io_error(path, e))?;
        debug!(?path, "JsonlRecordSink: opened history file");
        Ok(BufWriter::new(file))
    }

    /// Blocking append of one encoded line
    fn append_line(path: &Path, writer: &Mutex<Option<BufWriter<File>>>, json: &str) -> Result<(), TrackingError> {
        let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(Self::open(path)?);
        }
        let Some(out) = guard.as_mut() else {
            return Err(TrackingError::Unavailable("writer not open".to_string()));
        };
        let result = writeln!(out, "{}", json).and_then(|_| out.flush());
        if let Err(e) = result {
            // Reopen on the next write
            *guard = None;
            return Err(Self::io_error(path, e));
        }
        Ok(())
    }

    /// Drop records that started before `cutoff`. Returns how many were removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> eyre::Result<usize> {
        debug!(%cutoff, "JsonlRecordSink::prune_before: called");
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
        }

        let records = read_records(&self.path)?;
        let before = records.len();
        let kept: Vec<_> = records.into_iter().filter(|r| r.started_at >= cutoff).collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp).context("Failed to create temporary history file")?);
            for record in &kept {
                writeln!(out, "{}", serde_json::to_string(record)?)?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, &self.path).context("Failed to replace history file")?;
        debug!(removed, kept = kept.len(), "JsonlRecordSink::prune_before: rewrote history");
        Ok(removed)
    }
}

#[async_trait]
impl RecordSink for JsonlRecordSink {
    async fn write(&self, record: &JobExecutionRecord) -> Result<(), TrackingError> {
        debug!(id = %record.id, job_name = %record.job_name, "JsonlRecordSink::write: called");
        let json = serde_json::to_string(record)?;
        let path = self.path.clone();
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || Self::append_line(&path, &writer, &json))
            .await
            .map_err(|e| TrackingError::Unavailable(format!("history writer task failed: {}", e)))?
    }
}

/// Read every record from a JSONL history file, skipping unparseable lines
pub fn read_records(path: impl AsRef<Path>) -> eyre::Result<Vec<JobExecutionRecord>> {
    let path = path.as_ref();
    debug!(?path, "read_records: reading history");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).context(format!("Failed to read history file: {}", path.display()))?;
    let mut records = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JobExecutionRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line, error = %e, "read_records: failed to parse line");
            }
        }
    }

    debug!(count = records.len(), "read_records: loaded records");
    Ok(records)
}
