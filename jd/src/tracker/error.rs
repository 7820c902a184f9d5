//! Tracking errors

use std::path::PathBuf;

use thiserror::Error;

/// The execution-record sink could not be written.
///
/// Logged by the tracker and never escalated to the job.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("failed to write execution record to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode execution record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record sink unavailable: {0}")]
    Unavailable(String),
}
