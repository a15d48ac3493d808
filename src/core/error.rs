use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the import pipeline.
/// Every module returns `Result<T, PipelineError>`.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Sources / manifests ─────────────────────────────
    #[error("Cannot read modpack source {source_name}: {reason}")]
    UnreadableSource { source_name: String, reason: String },

    #[error("Unrecognized modpack format: {0}")]
    UnrecognizedFormat(String),

    // ── Archive ─────────────────────────────────────────
    #[error("Corrupt archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("Failed to write archive entry to {path:?}: {source}")]
    EntryWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Destination not writable {path:?}: {source}")]
    DestinationNotWritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Resume ──────────────────────────────────────────
    #[error("No incomplete install recorded for {0}")]
    ResumeTargetNotFound(String),

    #[error("Remote resource changed since {id} was interrupted: expected {expected} bytes, server reports {actual}")]
    StaleResumeTarget { id: String, expected: u64, actual: u64 },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Transfer {0} was cancelled")]
    Cancelled(String),

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-1 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha1Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Instance ────────────────────────────────────────
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(String),

    #[error("Instance {instance} ({instance_version} {instance_loader}) cannot host a {pack_version} {pack_loader} modpack")]
    IncompatibleTarget {
        instance: String,
        instance_version: String,
        instance_loader: String,
        pack_version: String,
        pack_loader: String,
    },

    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Transient failures the user may retry through `resume`.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Network { .. } | PipelineError::Http(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(source: std::io::Error) -> Self {
        PipelineError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for IPC consumers ─────────────────────
// Frontends receive the error as its display string.
impl serde::Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
