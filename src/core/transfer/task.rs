use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::instance::{InstalledModpack, LoaderType};
use crate::core::progress::ProgressState;
use super::record::InstallTarget;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TransferState {
    /// Completed, errored and cancelled tasks never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Error | TransferState::Cancelled
        )
    }

    pub fn progress_state(&self) -> ProgressState {
        match self {
            TransferState::Pending | TransferState::Paused => ProgressState::Pending,
            TransferState::Downloading => ProgressState::InProgress,
            TransferState::Completed => ProgressState::Completed,
            TransferState::Error => ProgressState::Error,
            TransferState::Cancelled => ProgressState::Cancelled,
        }
    }
}

/// Snapshot of one download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: String,
    pub source_url: String,
    pub destination: PathBuf,
    pub state: TransferState,
    pub downloaded_bytes: u64,
    /// 0 while unknown.
    pub total_bytes: u64,
    /// Bytes per second over the recent window.
    pub speed: f64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TransferTask {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>, destination: PathBuf) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            destination,
            state: TransferState::Pending,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed: 0.0,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    /// 0..1, or 0 while the size is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }
}

/// Instance the downloaded archive is destined for, kept with the resume record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallContext {
    pub instance_id: Option<String>,
    pub instance_name: String,
    pub instance_path: PathBuf,
    pub loader: LoaderType,
    pub mc_version: String,
    #[serde(default)]
    pub loader_version: Option<String>,
    #[serde(default)]
    pub modpack: Option<InstalledModpack>,
    #[serde(default)]
    pub target: InstallTarget,
}

/// Everything needed to start a download.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub id: String,
    pub url: String,
    pub destination: PathBuf,
    /// Expected SHA-1 of the finished file, lowercase hex.
    pub sha1: Option<String>,
    /// When set, the resume record also covers the install step.
    pub install: Option<InstallContext>,
}

impl TransferRequest {
    pub fn new(id: impl Into<String>, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            destination: destination.into(),
            sha1: None,
            install: None,
        }
    }

    pub fn with_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.sha1 = Some(sha1.into().to_ascii_lowercase());
        self
    }

    pub fn with_install(mut self, install: InstallContext) -> Self {
        self.install = Some(install);
        self
    }
}

/// Notification published to transfer subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        item_id: String,
        downloaded_bytes: u64,
        total_bytes: u64,
        speed: f64,
    },
    #[serde(rename_all = "camelCase")]
    Complete { item_id: String, path: PathBuf },
    #[serde(rename_all = "camelCase")]
    Error { item_id: String, message: String },
}

impl TransferEvent {
    pub fn item_id(&self) -> &str {
        match self {
            TransferEvent::Progress { item_id, .. }
            | TransferEvent::Complete { item_id, .. }
            | TransferEvent::Error { item_id, .. } => item_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_zero_while_size_unknown() {
        let mut task = TransferTask::new("a", "https://x/y.zip", PathBuf::from("/tmp/y.zip"));
        task.downloaded_bytes = 500;
        assert_eq!(task.fraction(), 0.0);
        task.total_bytes = 1000;
        assert!((task.fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn paused_is_not_terminal() {
        assert!(!TransferState::Paused.is_terminal());
        assert_eq!(TransferState::Paused.progress_state(), ProgressState::Pending);
        assert!(TransferState::Cancelled.is_terminal());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = TransferEvent::Progress {
            item_id: "a".into(),
            downloaded_bytes: 10,
            total_bytes: 20,
            speed: 1.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["itemId"], "a");
        assert_eq!(json["downloadedBytes"], 10);
    }
}
