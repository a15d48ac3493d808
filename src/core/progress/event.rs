use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogEventType {
    Info,
    Success,
    Error,
    Warning,
    Progress,
    Download,
    Install,
    Launch,
}

/// Append-only log record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogEventType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// 0..1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// What is being downloaded/installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Download,
    Install,
    Generic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressState {
    Pending,
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl ProgressState {
    /// Pending and in-progress operations count as active.
    pub fn is_active(&self) -> bool {
        matches!(self, ProgressState::Pending | ProgressState::InProgress)
    }
}

/// Progress snapshot of one operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatus {
    pub id: String,
    pub operation: OperationKind,
    pub target: String,
    /// 0..1
    pub progress: f64,
    pub status: ProgressState,
    pub current: u64,
    pub total: u64,
    /// Bytes per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<u64>,
    /// Milliseconds. `None` while the rate is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProgressStatus {
    pub fn new(id: impl Into<String>, operation: OperationKind, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation,
            target: target.into(),
            progress: 0.0,
            status: ProgressState::Pending,
            current: 0,
            total: 0,
            speed: None,
            elapsed_time: None,
            estimated_time_remaining: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverallProgress {
    pub progress: f64,
    pub status_text: String,
    pub active_operations: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub total_logs: usize,
    pub recent_logs: usize,
    pub active_downloads: usize,
    pub total_progress_updates: usize,
}
