use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::event::{
    HubStats, LogEvent, LogEventType, OperationKind, OverallProgress, ProgressState,
    ProgressStatus,
};
use crate::core::error::{PipelineError, PipelineResult};

pub const DEFAULT_LOG_CAPACITY: usize = 1000;
const RECENT_WINDOW: usize = 50;
const CHANNEL_CAPACITY: usize = 256;

/// Process-wide progress registry and bounded event log.
///
/// Built once by `AppState` and shared through `Arc`. Producers push
/// statuses and log events; consumers either poll the snapshot methods or
/// hold a broadcast receiver from `subscribe_logs`/`subscribe_statuses`.
pub struct ProgressHub {
    capacity: usize,
    logs: RwLock<VecDeque<LogEvent>>,
    statuses: RwLock<Vec<ProgressStatus>>,
    log_tx: broadcast::Sender<LogEvent>,
    status_tx: broadcast::Sender<ProgressStatus>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (log_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            capacity: capacity.max(1),
            logs: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            statuses: RwLock::new(Vec::new()),
            log_tx,
            status_tx,
        }
    }

    // ── Log ─────────────────────────────────────────────

    /// Append a log event, evicting the oldest entry past capacity.
    pub fn log(
        &self,
        kind: LogEventType,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        target: Option<&str>,
    ) -> LogEvent {
        let event = LogEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            progress: details
                .as_ref()
                .and_then(|d| d.get("progress"))
                .and_then(|p| p.as_f64()),
            details,
            target: target.map(str::to_string),
        };

        mirror_to_tracing(&event);

        {
            let mut logs = write(&self.logs);
            logs.push_back(event.clone());
            while logs.len() > self.capacity {
                logs.pop_front();
            }
        }

        let _ = self.log_tx.send(event.clone());
        event
    }

    pub fn info(&self, message: impl Into<String>, target: Option<&str>) -> LogEvent {
        self.log(LogEventType::Info, message, None, target)
    }

    pub fn success(&self, message: impl Into<String>, target: Option<&str>) -> LogEvent {
        self.log(LogEventType::Success, message, None, target)
    }

    pub fn warning(&self, message: impl Into<String>, target: Option<&str>) -> LogEvent {
        self.log(LogEventType::Warning, message, None, target)
    }

    pub fn error(
        &self,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        target: Option<&str>,
    ) -> LogEvent {
        self.log(LogEventType::Error, message, details, target)
    }

    pub fn download(&self, message: impl Into<String>, target: Option<&str>) -> LogEvent {
        self.log(LogEventType::Download, message, None, target)
    }

    pub fn install(&self, message: impl Into<String>, target: Option<&str>) -> LogEvent {
        self.log(LogEventType::Install, message, None, target)
    }

    pub fn launch(&self, message: impl Into<String>, target: Option<&str>) -> LogEvent {
        self.log(LogEventType::Launch, message, None, target)
    }

    /// The last `count` events, oldest first.
    pub fn recent_logs(&self, count: usize) -> Vec<LogEvent> {
        let logs = read(&self.logs);
        let skip = logs.len().saturating_sub(count);
        logs.iter().skip(skip).cloned().collect()
    }

    pub fn logs_by_type(&self, kind: LogEventType, count: usize) -> Vec<LogEvent> {
        let logs = read(&self.logs);
        let matching: Vec<&LogEvent> = logs.iter().filter(|e| e.kind == kind).collect();
        let skip = matching.len().saturating_sub(count);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Drop events older than `max_age`.
    pub fn clear_older_than(&self, max_age: chrono::Duration) {
        let cutoff = Utc::now() - max_age;
        write(&self.logs).retain(|e| e.timestamp > cutoff);
    }

    /// Write the buffered events to `<dir>/launcher-log-<timestamp>.json`.
    pub async fn save_logs_to_file(&self, dir: &Path) -> PipelineResult<PathBuf> {
        #[derive(Serialize)]
        struct Snapshot {
            timestamp: chrono::DateTime<Utc>,
            logs: Vec<LogEvent>,
        }

        let now = Utc::now();
        let snapshot = Snapshot {
            timestamp: now,
            logs: self.recent_logs(self.capacity),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;
        let path = dir.join(format!(
            "launcher-log-{}.json",
            now.format("%Y-%m-%dT%H-%M-%S-%3fZ")
        ));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PipelineError::io(path.clone(), e))?;
        Ok(path)
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }

    // ── Statuses ────────────────────────────────────────

    /// Insert or replace the status with the same id.
    pub fn update_status(&self, status: ProgressStatus) {
        {
            let mut statuses = write(&self.statuses);
            match statuses.iter_mut().find(|s| s.id == status.id) {
                Some(existing) => *existing = status.clone(),
                None => statuses.push(status.clone()),
            }
        }
        let _ = self.status_tx.send(status);
    }

    pub fn status(&self, id: &str) -> Option<ProgressStatus> {
        read(&self.statuses).iter().find(|s| s.id == id).cloned()
    }

    pub fn all_statuses(&self) -> Vec<ProgressStatus> {
        read(&self.statuses).clone()
    }

    pub fn remove_status(&self, id: &str) {
        write(&self.statuses).retain(|s| s.id != id);
    }

    pub fn subscribe_statuses(&self) -> broadcast::Receiver<ProgressStatus> {
        self.status_tx.subscribe()
    }

    /// Equal-weight mean over the active operations.
    pub fn overall_progress(&self) -> OverallProgress {
        let statuses = read(&self.statuses);

        if statuses.is_empty() {
            return OverallProgress {
                progress: 0.0,
                status_text: "Waiting for operations...".into(),
                active_operations: 0,
            };
        }

        let active: Vec<&ProgressStatus> =
            statuses.iter().filter(|s| s.status.is_active()).collect();
        let progress = if active.is_empty() {
            0.0
        } else {
            let sum: f64 = active.iter().map(|s| s.progress.clamp(0.0, 1.0)).sum();
            (sum / active.len() as f64).clamp(0.0, 1.0)
        };

        let has_errors = statuses.iter().any(|s| s.status == ProgressState::Error);
        let has_pending = active.iter().any(|s| s.status == ProgressState::Pending);
        let has_running = active.iter().any(|s| s.status == ProgressState::InProgress);

        let status_text = if has_errors {
            "Some operations failed"
        } else if has_pending {
            "Waiting to start..."
        } else if has_running {
            "Processing operations..."
        } else {
            "Completed"
        };

        OverallProgress {
            progress,
            status_text: status_text.into(),
            active_operations: active.len(),
        }
    }

    pub fn stats(&self) -> HubStats {
        let total_logs = read(&self.logs).len();
        let statuses = read(&self.statuses);
        HubStats {
            total_logs,
            recent_logs: total_logs.min(RECENT_WINDOW),
            active_downloads: statuses
                .iter()
                .filter(|s| s.operation == OperationKind::Download && s.status.is_active())
                .count(),
            total_progress_updates: statuses.len(),
        }
    }
}

fn mirror_to_tracing(event: &LogEvent) {
    let target = event.target.as_deref().unwrap_or("-");
    match event.kind {
        LogEventType::Error => error!(target_name = target, "{}", event.message),
        LogEventType::Warning => warn!(target_name = target, "{}", event.message),
        LogEventType::Progress => debug!(target_name = target, "{}", event.message),
        _ => info!(target_name = target, kind = ?event.kind, "{}", event.message),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
