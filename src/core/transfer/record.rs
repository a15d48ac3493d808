use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::instance::{InstalledModpack, LoaderType};

pub const STEP_TRANSFER: &str = "transfer";
pub const STEP_INSTALL: &str = "install";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Downloading,
    Installing,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl RecordStatus {
    fn is_running(&self) -> bool {
        matches!(
            self,
            RecordStatus::Pending | RecordStatus::Downloading | RecordStatus::Installing
        )
    }
}

/// How the install step treats the target instance. Persisted so a resumed
/// import is held to the same consent as the original request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InstallTarget {
    /// Existing instance; incompatible packs need explicit consent.
    Existing {
        #[serde(rename = "allowIncompatible")]
        allow_incompatible: bool,
    },
    /// Instance made for this pack; it adopts the pack's runtime.
    Created,
}

impl Default for InstallTarget {
    fn default() -> Self {
        InstallTarget::Existing {
            allow_incompatible: false,
        }
    }
}

/// Persisted checkpoint of a multi-step import, kept until every step is done.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteInstallRecord {
    pub id: String,
    pub instance_name: String,
    pub instance_path: PathBuf,
    pub loader: LoaderType,
    pub mc_version: String,
    #[serde(default)]
    pub loader_version: Option<String>,
    pub status: RecordStatus,
    /// 0..1 across all steps.
    pub progress: f64,
    pub current_step: String,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,

    // ── Transfer checkpoint ──
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub destination_path: Option<PathBuf>,
    /// Last byte offset acknowledged on disk.
    #[serde(default)]
    pub downloaded_bytes: u64,
    /// 0 while unknown.
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub sha1: Option<String>,
    /// Archive to extract during the install step.
    #[serde(default)]
    pub archive_path: Option<PathBuf>,
    /// Instance record to update once installed.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Pack recorded on the instance once installed.
    #[serde(default)]
    pub modpack: Option<InstalledModpack>,
    #[serde(default)]
    pub target: InstallTarget,
}

impl IncompleteInstallRecord {
    pub fn new(id: impl Into<String>, total_steps: u32, first_step: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            instance_name: String::new(),
            instance_path: PathBuf::new(),
            loader: LoaderType::Unknown,
            mc_version: "unknown".into(),
            loader_version: None,
            status: RecordStatus::Pending,
            progress: 0.0,
            current_step: first_step.to_string(),
            total_steps: total_steps.max(1),
            completed_steps: 0,
            started_at: now,
            last_updated: now,
            error: None,
            source_url: None,
            destination_path: None,
            downloaded_bytes: 0,
            total_bytes: 0,
            sha1: None,
            archive_path: None,
            instance_id: None,
            modpack: None,
            target: InstallTarget::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed_steps >= self.total_steps
    }

    /// Overall progress given the fraction of the current step.
    fn progress_with(&self, step_fraction: f64) -> f64 {
        let done = self.completed_steps as f64 + step_fraction.clamp(0.0, 1.0);
        (done / self.total_steps as f64).clamp(0.0, 1.0)
    }
}

/// Keyed store of `IncompleteInstallRecord`s, persisted as one JSON file.
///
/// Writes go to a temporary sibling and are renamed into place while holding
/// `write_lock`, so concurrent saves never interleave.
pub struct ResumeStore {
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, IncompleteInstallRecord>>,
    write_lock: Mutex<()>,
}

impl ResumeStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the store from `path`. A missing or corrupt file yields an empty store.
    pub async fn load(path: PathBuf) -> PipelineResult<Self> {
        let mut records = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Vec<IncompleteInstallRecord>>(&raw) {
                Ok(list) => {
                    for record in list.into_iter().filter(|r| !r.is_finished()) {
                        records.insert(record.id.clone(), record);
                    }
                    if !records.is_empty() {
                        info!("Loaded {} incomplete install(s) from {:?}", records.len(), path);
                    }
                }
                Err(e) => warn!("Ignoring corrupt resume state {:?}: {}", path, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::io(path, e)),
        }

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, id: &str) -> Option<IncompleteInstallRecord> {
        read(&self.records).get(id).cloned()
    }

    /// Records that still have steps left, oldest first.
    pub fn incomplete(&self) -> Vec<IncompleteInstallRecord> {
        let mut list: Vec<_> = read(&self.records)
            .values()
            .filter(|r| !r.is_finished())
            .cloned()
            .collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    /// Whether a running record already targets `instance_path`.
    pub fn is_installing_into(&self, instance_path: &Path) -> bool {
        read(&self.records)
            .values()
            .any(|r| r.instance_path == instance_path && r.status.is_running())
    }

    /// Start tracking a record, replacing any previous one with the same id.
    pub async fn track(&self, record: IncompleteInstallRecord) -> PipelineResult<()> {
        debug!("Tracking install {} ({} steps)", record.id, record.total_steps);
        write(&self.records).insert(record.id.clone(), record);
        self.persist().await
    }

    /// Apply `mutate` to a record and persist it.
    ///
    /// Keeps `completed_steps <= total_steps` and, while the record was
    /// running and stays running, never lets `progress` go backwards.
    pub async fn update<F>(&self, id: &str, mutate: F) -> PipelineResult<Option<IncompleteInstallRecord>>
    where
        F: FnOnce(&mut IncompleteInstallRecord),
    {
        let updated = {
            let mut records = write(&self.records);
            let Some(record) = records.get_mut(id) else {
                return Ok(None);
            };
            let before = record.clone();
            mutate(record);

            record.completed_steps = record.completed_steps.min(record.total_steps);
            record.progress = record.progress.clamp(0.0, 1.0);
            if before.status.is_running() && record.status.is_running() {
                record.progress = record.progress.max(before.progress);
            }
            record.last_updated = Utc::now();
            record.clone()
        };
        self.persist().await?;
        Ok(Some(updated))
    }

    /// Record the acknowledged byte offset of the transfer step.
    pub async fn checkpoint_transfer(
        &self,
        id: &str,
        downloaded_bytes: u64,
        total_bytes: u64,
    ) -> PipelineResult<Option<IncompleteInstallRecord>> {
        self.update(id, |r| {
            r.status = RecordStatus::Downloading;
            r.current_step = STEP_TRANSFER.into();
            r.downloaded_bytes = downloaded_bytes;
            r.total_bytes = total_bytes;
            r.error = None;
            let fraction = if total_bytes > 0 {
                downloaded_bytes as f64 / total_bytes as f64
            } else {
                0.0
            };
            r.progress = r.progress_with(fraction);
        })
        .await
    }

    /// Record progress within the install step.
    pub async fn checkpoint_install(
        &self,
        id: &str,
        fraction: f64,
    ) -> PipelineResult<Option<IncompleteInstallRecord>> {
        self.update(id, |r| {
            r.status = RecordStatus::Installing;
            r.current_step = STEP_INSTALL.into();
            r.error = None;
            r.progress = r.progress_with(fraction);
        })
        .await
    }

    /// Forget the transfer checkpoint; the next attempt starts from byte zero.
    pub async fn rewind_transfer(&self, id: &str) -> PipelineResult<()> {
        let rewound = {
            let mut records = write(&self.records);
            match records.get_mut(id) {
                Some(record) => {
                    record.downloaded_bytes = 0;
                    record.progress = record.progress_with(0.0);
                    record.last_updated = Utc::now();
                    true
                }
                None => false,
            }
        };
        if rewound {
            self.persist().await?;
        }
        Ok(())
    }

    /// Mark the current step done and move on to `next_step`. The record is
    /// dropped once every step is complete; returns whether that happened.
    pub async fn complete_step(&self, id: &str, next_step: Option<&str>) -> PipelineResult<bool> {
        let finished = self
            .update(id, |r| {
                r.completed_steps += 1;
                r.progress = r.progress_with(0.0);
                if let Some(step) = next_step {
                    r.current_step = step.to_string();
                }
                if r.completed_steps >= r.total_steps {
                    r.status = RecordStatus::Completed;
                    r.progress = 1.0;
                }
            })
            .await?
            .map(|r| r.is_finished())
            .unwrap_or(false);

        if finished {
            self.remove(id).await?;
        }
        Ok(finished)
    }

    pub async fn set_status(&self, id: &str, status: RecordStatus) -> PipelineResult<()> {
        self.update(id, |r| r.status = status).await.map(|_| ())
    }

    /// Halt the record with the error text stored verbatim.
    pub async fn mark_error(&self, id: &str, error: &str) -> PipelineResult<()> {
        self.update(id, |r| {
            r.status = RecordStatus::Error;
            r.error = Some(error.to_string());
        })
        .await
        .map(|_| ())
    }

    pub async fn remove(&self, id: &str) -> PipelineResult<()> {
        let removed = write(&self.records).remove(id).is_some();
        if removed {
            debug!("Dropped install record {}", id);
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> PipelineResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut snapshot: Vec<IncompleteInstallRecord> = read(&self.records).values().cloned().collect();
        snapshot.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| PipelineError::io(tmp.clone(), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| PipelineError::io(path.clone(), e))?;
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, steps: u32) -> IncompleteInstallRecord {
        let mut r = IncompleteInstallRecord::new(id, steps, STEP_TRANSFER);
        r.instance_name = "Skyblock".into();
        r.source_url = Some("https://cdn.example/pack.mrpack".into());
        r
    }

    #[tokio::test]
    async fn records_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incomplete-installs.json");

        let store = ResumeStore::load(path.clone()).await.unwrap();
        store.track(record("dl-1", 1)).await.unwrap();
        store.checkpoint_transfer("dl-1", 400, 1000).await.unwrap();

        let reloaded = ResumeStore::load(path).await.unwrap();
        let r = reloaded.get("dl-1").unwrap();
        assert_eq!(r.downloaded_bytes, 400);
        assert_eq!(r.total_bytes, 1000);
        assert!((r.progress - 0.4).abs() < 1e-9);
        assert_eq!(r.status, RecordStatus::Downloading);
    }

    #[tokio::test]
    async fn install_target_survives_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incomplete-installs.json");

        let store = ResumeStore::load(path.clone()).await.unwrap();
        let mut r = record("imp-1", 2);
        r.target = InstallTarget::Existing {
            allow_incompatible: true,
        };
        store.track(r).await.unwrap();

        let reloaded = ResumeStore::load(path).await.unwrap();
        assert_eq!(
            reloaded.get("imp-1").unwrap().target,
            InstallTarget::Existing {
                allow_incompatible: true
            }
        );
    }

    #[test]
    fn records_without_a_target_require_consent() {
        let mut value = serde_json::to_value(record("imp-1", 2)).unwrap();
        value.as_object_mut().unwrap().remove("target");

        let r: IncompleteInstallRecord = serde_json::from_value(value).unwrap();
        assert_eq!(
            r.target,
            InstallTarget::Existing {
                allow_incompatible: false
            }
        );
    }

    #[tokio::test]
    async fn corrupt_state_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incomplete-installs.json");
        tokio::fs::write(&path, "[{ broken").await.unwrap();

        let store = ResumeStore::load(path).await.unwrap();
        assert!(store.incomplete().is_empty());
    }

    #[tokio::test]
    async fn progress_never_decreases_while_running() {
        let store = ResumeStore::in_memory();
        store.track(record("dl-1", 1)).await.unwrap();
        store.checkpoint_transfer("dl-1", 600, 1000).await.unwrap();
        let r = store.checkpoint_transfer("dl-1", 300, 1000).await.unwrap().unwrap();
        assert!((r.progress - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn errors_are_stored_verbatim_without_touching_checkpoint() {
        let store = ResumeStore::in_memory();
        store.track(record("dl-1", 2)).await.unwrap();
        store.checkpoint_transfer("dl-1", 250, 1000).await.unwrap();
        store.mark_error("dl-1", "connection reset by peer").await.unwrap();

        let r = store.get("dl-1").unwrap();
        assert_eq!(r.status, RecordStatus::Error);
        assert_eq!(r.error.as_deref(), Some("connection reset by peer"));
        assert_eq!(r.downloaded_bytes, 250);
    }

    #[tokio::test]
    async fn record_is_removed_once_all_steps_complete() {
        let store = ResumeStore::in_memory();
        store.track(record("imp-1", 2)).await.unwrap();

        assert!(!store.complete_step("imp-1", Some(STEP_INSTALL)).await.unwrap());
        let r = store.get("imp-1").unwrap();
        assert_eq!(r.completed_steps, 1);
        assert_eq!(r.current_step, STEP_INSTALL);
        assert!((r.progress - 0.5).abs() < 1e-9);

        assert!(store.complete_step("imp-1", None).await.unwrap());
        assert!(store.get("imp-1").is_none());
    }

    #[tokio::test]
    async fn completed_steps_never_exceed_total() {
        let store = ResumeStore::in_memory();
        store.track(record("x", 1)).await.unwrap();
        store.update("x", |r| r.completed_steps = 7).await.unwrap();
        // Finished records are still readable until removed.
        let r = store.get("x").unwrap();
        assert_eq!(r.completed_steps, 1);
    }

    #[tokio::test]
    async fn install_target_lookup() {
        let store = ResumeStore::in_memory();
        let mut r = record("x", 2);
        r.instance_path = PathBuf::from("/instances/foo");
        store.track(r).await.unwrap();
        assert!(store.is_installing_into(Path::new("/instances/foo")));
        store.set_status("x", RecordStatus::Paused).await.unwrap();
        assert!(!store.is_installing_into(Path::new("/instances/foo")));
    }
}
