// ─── Temporary share links ───
// Copies a pack (or zips a folder) into `temp-modpacks/` and hands out an
// expiring, download-capped URL for it.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use crate::core::error::{PipelineError, PipelineResult};

pub const SHARE_DIR_NAME: &str = "temp-modpacks";
const INDEX_FILE: &str = "modpacks.json";
pub const DEFAULT_SHARE_BASE_URL: &str = "https://drklauncher.local";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SharedModpack {
    pub id: String,
    pub original_path: PathBuf,
    pub temp_path: PathBuf,
    pub upload_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub download_count: u32,
    pub max_downloads: u32,
}

impl SharedModpack {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration_date
    }

    pub fn is_exhausted(&self) -> bool {
        self.download_count >= self.max_downloads
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub id: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct ShareService {
    dir: PathBuf,
    base_url: String,
    ttl: Duration,
    max_downloads: u32,
    entries: Mutex<HashMap<String, SharedModpack>>,
}

impl ShareService {
    /// Open the share directory, dropping entries that expired while closed.
    pub async fn open(
        dir: PathBuf,
        base_url: &str,
        ttl_hours: u32,
        max_downloads: u32,
    ) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::io(&dir, e))?;

        let index = dir.join(INDEX_FILE);
        let mut entries = HashMap::new();
        let now = Utc::now();
        match tokio::fs::read_to_string(&index).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, SharedModpack>>(&raw) {
                Ok(stored) => {
                    for (id, entry) in stored {
                        if entry.is_expired(now) {
                            remove_payload(&entry.temp_path).await;
                        } else {
                            entries.insert(id, entry);
                        }
                    }
                }
                Err(e) => warn!("Ignoring corrupt share index {:?}: {}", index, e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::io(index, e)),
        }

        let service = Self {
            dir,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl: Duration::hours(i64::from(ttl_hours)),
            max_downloads,
            entries: Mutex::new(entries),
        };
        service.save(&*service.entries.lock().await).await?;
        Ok(service)
    }

    /// Share a pack file, or a folder zipped on the fly.
    pub async fn create(&self, original: &Path) -> PipelineResult<ShareLink> {
        let metadata = tokio::fs::metadata(original)
            .await
            .map_err(|e| PipelineError::UnreadableSource {
                source_name: original.display().to_string(),
                reason: e.to_string(),
            })?;

        let id = generate_id();
        let temp_path = if metadata.is_dir() {
            let zip_path = self.dir.join(format!("{id}.zip"));
            let (src, dest) = (original.to_path_buf(), zip_path.clone());
            tokio::task::spawn_blocking(move || zip_folder(&src, &dest))
                .await
                .map_err(|e| PipelineError::Other(format!("zip task failed: {e}")))??;
            zip_path
        } else {
            let extension = original
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            let copy_path = self.dir.join(format!("{id}{extension}"));
            tokio::fs::copy(original, &copy_path)
                .await
                .map_err(|e| PipelineError::io(&copy_path, e))?;
            copy_path
        };

        let now = Utc::now();
        let entry = SharedModpack {
            id: id.clone(),
            original_path: original.to_path_buf(),
            temp_path,
            upload_date: now,
            expiration_date: now + self.ttl,
            download_count: 0,
            max_downloads: self.max_downloads,
        };
        let link = ShareLink {
            url: format!("{}/modpack/{}", self.base_url, id),
            id: id.clone(),
            expires_at: entry.expiration_date,
        };

        let mut entries = self.entries.lock().await;
        entries.insert(id, entry);
        self.save(&entries).await?;
        info!("Shared {:?} as {} until {}", original, link.url, link.expires_at);
        Ok(link)
    }

    /// Look up a share and count one download. Expired or exhausted shares
    /// are deleted and yield `None`.
    pub async fn get(&self, id: &str) -> PipelineResult<Option<SharedModpack>> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            return Ok(None);
        };

        if entry.is_expired(Utc::now()) || entry.is_exhausted() {
            debug!("Share {} is no longer available", id);
            if let Some(gone) = entries.remove(id) {
                remove_payload(&gone.temp_path).await;
            }
            self.save(&entries).await?;
            return Ok(None);
        }

        entry.download_count += 1;
        let snapshot = entry.clone();
        self.save(&entries).await?;
        Ok(Some(snapshot))
    }

    pub async fn delete(&self, id: &str) -> PipelineResult<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.remove(id) else {
            return Ok(false);
        };
        remove_payload(&entry.temp_path).await;
        self.save(&entries).await?;
        Ok(true)
    }

    /// Delete every expired share. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> PipelineResult<usize> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = entries.remove(id) {
                remove_payload(&entry.temp_path).await;
            }
        }
        if !expired.is_empty() {
            self.save(&entries).await?;
            info!("Removed {} expired share(s)", expired.len());
        }
        Ok(expired.len())
    }

    pub async fn list(&self) -> Vec<SharedModpack> {
        let mut list: Vec<_> = self.entries.lock().await.values().cloned().collect();
        list.sort_by(|a, b| a.upload_date.cmp(&b.upload_date));
        list
    }

    async fn save(&self, entries: &HashMap<String, SharedModpack>) -> PipelineResult<()> {
        let index = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| PipelineError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &index)
            .await
            .map_err(|e| PipelineError::io(index, e))
    }
}

/// 16 hex chars of an MD5 over the clock and a random salt.
fn generate_id() -> String {
    let seed = format!(
        "{}-{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        Uuid::new_v4()
    );
    let digest = Md5::digest(seed.as_bytes());
    hex::encode(digest)[..16].to_string()
}

async fn remove_payload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not delete shared file {:?}: {}", path, e);
        }
    }
}

/// Zip `src` recursively into `dest`. Blocking.
fn zip_folder(src: &Path, dest: &Path) -> PipelineResult<()> {
    let file = File::create(dest).map_err(|e| PipelineError::io(dest, e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut pending = vec![src.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| PipelineError::io(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        children.sort();

        for path in children {
            let rel = path
                .strip_prefix(src)
                .map_err(|e| PipelineError::Other(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                zip.add_directory(format!("{rel}/"), options)?;
                pending.push(path);
            } else {
                zip.start_file(rel, options)?;
                let bytes = std::fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
                zip.write_all(&bytes).map_err(|e| PipelineError::io(dest, e))?;
            }
        }
    }

    zip.finish()?;
    Ok(())
}
