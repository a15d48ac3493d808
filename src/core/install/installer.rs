use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::ZipArchive;

use super::routing::{route, ContentRoute};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::instance::CONTENT_DIRS;
use crate::core::progress::{OperationKind, ProgressHub, ProgressState, ProgressStatus};

pub const DEFAULT_SAMPLE_EVERY: usize = 5;

/// Count-based install progress. Only file entries are counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgress {
    pub processed: usize,
    pub total: usize,
    pub current_file: String,
}

impl InstallProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed as f64 / self.total as f64
    }

    pub fn is_final(&self) -> bool {
        self.processed == self.total
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub archive: PathBuf,
    pub target: PathBuf,
    pub total_entries: usize,
    pub files_written: usize,
    /// Entries refused because of unsafe names.
    pub skipped: Vec<String>,
    pub routed: BTreeMap<ContentRoute, usize>,
}

/// Metadata of one archive entry; the body is read through `ArchiveEntries::copy_to`.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    index: usize,
    pub name: String,
    /// `None` when the name is absolute or escapes the root.
    pub path: Option<PathBuf>,
    pub is_dir: bool,
}

/// Single-pass cursor over the entries of a zip archive.
pub struct ArchiveEntries<R: Read + Seek> {
    archive: ZipArchive<R>,
    source: PathBuf,
    next: usize,
}

impl ArchiveEntries<File> {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let file = File::open(path).map_err(|e| corrupt(path, e))?;
        Self::new(file, path)
    }
}

impl<R: Read + Seek> ArchiveEntries<R> {
    pub fn new(reader: R, source: &Path) -> PipelineResult<Self> {
        let archive = ZipArchive::new(reader).map_err(|e| corrupt(source, e))?;
        Ok(Self {
            archive,
            source: source.to_path_buf(),
            next: 0,
        })
    }

    /// Number of non-directory entries.
    pub fn file_count(&self) -> usize {
        self.archive
            .file_names()
            .filter(|name| !is_dir_name(name))
            .count()
    }

    pub fn next_entry(&mut self) -> Option<PipelineResult<ArchiveEntry>> {
        if self.next >= self.archive.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let entry = self
            .archive
            .by_index_raw(index)
            .map(|file| ArchiveEntry {
                index,
                name: file.name().to_string(),
                path: file.enclosed_name(),
                is_dir: is_dir_name(file.name()),
            })
            .map_err(|e| corrupt(&self.source, e));
        Some(entry)
    }

    /// Decompress `entry` into `out`. Decode failures are `CorruptArchive`,
    /// write failures are `EntryWrite` against `dest`.
    pub fn copy_to(&mut self, entry: &ArchiveEntry, out: &mut impl Write, dest: &Path) -> PipelineResult<u64> {
        let mut file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| corrupt(&self.source, e))?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut written = 0u64;
        loop {
            let n = file.read(&mut buf).map_err(|e| PipelineError::CorruptArchive {
                path: self.source.clone(),
                reason: format!("{}: {}", entry.name, e),
            })?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).map_err(|e| entry_write(dest, e))?;
            written += n as u64;
        }
        out.flush().map_err(|e| entry_write(dest, e))?;
        Ok(written)
    }
}

/// Extracts modpack archives into instance directories.
pub struct ArchiveInstaller {
    hub: Arc<ProgressHub>,
    sample_every: usize,
}

impl ArchiveInstaller {
    pub fn new(hub: Arc<ProgressHub>, sample_every: usize) -> Self {
        Self {
            hub,
            sample_every: sample_every.max(1),
        }
    }

    pub async fn install<F>(&self, archive: &Path, target: &Path, on_progress: F) -> PipelineResult<InstallReport>
    where
        F: FnMut(InstallProgress) + Send + 'static,
    {
        let id = format!("install-{}", Uuid::new_v4());
        self.install_as(&id, archive, target, on_progress).await
    }

    /// Same as `install`, publishing hub status under `id`.
    pub async fn install_as<F>(
        &self,
        id: &str,
        archive: &Path,
        target: &Path,
        mut on_progress: F,
    ) -> PipelineResult<InstallReport>
    where
        F: FnMut(InstallProgress) + Send + 'static,
    {
        let label = target.display().to_string();
        self.hub.install(
            format!("Installing {} into {}", file_label(archive), label),
            Some(&label),
        );

        let hub = Arc::clone(&self.hub);
        let status_id = id.to_string();
        let status_target = label.clone();
        let sample_every = self.sample_every;
        let archive_path = archive.to_path_buf();
        let target_path = target.to_path_buf();

        let result = tokio::task::spawn_blocking(move || {
            install_blocking(&archive_path, &target_path, sample_every, |progress| {
                let mut status = ProgressStatus::new(&status_id, OperationKind::Install, &status_target);
                status.progress = progress.fraction();
                status.status = ProgressState::InProgress;
                status.current = progress.processed as u64;
                status.total = progress.total as u64;
                status.details = Some(progress.current_file.clone());
                hub.update_status(status);
                on_progress(progress);
            })
        })
        .await
        .map_err(|e| PipelineError::Other(format!("install task failed: {e}")))?;

        let mut status = ProgressStatus::new(id, OperationKind::Install, &label);
        match &result {
            Ok(report) => {
                status.progress = 1.0;
                status.status = ProgressState::Completed;
                status.current = report.total_entries as u64;
                status.total = report.total_entries as u64;
                self.hub.update_status(status);
                self.hub.success(
                    format!(
                        "Installed {} file(s) from {}",
                        report.files_written,
                        file_label(archive)
                    ),
                    Some(&label),
                );
            }
            Err(e) => {
                status.status = ProgressState::Error;
                status.details = Some(e.to_string());
                self.hub.update_status(status);
                self.hub.error(
                    format!("Install failed: {e}"),
                    Some(serde_json::json!({ "archive": archive.display().to_string() })),
                    Some(&label),
                );
            }
        }
        result
    }
}

/// Extract every entry of `archive` under `target`. Blocking.
///
/// Overwrites existing files, so running it twice yields the same tree.
pub fn install_blocking<F>(
    archive: &Path,
    target: &Path,
    sample_every: usize,
    mut on_progress: F,
) -> PipelineResult<InstallReport>
where
    F: FnMut(InstallProgress),
{
    let mut entries = ArchiveEntries::open(archive)?;
    prepare_target(target)?;

    let total = entries.file_count();
    let sample_every = sample_every.max(1);
    let mut report = InstallReport {
        archive: archive.to_path_buf(),
        target: target.to_path_buf(),
        total_entries: total,
        files_written: 0,
        skipped: Vec::new(),
        routed: BTreeMap::new(),
    };
    info!("Extracting {} file(s) from {:?} into {:?}", total, archive, target);

    let mut processed = 0usize;
    while let Some(entry) = entries.next_entry() {
        let entry = entry?;
        if entry.is_dir {
            continue;
        }
        processed += 1;

        match entry.path.as_deref().and_then(route) {
            Some((content, relative)) => {
                let dest = target.join(&relative);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| entry_write(parent, e))?;
                }
                let mut out = File::create(&dest).map_err(|e| entry_write(&dest, e))?;
                let bytes = entries.copy_to(&entry, &mut out, &dest)?;
                debug!("{} -> {:?} ({} bytes)", entry.name, dest, bytes);
                *report.routed.entry(content).or_insert(0) += 1;
                report.files_written += 1;
            }
            None => {
                warn!("Skipping unsafe archive entry {:?}", entry.name);
                report.skipped.push(entry.name.clone());
            }
        }

        if processed % sample_every == 0 || processed == total {
            on_progress(InstallProgress {
                processed,
                total,
                current_file: entry.name,
            });
        }
    }

    if total == 0 {
        on_progress(InstallProgress {
            processed: 0,
            total: 0,
            current_file: String::new(),
        });
    }

    info!(
        "Extracted {} file(s) into {:?}, {} skipped",
        report.files_written,
        target,
        report.skipped.len()
    );
    Ok(report)
}

/// Create the instance root and its content folders up front.
fn prepare_target(target: &Path) -> PipelineResult<()> {
    let not_writable = |path: &Path, source| PipelineError::DestinationNotWritable {
        path: path.to_path_buf(),
        source,
    };
    if target.exists() && !target.is_dir() {
        return Err(not_writable(
            target,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target is not a directory"),
        ));
    }
    std::fs::create_dir_all(target).map_err(|e| not_writable(target, e))?;
    for dir in CONTENT_DIRS {
        let path = target.join(dir);
        std::fs::create_dir_all(&path).map_err(|e| not_writable(&path, e))?;
    }
    Ok(())
}

fn is_dir_name(name: &str) -> bool {
    name.ends_with('/') || name.ends_with('\\')
}

fn corrupt(path: &Path, error: impl std::fmt::Display) -> PipelineError {
    PipelineError::CorruptArchive {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

fn entry_write(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::EntryWrite {
        path: path.to_path_buf(),
        source,
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
