use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::record::{IncompleteInstallRecord, RecordStatus, ResumeStore, STEP_INSTALL, STEP_TRANSFER};
use super::task::{TransferEvent, TransferRequest, TransferState, TransferTask};
use super::throughput::{estimate_remaining, ThroughputMeter};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::progress::{OperationKind, ProgressHub, ProgressStatus};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Stop signal for one running transfer.
struct TransferControl {
    token: CancellationToken,
    pause: AtomicBool,
}

impl TransferControl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            pause: AtomicBool::new(false),
        })
    }
}

enum Outcome {
    Finished(PathBuf),
    Stopped,
}

/// Resumable, bounded-concurrency download registry.
///
/// Every task is keyed by id. Bytes land in `<destination>.part` and the
/// acknowledged offset is checkpointed in the `ResumeStore` before each
/// progress publication, so an interrupted transfer restarts from the
/// last byte a subscriber has seen.
pub struct TransferManager {
    client: Client,
    hub: Arc<ProgressHub>,
    store: Arc<ResumeStore>,
    tasks: RwLock<HashMap<String, TransferTask>>,
    controls: Mutex<HashMap<String, Arc<TransferControl>>>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<TransferEvent>,
    progress_interval: Duration,
}

impl TransferManager {
    pub fn new(
        client: Client,
        hub: Arc<ProgressHub>,
        store: Arc<ResumeStore>,
        max_concurrent: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            hub,
            store,
            tasks: RwLock::new(HashMap::new()),
            controls: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            events,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<ResumeStore> {
        &self.store
    }

    // ── Queries ─────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<TransferTask> {
        read(&self.tasks).get(id).cloned()
    }

    /// All known tasks, oldest first.
    pub fn tasks(&self) -> Vec<TransferTask> {
        let mut list: Vec<_> = read(&self.tasks).values().cloned().collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        list
    }

    /// Drop terminal tasks from the registry. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = write(&self.tasks);
        let before = tasks.len();
        tasks.retain(|_, t| !t.state.is_terminal());
        let removed = before - tasks.len();
        drop(tasks);
        debug!("Cleared {} finished transfer(s)", removed);
        removed
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.controls).contains_key(id)
    }

    // ── Start ───────────────────────────────────────────

    /// Fire-and-forget download of `url` to `destination`.
    pub fn start(
        self: &Arc<Self>,
        url: &str,
        destination: &Path,
        id: &str,
    ) -> PipelineResult<JoinHandle<PipelineResult<TransferTask>>> {
        self.start_request(TransferRequest::new(id, url, destination))
    }

    /// Spawn `request` in the background. The task is registered before this
    /// returns, so `cancel`/`pause` can reach it immediately.
    pub fn start_request(
        self: &Arc<Self>,
        request: TransferRequest,
    ) -> PipelineResult<JoinHandle<PipelineResult<TransferTask>>> {
        let control = self.register(&request)?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.track_and_run(request, control).await
        }))
    }

    /// Run `request` to a terminal (or paused) state.
    pub async fn download(&self, request: TransferRequest) -> PipelineResult<TransferTask> {
        let control = self.register(&request)?;
        self.track_and_run(request, control).await
    }

    /// Continue an interrupted transfer from its persisted checkpoint.
    pub async fn resume(&self, id: &str) -> PipelineResult<TransferTask> {
        let record = self
            .store
            .get(id)
            .filter(|r| r.source_url.is_some() && r.current_step == STEP_TRANSFER)
            .ok_or_else(|| PipelineError::ResumeTargetNotFound(id.to_string()))?;

        let control = TransferControl::new();
        {
            let mut controls = lock(&self.controls);
            if controls.contains_key(id) {
                return Err(PipelineError::Other(format!("Transfer {id} is already running")));
            }
            controls.insert(id.to_string(), Arc::clone(&control));
        }

        let mut task = TransferTask::new(
            id,
            record.source_url.clone().unwrap_or_default(),
            record.destination_path.clone().unwrap_or_default(),
        );
        task.downloaded_bytes = record.downloaded_bytes;
        task.total_bytes = record.total_bytes;
        write(&self.tasks).insert(id.to_string(), task);

        if let Err(e) = self
            .store
            .update(id, |r| {
                r.status = RecordStatus::Pending;
                r.error = None;
            })
            .await
        {
            return self.settle(id, &control, Err(e)).await;
        }

        self.hub.download(
            format!("Resuming transfer {} from byte {}", id, record.downloaded_bytes),
            record.destination_path.as_deref().and_then(Path::to_str),
        );
        self.run(id, control).await
    }

    // ── Stop ────────────────────────────────────────────

    /// Cancel a running transfer. The partial file and the record stay for
    /// a later `resume`. Returns false if nothing was running under `id`.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.controls).get(id) {
            Some(control) => {
                info!("Cancelling transfer {}", id);
                control.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let controls = lock(&self.controls);
        for control in controls.values() {
            control.token.cancel();
        }
        info!("Cancelling {} transfer(s)", controls.len());
        controls.len()
    }

    /// Stop a running transfer at the next chunk boundary without ending it.
    pub fn pause(&self, id: &str) -> bool {
        match lock(&self.controls).get(id) {
            Some(control) => {
                info!("Pausing transfer {}", id);
                control.pause.store(true, Ordering::SeqCst);
                control.token.cancel();
                true
            }
            None => false,
        }
    }

    // ── Lifecycle ───────────────────────────────────────

    fn register(&self, request: &TransferRequest) -> PipelineResult<Arc<TransferControl>> {
        let control = TransferControl::new();
        {
            let mut controls = lock(&self.controls);
            if controls.contains_key(&request.id) {
                return Err(PipelineError::Other(format!(
                    "Transfer {} is already running",
                    request.id
                )));
            }
            controls.insert(request.id.clone(), Arc::clone(&control));
        }

        let task = TransferTask::new(&request.id, &request.url, request.destination.clone());
        write(&self.tasks).insert(request.id.clone(), task);
        debug!("Registered transfer {} -> {:?}", request.id, request.destination);
        Ok(control)
    }

    async fn track_and_run(
        &self,
        request: TransferRequest,
        control: Arc<TransferControl>,
    ) -> PipelineResult<TransferTask> {
        let record = record_for(&request);
        if let Err(e) = self.store.track(record).await {
            return self.settle(&request.id, &control, Err(e)).await;
        }
        self.hub.download(
            format!("Downloading {}", request.url),
            request.destination.to_str(),
        );
        self.run(&request.id, control).await
    }

    async fn run(&self, id: &str, control: Arc<TransferControl>) -> PipelineResult<TransferTask> {
        let outcome = self.execute(id, &control).await;
        self.settle(id, &control, outcome).await
    }

    /// Move the task into its final state for this run and release its control.
    async fn settle(
        &self,
        id: &str,
        control: &TransferControl,
        outcome: PipelineResult<Outcome>,
    ) -> PipelineResult<TransferTask> {
        let result = match outcome {
            Ok(Outcome::Finished(path)) => Ok(self.finish_completed(id, path).await),
            Ok(Outcome::Stopped) if control.pause.load(Ordering::SeqCst) => {
                Ok(self.finish_paused(id).await)
            }
            Ok(Outcome::Stopped) => Ok(self.finish_cancelled(id).await),
            Err(e) => {
                self.finish_error(id, &e).await;
                Err(e)
            }
        };
        lock(&self.controls).remove(id);
        result
    }

    async fn finish_completed(&self, id: &str, path: PathBuf) -> TransferTask {
        let task = self.update_task(id, |t| {
            t.state = TransferState::Completed;
            t.end_time = Some(Utc::now());
            if t.total_bytes == 0 {
                t.total_bytes = t.downloaded_bytes;
            }
        });
        if let Err(e) = self.store.complete_step(id, Some(STEP_INSTALL)).await {
            warn!("Could not update install record {}: {}", id, e);
        }
        self.publish(&task);

        let secs = task.elapsed().as_secs_f64();
        info!(
            "Transfer {} completed: {} bytes in {:.1}s",
            id, task.downloaded_bytes, secs
        );
        self.hub.success(
            format!("Downloaded {} ({} bytes)", file_label(&path), task.downloaded_bytes),
            path.to_str(),
        );
        let _ = self.events.send(TransferEvent::Complete {
            item_id: id.to_string(),
            path,
        });
        task
    }

    async fn finish_paused(&self, id: &str) -> TransferTask {
        let task = self.update_task(id, |t| {
            t.state = TransferState::Paused;
            t.speed = 0.0;
        });
        if let Err(e) = self.store.set_status(id, RecordStatus::Paused).await {
            warn!("Could not update install record {}: {}", id, e);
        }
        self.publish(&task);
        self.hub.info(
            format!("Paused {} at byte {}", id, task.downloaded_bytes),
            task.destination.to_str(),
        );
        task
    }

    async fn finish_cancelled(&self, id: &str) -> TransferTask {
        let task = self.update_task(id, |t| {
            t.state = TransferState::Cancelled;
            t.end_time = Some(Utc::now());
            t.speed = 0.0;
        });
        if let Err(e) = self.store.set_status(id, RecordStatus::Cancelled).await {
            warn!("Could not update install record {}: {}", id, e);
        }
        self.publish(&task);
        self.hub.warning(
            format!("Cancelled {} at byte {}", id, task.downloaded_bytes),
            task.destination.to_str(),
        );
        let _ = self.events.send(TransferEvent::Error {
            item_id: id.to_string(),
            message: PipelineError::Cancelled(id.to_string()).to_string(),
        });
        task
    }

    async fn finish_error(&self, id: &str, error: &PipelineError) {
        let message = error.to_string();
        let task = self.update_task(id, |t| {
            t.state = TransferState::Error;
            t.end_time = Some(Utc::now());
            t.speed = 0.0;
            t.error = Some(message.clone());
        });
        if let Err(e) = self.store.mark_error(id, &message).await {
            warn!("Could not update install record {}: {}", id, e);
        }
        self.publish(&task);
        self.hub.error(
            format!("Download failed: {message}"),
            Some(serde_json::json!({
                "id": id,
                "resumable": error.is_transient(),
                "downloadedBytes": task.downloaded_bytes,
            })),
            task.destination.to_str(),
        );
        let _ = self.events.send(TransferEvent::Error {
            item_id: id.to_string(),
            message,
        });
    }

    // ── Transfer ────────────────────────────────────────

    async fn execute(&self, id: &str, control: &TransferControl) -> PipelineResult<Outcome> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| PipelineError::ResumeTargetNotFound(id.to_string()))?;
        let url = record
            .source_url
            .clone()
            .ok_or_else(|| PipelineError::Other(format!("Transfer {id} has no source URL")))?;
        let destination = record
            .destination_path
            .clone()
            .ok_or_else(|| PipelineError::Other(format!("Transfer {id} has no destination")))?;
        self.publish(&self.update_task(id, |_| {}));

        let _permit = tokio::select! {
            biased;
            _ = control.token.cancelled() => return Ok(Outcome::Stopped),
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|_| PipelineError::Other("Transfer pool is closed".into()))?,
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }

        let part = part_path(&destination);
        let on_disk = tokio::fs::metadata(&part)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let offset = record.downloaded_bytes.min(on_disk);
        let expected_total = record.total_bytes;

        if offset > 0 && expected_total > 0 && offset >= expected_total {
            debug!("Transfer {} already has all {} bytes", id, expected_total);
            truncate(&part, expected_total).await?;
            return self
                .finalize(id, &part, &destination, record.sha1.as_deref())
                .await;
        }

        let mut request = self.client.get(&url);
        if offset > 0 {
            debug!("Requesting {} from byte {}", url, offset);
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            biased;
            _ = control.token.cancelled() => return Ok(Outcome::Stopped),
            sent = request.send() => sent.map_err(|e| network(&url, e))?,
        };

        let status = response.status();
        let (start_at, total) = if status == StatusCode::PARTIAL_CONTENT && offset > 0 {
            let total = content_range_total(response.headers())
                .or_else(|| response.content_length().map(|len| offset + len))
                .unwrap_or(0);
            if expected_total > 0 && total != expected_total {
                return Err(stale(id, expected_total, total));
            }
            info!("Resuming {} at byte {} of {}", id, offset, total);
            (offset, total)
        } else if status.is_success() {
            let total = response.content_length().unwrap_or(0);
            if offset > 0 {
                if expected_total > 0 && total != expected_total {
                    return Err(stale(id, expected_total, total));
                }
                warn!("Server ignored the range request for {}; restarting from zero", id);
                self.store.rewind_transfer(id).await?;
            }
            (0, total)
        } else if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            let actual = content_range_total(response.headers()).unwrap_or(0);
            return Err(stale(id, expected_total, actual));
        } else {
            let reason = format!("HTTP {status}");
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                PipelineError::Network { url, reason }
            } else {
                PipelineError::UnreadableSource {
                    source_name: url,
                    reason,
                }
            });
        };

        let mut file = if start_at > 0 {
            let mut f = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&part)
                .await
                .map_err(|e| PipelineError::io(&part, e))?;
            f.set_len(start_at)
                .await
                .map_err(|e| PipelineError::io(&part, e))?;
            f.seek(SeekFrom::Start(start_at))
                .await
                .map_err(|e| PipelineError::io(&part, e))?;
            f
        } else {
            tokio::fs::File::create(&part)
                .await
                .map_err(|e| PipelineError::io(&part, e))?
        };

        self.update_task(id, |t| {
            t.state = TransferState::Downloading;
            t.downloaded_bytes = start_at;
            t.total_bytes = total;
            t.error = None;
        });
        self.checkpoint(id, &mut file, &part, start_at, total, 0.0)
            .await?;

        let mut stream = response.bytes_stream();
        let mut downloaded = start_at;
        let mut meter = ThroughputMeter::default();
        let mut last_publish = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = control.token.cancelled() => {
                    self.checkpoint(id, &mut file, &part, downloaded, total, 0.0).await?;
                    info!("Transfer {} stopped at byte {}", id, downloaded);
                    return Ok(Outcome::Stopped);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| PipelineError::io(&part, e))?;
                    downloaded += chunk.len() as u64;
                    meter.record(chunk.len() as u64);

                    if last_publish.elapsed() >= self.progress_interval {
                        self.checkpoint(id, &mut file, &part, downloaded, total, meter.speed())
                            .await?;
                        last_publish = Instant::now();
                    }
                }
                Some(Err(e)) => {
                    self.checkpoint(id, &mut file, &part, downloaded, total, 0.0)
                        .await?;
                    return Err(network(&url, e));
                }
                None => break,
            }
        }

        let total = total.max(downloaded);
        self.checkpoint(id, &mut file, &part, downloaded, total, meter.speed())
            .await?;
        file.sync_all()
            .await
            .map_err(|e| PipelineError::io(&part, e))?;
        drop(file);

        if downloaded < total {
            return Err(PipelineError::Network {
                url,
                reason: format!("connection closed after {downloaded} of {total} bytes"),
            });
        }

        self.finalize(id, &part, &destination, record.sha1.as_deref())
            .await
    }

    /// Verify the finished `.part` file and move it onto `destination`.
    async fn finalize(
        &self,
        id: &str,
        part: &Path,
        destination: &Path,
        sha1: Option<&str>,
    ) -> PipelineResult<Outcome> {
        if let Some(expected) = sha1 {
            let actual = sha1_file(part).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                let _ = tokio::fs::remove_file(part).await;
                self.store.rewind_transfer(id).await?;
                return Err(PipelineError::Sha1Mismatch {
                    path: destination.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
            debug!("SHA-1 verified for {:?}", destination);
        }

        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            tokio::fs::remove_file(destination)
                .await
                .map_err(|e| PipelineError::io(destination, e))?;
        }
        tokio::fs::rename(part, destination)
            .await
            .map_err(|e| PipelineError::io(destination, e))?;
        Ok(Outcome::Finished(destination.to_path_buf()))
    }

    /// Flush, persist the acknowledged offset, then publish it.
    async fn checkpoint(
        &self,
        id: &str,
        file: &mut tokio::fs::File,
        part: &Path,
        downloaded: u64,
        total: u64,
        speed: f64,
    ) -> PipelineResult<()> {
        file.flush()
            .await
            .map_err(|e| PipelineError::io(part, e))?;
        self.store.checkpoint_transfer(id, downloaded, total).await?;
        let task = self.update_task(id, |t| {
            t.downloaded_bytes = downloaded;
            t.total_bytes = total;
            t.speed = speed;
        });
        self.publish(&task);
        Ok(())
    }

    fn update_task<F>(&self, id: &str, mutate: F) -> TransferTask
    where
        F: FnOnce(&mut TransferTask),
    {
        let mut tasks = write(&self.tasks);
        let task = tasks
            .entry(id.to_string())
            .or_insert_with(|| TransferTask::new(id, String::new(), PathBuf::new()));
        mutate(task);
        task.clone()
    }

    /// Mirror a task snapshot into the hub and, while it is moving, the event stream.
    fn publish(&self, task: &TransferTask) {
        let mut status = ProgressStatus::new(
            &task.id,
            OperationKind::Download,
            task.destination.display().to_string(),
        );
        status.progress = if task.state == TransferState::Completed {
            1.0
        } else {
            task.fraction()
        };
        status.status = task.state.progress_state();
        status.current = task.downloaded_bytes;
        status.total = task.total_bytes;
        status.speed = (task.speed > 0.0).then_some(task.speed);
        status.elapsed_time = Some(task.elapsed().as_millis() as u64);
        status.estimated_time_remaining =
            estimate_remaining(task.downloaded_bytes, task.total_bytes, task.speed)
                .map(|d| d.as_millis() as u64);
        status.details = match task.state {
            TransferState::Paused => Some("paused".into()),
            TransferState::Error => task.error.clone(),
            _ => None,
        };
        self.hub.update_status(status);

        if task.state == TransferState::Downloading {
            let _ = self.events.send(TransferEvent::Progress {
                item_id: task.id.clone(),
                downloaded_bytes: task.downloaded_bytes,
                total_bytes: task.total_bytes,
                speed: task.speed,
            });
        }
    }
}

fn record_for(request: &TransferRequest) -> IncompleteInstallRecord {
    let steps = if request.install.is_some() { 2 } else { 1 };
    let mut record = IncompleteInstallRecord::new(&request.id, steps, STEP_TRANSFER);
    record.source_url = Some(request.url.clone());
    record.destination_path = Some(request.destination.clone());
    record.sha1 = request.sha1.clone();
    record.archive_path = Some(request.destination.clone());

    match &request.install {
        Some(ctx) => {
            record.instance_id = ctx.instance_id.clone();
            record.instance_name = ctx.instance_name.clone();
            record.instance_path = ctx.instance_path.clone();
            record.loader = ctx.loader;
            record.mc_version = ctx.mc_version.clone();
            record.loader_version = ctx.loader_version.clone();
            record.modpack = ctx.modpack.clone();
            record.target = ctx.target;
        }
        None => record.instance_name = file_label(&request.destination),
    }
    record
}

pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Total length from `Content-Range: bytes a-b/total`.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

async fn truncate(path: &Path, len: u64) -> PipelineResult<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    file.set_len(len)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

async fn sha1_file(path: &Path) -> PipelineResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn network(url: &str, error: reqwest::Error) -> PipelineError {
    PipelineError::Network {
        url: url.to_string(),
        reason: error.to_string(),
    }
}

fn stale(id: &str, expected: u64, actual: u64) -> PipelineError {
    PipelineError::StaleResumeTarget {
        id: id.to_string(),
        expected,
        actual,
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::{LogEventType, ProgressState};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn manager(store: Arc<ResumeStore>) -> (Arc<TransferManager>, Arc<ProgressHub>) {
        let hub = Arc::new(ProgressHub::default());
        let manager = TransferManager::new(Client::new(), Arc::clone(&hub), store, 3)
            .with_progress_interval(Duration::ZERO);
        (Arc::new(manager), hub)
    }

    /// Seed a record as if a previous run stopped after `prefix.len()` bytes.
    async fn seed_interrupted(
        store: &ResumeStore,
        id: &str,
        url: &str,
        destination: &Path,
        prefix: &[u8],
        total: u64,
    ) {
        let mut record = IncompleteInstallRecord::new(id, 1, STEP_TRANSFER);
        record.source_url = Some(url.to_string());
        record.destination_path = Some(destination.to_path_buf());
        store.track(record).await.unwrap();
        store
            .checkpoint_transfer(id, prefix.len() as u64, total)
            .await
            .unwrap();
        store.mark_error(id, "connection reset").await.unwrap();
        tokio::fs::write(part_path(destination), prefix).await.unwrap();
    }

    #[tokio::test]
    async fn downloads_whole_file_and_drops_record() {
        let server = MockServer::start().await;
        let payload = body(4096);
        Mock::given(method("GET"))
            .and(path("/pack.mrpack"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("downloads").join("pack.mrpack");
        let store = Arc::new(ResumeStore::in_memory());
        let (manager, hub) = manager(Arc::clone(&store));
        let mut events = manager.subscribe();

        let request = TransferRequest::new("dl-1", format!("{}/pack.mrpack", server.uri()), &dest);
        let task = manager.download(request).await.unwrap();

        assert_eq!(task.state, TransferState::Completed);
        assert_eq!(task.downloaded_bytes, 4096);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        assert!(!part_path(&dest).exists());
        assert!(store.get("dl-1").is_none());

        let status = hub.status("dl-1").unwrap();
        assert_eq!(status.status, ProgressState::Completed);
        assert_eq!(status.progress, 1.0);

        let mut last_bytes = 0;
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                TransferEvent::Progress { downloaded_bytes, .. } => {
                    assert!(downloaded_bytes >= last_bytes);
                    last_bytes = downloaded_bytes;
                }
                TransferEvent::Complete { item_id, .. } => {
                    assert_eq!(item_id, "dl-1");
                    completed = true;
                }
                TransferEvent::Error { .. } => panic!("unexpected error event"),
            }
        }
        assert!(completed);
        assert_eq!(hub.logs_by_type(LogEventType::Success, 10).len(), 1);
    }

    #[tokio::test]
    async fn resume_at_400_of_1000_is_byte_identical() {
        let server = MockServer::start().await;
        let payload = body(1000);
        Mock::given(method("GET"))
            .and(path("/pack.zip"))
            .and(header("Range", "bytes=400-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 400-999/1000")
                    .set_body_bytes(payload[400..].to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack.zip");
        let url = format!("{}/pack.zip", server.uri());
        let store = Arc::new(ResumeStore::in_memory());
        seed_interrupted(&store, "dl-1", &url, &dest, &payload[..400], 1000).await;

        let (manager, _hub) = manager(Arc::clone(&store));
        let task = manager.resume("dl-1").await.unwrap();

        assert_eq!(task.state, TransferState::Completed);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        assert!(store.get("dl-1").is_none());
    }

    #[tokio::test]
    async fn resume_truncates_bytes_past_the_checkpoint() {
        let server = MockServer::start().await;
        let payload = body(1000);
        Mock::given(method("GET"))
            .and(header("Range", "bytes=400-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 400-999/1000")
                    .set_body_bytes(payload[400..].to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack.zip");
        let url = format!("{}/pack.zip", server.uri());
        let store = Arc::new(ResumeStore::in_memory());
        seed_interrupted(&store, "dl-1", &url, &dest, &payload[..400], 1000).await;
        // Bytes written after the last acknowledged checkpoint.
        let mut dirty = payload[..400].to_vec();
        dirty.extend_from_slice(&[0xFF; 50]);
        tokio::fs::write(part_path(&dest), &dirty).await.unwrap();

        let (manager, _hub) = manager(Arc::clone(&store));
        manager.resume("dl-1").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn resume_against_changed_remote_is_stale() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "bytes 400-1199/1200")
                    .set_body_bytes(vec![0u8; 800]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack.zip");
        let url = format!("{}/pack.zip", server.uri());
        let store = Arc::new(ResumeStore::in_memory());
        seed_interrupted(&store, "dl-1", &url, &dest, &body(400), 1000).await;

        let (manager, _hub) = manager(Arc::clone(&store));
        let err = manager.resume("dl-1").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StaleResumeTarget { expected: 1000, actual: 1200, .. }
        ));
        assert_eq!(manager.get("dl-1").unwrap().state, TransferState::Error);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn server_ignoring_range_restarts_from_zero() {
        let server = MockServer::start().await;
        let payload = body(1000);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack.zip");
        let url = format!("{}/pack.zip", server.uri());
        let store = Arc::new(ResumeStore::in_memory());
        seed_interrupted(&store, "dl-1", &url, &dest, &payload[..400], 1000).await;

        let (manager, _hub) = manager(Arc::clone(&store));
        let task = manager.resume("dl-1").await.unwrap();
        assert_eq!(task.state, TransferState::Completed);
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn resume_unknown_id_is_not_found() {
        let (manager, _hub) = manager(Arc::new(ResumeStore::in_memory()));
        assert!(matches!(
            manager.resume("missing").await,
            Err(PipelineError::ResumeTargetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn http_error_produces_terminal_log_and_record_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResumeStore::in_memory());
        let (manager, hub) = manager(Arc::clone(&store));
        let request = TransferRequest::new(
            "dl-404",
            format!("{}/gone.zip", server.uri()),
            dir.path().join("gone.zip"),
        );

        let err = manager.download(request).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnreadableSource { .. }));
        assert_eq!(hub.logs_by_type(LogEventType::Error, 10).len(), 1);
        assert_eq!(hub.status("dl-404").unwrap().status, ProgressState::Error);

        let record = store.get("dl-404").unwrap();
        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.error.as_deref(), Some(err.to_string().as_str()));
    }

    #[tokio::test]
    async fn sha1_mismatch_fails_and_removes_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let (manager, _hub) = manager(Arc::new(ResumeStore::in_memory()));
        let request = TransferRequest::new("dl-sha", format!("{}/file.bin", server.uri()), &dest)
            .with_sha1("0000000000000000000000000000000000000000");

        let err = manager.download(request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Sha1Mismatch { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn sha1_match_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let (manager, _hub) = manager(Arc::new(ResumeStore::in_memory()));
        let request = TransferRequest::new("dl-sha", format!("{}/file.bin", server.uri()), &dest)
            .with_sha1("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D");

        let task = manager.download(request).await.unwrap();
        assert_eq!(task.state, TransferState::Completed);
    }

    #[tokio::test]
    async fn cancel_keeps_record_for_resume() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body(1000))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResumeStore::in_memory());
        let (manager, hub) = manager(Arc::clone(&store));
        let handle = manager
            .start(
                &format!("{}/slow.zip", server.uri()),
                &dir.path().join("slow.zip"),
                "dl-slow",
            )
            .unwrap();

        assert!(manager.is_running("dl-slow"));
        assert!(manager.cancel("dl-slow"));
        let task = handle.await.unwrap().unwrap();

        assert_eq!(task.state, TransferState::Cancelled);
        assert!(!manager.is_running("dl-slow"));
        assert_eq!(store.get("dl-slow").unwrap().status, RecordStatus::Cancelled);
        assert_eq!(hub.status("dl-slow").unwrap().status, ProgressState::Cancelled);
        assert_eq!(hub.logs_by_type(LogEventType::Warning, 10).len(), 1);
        assert!(!manager.cancel("dl-slow"));
    }

    #[tokio::test]
    async fn pause_is_not_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body(1000))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResumeStore::in_memory());
        let (manager, _hub) = manager(Arc::clone(&store));
        let handle = manager
            .start_request(TransferRequest::new(
                "dl-pause",
                format!("{}/slow.zip", server.uri()),
                dir.path().join("slow.zip"),
            ))
            .unwrap();

        assert!(manager.pause("dl-pause"));
        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.state, TransferState::Paused);
        assert!(!task.state.is_terminal());
        assert_eq!(store.get("dl-pause").unwrap().status, RecordStatus::Paused);

        // Paused tasks survive clear_finished.
        assert_eq!(manager.clear_finished(), 0);
        assert!(manager.get("dl-pause").is_some());
    }

    #[tokio::test]
    async fn concurrent_transfers_wait_for_a_permit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body(64))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(ProgressHub::default());
        let manager = Arc::new(
            TransferManager::new(Client::new(), hub, Arc::new(ResumeStore::in_memory()), 1)
                .with_progress_interval(Duration::ZERO),
        );

        let first = manager
            .start(&format!("{}/a.zip", server.uri()), &dir.path().join("a.zip"), "dl-a")
            .unwrap();
        let second = manager
            .start(&format!("{}/b.zip", server.uri()), &dir.path().join("b.zip"), "dl-b")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let in_flight = server.received_requests().await.unwrap();
        assert_eq!(in_flight.len(), 1);
        let waiting = if in_flight[0].url.path() == "/a.zip" { "dl-b" } else { "dl-a" };
        assert_eq!(manager.get(waiting).unwrap().state, TransferState::Pending);

        assert_eq!(first.await.unwrap().unwrap().state, TransferState::Completed);
        assert_eq!(second.await.unwrap().unwrap().state, TransferState::Completed);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_running_id_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body(10))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (manager, _hub) = manager(Arc::new(ResumeStore::in_memory()));
        let url = format!("{}/a.zip", server.uri());
        let dest = dir.path().join("a.zip");

        let handle = manager.start(&url, &dest, "same").unwrap();
        assert!(manager.start(&url, &dest, "same").is_err());
        assert_eq!(manager.cancel_all(), 1);
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn parses_content_range_total() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, "bytes 400-999/1000".parse().unwrap());
        assert_eq!(content_range_total(&headers), Some(1000));
        headers.insert(CONTENT_RANGE, "bytes */*".parse().unwrap());
        assert_eq!(content_range_total(&headers), None);
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/pack.mrpack")),
            PathBuf::from("/tmp/pack.mrpack.part")
        );
    }
}
