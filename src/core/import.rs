// ─── Import orchestration ───
// analyze → compatibility → transfer (remote only) → install → instance record.
// Each import is tracked in the ResumeStore under its import id until every
// step has completed, so an interrupted import can be picked up with `resume`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::compat::{self, CompatibilityResult};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::install::{ArchiveInstaller, InstallReport};
use crate::core::instance::{InstalledModpack, Instance, InstanceManager, InstanceState, LoaderType};
use crate::core::manifest::analyzer::analyze_archive;
use crate::core::manifest::{ManifestAnalyzer, ModpackMetadata, ModpackSource};
use crate::core::progress::ProgressHub;
use crate::core::transfer::{
    IncompleteInstallRecord, InstallContext, InstallTarget, TransferManager, TransferRequest,
    TransferState, STEP_INSTALL, STEP_TRANSFER,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub import_id: String,
    pub instance: Instance,
    pub report: InstallReport,
}

pub struct ImportOrchestrator {
    analyzer: Arc<ManifestAnalyzer>,
    instances: Arc<InstanceManager>,
    transfers: Arc<TransferManager>,
    installer: Arc<ArchiveInstaller>,
    hub: Arc<ProgressHub>,
    downloads_dir: PathBuf,
}

impl ImportOrchestrator {
    pub fn new(
        analyzer: Arc<ManifestAnalyzer>,
        instances: Arc<InstanceManager>,
        transfers: Arc<TransferManager>,
        installer: Arc<ArchiveInstaller>,
        hub: Arc<ProgressHub>,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            analyzer,
            instances,
            transfers,
            installer,
            hub,
            downloads_dir,
        }
    }

    pub async fn analyze(&self, source: &str) -> PipelineResult<ModpackMetadata> {
        let source = ModpackSource::parse(source)?;
        self.analyzer.analyze(&source).await
    }

    pub async fn check_compatibility(
        &self,
        metadata: &ModpackMetadata,
    ) -> PipelineResult<CompatibilityResult> {
        let instances = self.instances.list().await?;
        Ok(compat::evaluate(metadata, &instances))
    }

    /// Install `source` into an existing instance.
    pub async fn import_into(
        &self,
        source: &str,
        instance_id: &str,
        allow_incompatible: bool,
    ) -> PipelineResult<ImportOutcome> {
        let prepared = async {
            let parsed = ModpackSource::parse(source)?;
            let metadata = self.analyzer.analyze(&parsed).await?;
            let instance = self.instances.load(instance_id).await?;

            // Placeholder metadata is checked once the archive is on disk.
            if metadata.loader != LoaderType::Unknown {
                ensure_compatible(&metadata, &instance, allow_incompatible)?;
            }
            Ok::<_, PipelineError>((parsed, metadata, instance))
        }
        .await;

        match prepared {
            Ok((parsed, metadata, instance)) => {
                let target = InstallTarget::Existing { allow_incompatible };
                self.run(parsed, metadata, instance, target).await
            }
            Err(error) => Err(self.fail(source, error)),
        }
    }

    /// Create an instance matching `metadata` and install `source` into it.
    pub async fn import_and_create(
        &self,
        source: &str,
        metadata: ModpackMetadata,
    ) -> PipelineResult<ImportOutcome> {
        let prepared = async {
            let parsed = ModpackSource::parse(source)?;
            let loader = match metadata.loader {
                LoaderType::Unknown => LoaderType::Vanilla,
                loader => loader,
            };
            let instance = Instance::new(
                metadata.name.clone(),
                metadata.mc_version.clone(),
                loader,
                None,
                self.instances.instances_dir(),
            );
            let instance = self.instances.create(instance).await?;
            Ok::<_, PipelineError>((parsed, instance))
        }
        .await;

        match prepared {
            Ok((parsed, instance)) => {
                self.hub.info(
                    format!("Created instance {} for {}", instance.name, metadata.name),
                    instance.path.to_str(),
                );
                self.run(parsed, metadata, instance, InstallTarget::Created).await
            }
            Err(error) => Err(self.fail(source, error)),
        }
    }

    /// Continue an interrupted import from its persisted record.
    pub async fn resume(&self, import_id: &str) -> PipelineResult<ImportOutcome> {
        let prepared = async {
            let record = self
                .transfers
                .store()
                .get(import_id)
                .filter(|r| r.instance_id.is_some())
                .ok_or_else(|| PipelineError::ResumeTargetNotFound(import_id.to_string()))?;
            let instance_id = record.instance_id.clone().unwrap_or_default();
            let mut instance = self.instances.load(&instance_id).await?;
            self.instances
                .set_state(&mut instance, InstanceState::Installing)
                .await?;
            Ok::<_, PipelineError>((record, instance))
        }
        .await;

        let (record, mut instance) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => return Err(self.fail(import_id, error)),
        };
        info!(
            "Resuming import {} into {} at step {}",
            import_id, instance.name, record.current_step
        );

        let result = self.resume_steps(&record, &mut instance).await;
        self.conclude(import_id, instance, result).await
    }

    /// Imports with steps left, oldest first.
    pub fn incomplete_imports(&self) -> Vec<IncompleteInstallRecord> {
        self.transfers.store().incomplete()
    }

    // ── Steps ───────────────────────────────────────────

    async fn run(
        &self,
        source: ModpackSource,
        metadata: ModpackMetadata,
        mut instance: Instance,
        target: InstallTarget,
    ) -> PipelineResult<ImportOutcome> {
        let label = source.to_string();
        if self.transfers.store().is_installing_into(&instance.path) {
            let error = PipelineError::Other(format!(
                "An import into {} is already running",
                instance.name
            ));
            return Err(self.fail(&label, error));
        }

        let import_id = format!("import-{}", Uuid::new_v4());
        info!("Import {}: {} -> {}", import_id, label, instance.name);
        if let Err(error) = self
            .instances
            .set_state(&mut instance, InstanceState::Installing)
            .await
        {
            return Err(self.fail(&label, error));
        }

        let result = self
            .acquire_and_install(&import_id, &source, metadata, &mut instance, target)
            .await;
        self.conclude(&import_id, instance, result).await
    }

    async fn acquire_and_install(
        &self,
        import_id: &str,
        source: &ModpackSource,
        metadata: ModpackMetadata,
        instance: &mut Instance,
        target: InstallTarget,
    ) -> PipelineResult<InstallReport> {
        let context = install_context(instance, &metadata, target);

        let (archive, downloaded) = match source {
            ModpackSource::Remote(url) => {
                let download = self.analyzer.resolve_download(url).await?;
                let destination = self
                    .downloads_dir
                    .join(format!("{}-{}", import_id, safe_file_name(&download.file_name)));

                let mut request = TransferRequest::new(import_id, &download.url, &destination)
                    .with_install(context);
                if let Some(sha1) = download.sha1 {
                    request = request.with_sha1(sha1);
                }

                let task = self.transfers.download(request).await?;
                if task.state != TransferState::Completed {
                    return Err(PipelineError::Cancelled(import_id.to_string()));
                }
                (destination, true)
            }
            ModpackSource::Local(path) => {
                let mut record = IncompleteInstallRecord::new(import_id, 1, STEP_INSTALL);
                apply_context(&mut record, context);
                record.archive_path = Some(path.clone());
                self.transfers.store().track(record).await?;
                (path.clone(), false)
            }
        };

        let metadata = if metadata.loader == LoaderType::Unknown {
            self.inspect(&archive).await?
        } else {
            metadata
        };

        apply_target(&metadata, instance, target)?;
        self.install_step(import_id, &archive, instance, installed(&metadata), downloaded)
            .await
    }

    async fn resume_steps(
        &self,
        record: &IncompleteInstallRecord,
        instance: &mut Instance,
    ) -> PipelineResult<InstallReport> {
        if record.current_step == STEP_TRANSFER {
            let task = self.transfers.resume(&record.id).await?;
            if task.state != TransferState::Completed {
                return Err(PipelineError::Cancelled(record.id.clone()));
            }
        }

        let archive = record.archive_path.clone().ok_or_else(|| {
            PipelineError::Other(format!("Import {} has no archive to install", record.id))
        })?;
        // The consent given with the original request still applies.
        let metadata = self.inspect(&archive).await?;
        apply_target(&metadata, instance, record.target)?;
        let modpack = record.modpack.clone().unwrap_or_else(|| installed(&metadata));

        self.install_step(&record.id, &archive, instance, modpack, record.source_url.is_some())
            .await
    }

    async fn install_step(
        &self,
        import_id: &str,
        archive: &Path,
        instance: &mut Instance,
        modpack: InstalledModpack,
        downloaded: bool,
    ) -> PipelineResult<InstallReport> {
        let store = self.transfers.store();
        store.checkpoint_install(import_id, 0.0).await?;

        let report = self
            .installer
            .install_as(import_id, archive, &instance.path, |_| {})
            .await?;
        store.complete_step(import_id, None).await?;

        if downloaded {
            if let Err(e) = tokio::fs::remove_file(archive).await {
                warn!("Could not remove downloaded archive {:?}: {}", archive, e);
            }
        }

        self.hub.success(
            format!("Imported {} {} into {}", modpack.name, modpack.version, instance.name),
            instance.path.to_str(),
        );
        instance.modpack = Some(InstalledModpack {
            installed_at: Utc::now(),
            ..modpack
        });
        instance.state = InstanceState::Ready;
        self.instances.save(instance).await?;
        Ok(report)
    }

    /// Log a failure that happened before an import was tracked.
    fn fail(&self, subject: &str, error: PipelineError) -> PipelineError {
        self.hub.error(
            format!("Import of {} failed: {}", subject, error),
            Some(serde_json::json!({ "resumable": false })),
            None,
        );
        error
    }

    /// Drop a refused import: its record and any archive it downloaded.
    async fn discard(&self, import_id: &str) {
        let store = self.transfers.store();
        let Some(record) = store.get(import_id) else {
            return;
        };
        if record.source_url.is_some() {
            if let Some(archive) = &record.archive_path {
                if let Err(e) = tokio::fs::remove_file(archive).await {
                    warn!("Could not remove downloaded archive {:?}: {}", archive, e);
                }
            }
        }
        if let Err(e) = store.remove(import_id).await {
            warn!("Could not drop install record {}: {}", import_id, e);
        }
    }

    /// Metadata read from a downloaded archive.
    async fn inspect(&self, archive: &Path) -> PipelineResult<ModpackMetadata> {
        let path = archive.to_path_buf();
        tokio::task::spawn_blocking(move || analyze_archive(&path))
            .await
            .map_err(|e| PipelineError::Other(format!("analysis task failed: {e}")))?
    }

    /// Record the outcome on the instance and the resume record.
    async fn conclude(
        &self,
        import_id: &str,
        mut instance: Instance,
        result: PipelineResult<InstallReport>,
    ) -> PipelineResult<ImportOutcome> {
        match result {
            Ok(report) => {
                info!("Import {} finished: {} file(s)", import_id, report.files_written);
                Ok(ImportOutcome {
                    import_id: import_id.to_string(),
                    instance,
                    report,
                })
            }
            Err(error) => {
                // Cancelled and refused imports leave the instance as it was.
                let untouched = matches!(
                    error,
                    PipelineError::Cancelled(_) | PipelineError::IncompatibleTarget { .. }
                );
                let state = match instance.modpack {
                    _ if !untouched => InstanceState::Error,
                    None => InstanceState::Created,
                    Some(_) => InstanceState::Ready,
                };
                if let Err(e) = self.instances.set_state(&mut instance, state).await {
                    warn!("Could not update instance {}: {}", instance.id, e);
                }

                match error {
                    PipelineError::Cancelled(_) => {}
                    PipelineError::IncompatibleTarget { .. } => self.discard(import_id).await,
                    _ => {
                        if let Err(e) = self
                            .transfers
                            .store()
                            .mark_error(import_id, &error.to_string())
                            .await
                        {
                            warn!("Could not update install record {}: {}", import_id, e);
                        }
                    }
                }

                self.hub.error(
                    format!("Import into {} failed: {}", instance.name, error),
                    Some(serde_json::json!({
                        "importId": import_id,
                        "resumable": error.is_transient(),
                    })),
                    instance.path.to_str(),
                );
                Err(error)
            }
        }
    }
}

/// Check the target against the pack, or let a created instance adopt it.
fn apply_target(
    metadata: &ModpackMetadata,
    instance: &mut Instance,
    target: InstallTarget,
) -> PipelineResult<()> {
    match target {
        InstallTarget::Created => {
            instance.version = metadata.mc_version.clone();
            if metadata.loader != LoaderType::Unknown {
                instance.loader = metadata.loader;
            }
            Ok(())
        }
        InstallTarget::Existing { allow_incompatible } => {
            ensure_compatible(metadata, instance, allow_incompatible)
        }
    }
}

fn ensure_compatible(
    metadata: &ModpackMetadata,
    instance: &Instance,
    allow_incompatible: bool,
) -> PipelineResult<()> {
    if allow_incompatible || compat::is_compatible(metadata, instance) {
        return Ok(());
    }
    Err(PipelineError::IncompatibleTarget {
        instance: instance.name.clone(),
        instance_version: instance.version.clone(),
        instance_loader: instance.loader.to_string(),
        pack_version: metadata.mc_version.clone(),
        pack_loader: metadata.loader.to_string(),
    })
}

fn installed(metadata: &ModpackMetadata) -> InstalledModpack {
    InstalledModpack {
        id: metadata.id.clone(),
        name: metadata.name.clone(),
        version: metadata.version.clone(),
        installed_at: Utc::now(),
    }
}

fn install_context(
    instance: &Instance,
    metadata: &ModpackMetadata,
    target: InstallTarget,
) -> InstallContext {
    InstallContext {
        instance_id: Some(instance.id.clone()),
        instance_name: instance.name.clone(),
        instance_path: instance.path.clone(),
        loader: instance.loader,
        mc_version: instance.version.clone(),
        loader_version: instance.loader_version.clone(),
        // Placeholder metadata is replaced after inspection.
        modpack: (metadata.loader != LoaderType::Unknown).then(|| installed(metadata)),
        target,
    }
}

fn apply_context(record: &mut IncompleteInstallRecord, context: InstallContext) {
    record.instance_id = context.instance_id;
    record.instance_name = context.instance_name;
    record.instance_path = context.instance_path;
    record.loader = context.loader;
    record.mc_version = context.mc_version;
    record.loader_version = context.loader_version;
    record.modpack = context.modpack;
    record.target = context.target;
}

fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}
