use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use super::settings::PipelineSettings;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::http::build_http_client;
use crate::core::import::ImportOrchestrator;
use crate::core::install::ArchiveInstaller;
use crate::core::instance::InstanceManager;
use crate::core::manifest::{ManifestAnalyzer, MarketplaceApi, ModrinthApi};
use crate::core::progress::ProgressHub;
use crate::core::share::{ShareService, SHARE_DIR_NAME};
use crate::core::transfer::{ResumeStore, TransferManager};

const APP_DIR_NAME: &str = "InterfaceModpacks";
const RESUME_FILE: &str = "incomplete-installs.json";
const INSTANCES_DIR: &str = "instances";
const DOWNLOADS_DIR: &str = "downloads";

/// Every long-lived registry, built once and shared through `Arc`.
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: PipelineSettings,
    pub http_client: Client,
    pub hub: Arc<ProgressHub>,
    pub instances: Arc<InstanceManager>,
    pub resume_store: Arc<ResumeStore>,
    pub transfers: Arc<TransferManager>,
    pub installer: Arc<ArchiveInstaller>,
    pub shares: Arc<ShareService>,
    pub orchestrator: ImportOrchestrator,
}

impl AppState {
    /// Build the state rooted at `data_dir`, or the platform data directory.
    pub async fn new(data_dir: Option<PathBuf>) -> PipelineResult<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| PipelineError::io(&data_dir, e))?;

        let settings = PipelineSettings::load(&data_dir);
        let http_client = build_http_client()?;
        let hub = Arc::new(ProgressHub::new(settings.log_capacity));

        let instances = Arc::new(InstanceManager::new(data_dir.join(INSTANCES_DIR)));
        let resume_store = Arc::new(ResumeStore::load(data_dir.join(RESUME_FILE)).await?);
        let transfers = Arc::new(
            TransferManager::new(
                http_client.clone(),
                Arc::clone(&hub),
                Arc::clone(&resume_store),
                settings.max_concurrent_transfers,
            )
            .with_progress_interval(Duration::from_millis(settings.progress_interval_ms)),
        );
        let installer = Arc::new(ArchiveInstaller::new(
            Arc::clone(&hub),
            settings.install_sample_every,
        ));
        let shares = Arc::new(
            ShareService::open(
                data_dir.join(SHARE_DIR_NAME),
                &settings.share_base_url,
                settings.share_ttl_hours,
                settings.share_max_downloads,
            )
            .await?,
        );

        let modrinth: Arc<dyn MarketplaceApi> = Arc::new(ModrinthApi::new(
            http_client.clone(),
            settings.modrinth_api_base.clone(),
        ));
        let orchestrator = ImportOrchestrator::new(
            Arc::new(ManifestAnalyzer::new(vec![modrinth])),
            Arc::clone(&instances),
            Arc::clone(&transfers),
            Arc::clone(&installer),
            Arc::clone(&hub),
            data_dir.join(DOWNLOADS_DIR),
        );

        info!("Pipeline state ready at {:?}", data_dir);
        Ok(Self {
            data_dir,
            settings,
            http_client,
            hub,
            instances,
            resume_store,
            transfers,
            installer,
            shares,
            orchestrator,
        })
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn save_settings(&self) -> PipelineResult<()> {
        self.settings.save(&self.data_dir)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_layout_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(Some(dir.path().to_path_buf())).await.unwrap();

        assert_eq!(state.settings, PipelineSettings::default());
        assert!(dir.path().join(SHARE_DIR_NAME).is_dir());
        assert_eq!(state.instances.instances_dir(), dir.path().join(INSTANCES_DIR));
        assert!(state.orchestrator.incomplete_imports().is_empty());
        assert!(state.instances.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn picks_up_saved_settings() {
        let dir = tempfile::tempdir().unwrap();
        PipelineSettings {
            log_capacity: 10,
            ..PipelineSettings::default()
        }
        .save(dir.path())
        .unwrap();

        let state = AppState::new(Some(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(state.settings.log_capacity, 10);
    }

    #[tokio::test]
    async fn save_settings_writes_the_loaded_values() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(Some(dir.path().to_path_buf())).await.unwrap();
        state.save_settings().unwrap();

        assert_eq!(PipelineSettings::load(dir.path()), state.settings);
        assert!(dir.path().join("pipeline_settings.json").is_file());
    }
}
