use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::install::DEFAULT_SAMPLE_EVERY;
use crate::core::manifest::MODRINTH_API_BASE;
use crate::core::progress::DEFAULT_LOG_CAPACITY;
use crate::core::share::DEFAULT_SHARE_BASE_URL;
use crate::core::transfer::DEFAULT_MAX_CONCURRENT;

pub const SETTINGS_FILE: &str = "pipeline_settings.json";

/// Tunables persisted as `pipeline_settings.json` in the data directory.
/// Missing keys fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_concurrent_transfers: usize,
    pub log_capacity: usize,
    pub progress_interval_ms: u64,
    pub install_sample_every: usize,
    pub share_ttl_hours: u32,
    pub share_max_downloads: u32,
    pub modrinth_api_base: String,
    pub share_base_url: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            progress_interval_ms: 250,
            install_sample_every: DEFAULT_SAMPLE_EVERY,
            share_ttl_hours: 24,
            share_max_downloads: 100,
            modrinth_api_base: MODRINTH_API_BASE.to_string(),
            share_base_url: DEFAULT_SHARE_BASE_URL.to_string(),
        }
    }
}

impl PipelineSettings {
    /// Read settings from `data_dir`; a missing or corrupt file yields defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring corrupt settings {:?}: {}", path, e);
            Self::default()
        })
    }

    pub fn save(&self, data_dir: &Path) -> PipelineResult<()> {
        std::fs::create_dir_all(data_dir).map_err(|e| PipelineError::io(data_dir, e))?;
        let path = data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| PipelineError::io(path, e))
    }
}
