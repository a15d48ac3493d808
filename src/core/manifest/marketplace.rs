use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::ModpackMetadata;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::instance::LoaderType;

pub const MODRINTH_API_BASE: &str = "https://api.modrinth.com/v2";

/// Read-only marketplace lookup used for remote modpack pages.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Project id if `url` points at a project page this marketplace serves.
    fn project_id(&self, url: &Url) -> Option<String>;

    async fn fetch_metadata(&self, project_id: &str) -> PipelineResult<ModpackMetadata>;

    /// Pack file of the latest version.
    async fn fetch_download(&self, project_id: &str) -> PipelineResult<PackDownload>;
}

/// Where to fetch a pack archive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackDownload {
    pub url: String,
    pub file_name: String,
    pub sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModrinthProject {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModrinthVersion {
    name: String,
    version_number: String,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    loaders: Vec<String>,
    #[serde(default)]
    files: Vec<ModrinthFile>,
}

#[derive(Debug, Deserialize)]
struct ModrinthFile {
    url: String,
    filename: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    hashes: HashMap<String, String>,
}

/// Modrinth Labrinth API client.
pub struct ModrinthApi {
    client: Client,
    base_url: String,
}

impl ModrinthApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> PipelineResult<T> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::UnreadableSource {
                source_name: url.to_string(),
                reason: format!("Modrinth returned HTTP {}", resp.status()),
            });
        }

        Ok(resp.json::<T>().await?)
    }

    async fn latest_version(&self, project_id: &str) -> PipelineResult<ModrinthVersion> {
        let versions: Vec<ModrinthVersion> = self
            .get_json(&format!("{}/project/{}/version", self.base_url, project_id))
            .await?;

        // Labrinth lists newest first.
        versions
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::UnreadableSource {
                source_name: project_id.to_string(),
                reason: "project has no published versions".into(),
            })
    }
}

#[async_trait]
impl MarketplaceApi for ModrinthApi {
    fn project_id(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        if host != "modrinth.com" && !host.ends_with(".modrinth.com") {
            return None;
        }
        let mut segments = url.path_segments()?;
        match (segments.next(), segments.next()) {
            (Some("mod" | "modpack"), Some(id)) if !id.is_empty() => Some(id.to_string()),
            _ => None,
        }
    }

    async fn fetch_metadata(&self, project_id: &str) -> PipelineResult<ModpackMetadata> {
        info!("Fetching Modrinth metadata for {}", project_id);

        let project: ModrinthProject = self
            .get_json(&format!("{}/project/{}", self.base_url, project_id))
            .await?;
        let latest = self.latest_version(project_id).await?;

        let loader = latest
            .loaders
            .first()
            .and_then(|l| l.parse::<LoaderType>().ok())
            .unwrap_or(LoaderType::Vanilla);

        Ok(ModpackMetadata {
            id: project_id.to_string(),
            name: project.title.unwrap_or(latest.name),
            version: latest.version_number,
            description: project
                .description
                .unwrap_or_else(|| "Modpack from Modrinth".into()),
            author: "Modrinth creator".into(),
            mc_version: latest
                .game_versions
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown".into()),
            loader,
            mod_count: latest.files.len(),
            file_count: latest.files.len(),
            thumbnail: project.icon_url,
        })
    }

    async fn fetch_download(&self, project_id: &str) -> PipelineResult<PackDownload> {
        let latest = self.latest_version(project_id).await?;
        let primary = latest.files.iter().position(|f| f.primary).unwrap_or(0);
        let file = latest
            .files
            .into_iter()
            .nth(primary)
            .ok_or_else(|| PipelineError::UnreadableSource {
                source_name: project_id.to_string(),
                reason: format!("version {} has no files", latest.version_number),
            })?;
        debug!("Latest {} file: {}", project_id, file.filename);

        Ok(PackDownload {
            sha1: file.hashes.get("sha1").cloned(),
            url: file.url,
            file_name: file.filename,
        })
    }
}
