// ─── Manifest Analysis ───
// Turns a modpack source (remote URL or local archive) into normalized
// `ModpackMetadata`.

pub mod analyzer;
pub mod formats;
pub mod marketplace;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::instance::LoaderType;

pub use analyzer::ManifestAnalyzer;
pub use formats::ManifestFormat;
pub use marketplace::{MarketplaceApi, ModrinthApi, PackDownload, MODRINTH_API_BASE};

/// Normalized description of a modpack. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModpackMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    /// Target runtime version, or "unknown".
    pub mc_version: String,
    pub loader: LoaderType,
    pub mod_count: usize,
    pub file_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Where a modpack comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModpackSource {
    Remote(Url),
    Local(PathBuf),
}

impl ModpackSource {
    /// `http`/`https` strings are remote, anything else is a local path.
    pub fn parse(raw: &str) -> PipelineResult<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|e| PipelineError::UnreadableSource {
                source_name: trimmed.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(ModpackSource::Remote(url));
        }
        Ok(ModpackSource::Local(PathBuf::from(trimmed)))
    }
}

impl std::fmt::Display for ModpackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModpackSource::Remote(url) => write!(f, "{url}"),
            ModpackSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_urls_from_paths() {
        let remote = ModpackSource::parse("https://cdn.example.com/packs/Skyblock.mrpack").unwrap();
        match remote {
            ModpackSource::Remote(url) => assert_eq!(url.path(), "/packs/Skyblock.mrpack"),
            other => panic!("expected a remote source, got {other:?}"),
        }

        let local = ModpackSource::parse("/home/alex/Downloads/pack.zip").unwrap();
        assert_eq!(local, ModpackSource::Local(PathBuf::from("/home/alex/Downloads/pack.zip")));
    }

    #[test]
    fn metadata_uses_camel_case_on_the_wire() {
        let meta = ModpackMetadata {
            id: "abc".into(),
            name: "Pack".into(),
            version: "1.0.0".into(),
            description: String::new(),
            author: "someone".into(),
            mc_version: "1.20.1".into(),
            loader: LoaderType::Fabric,
            mod_count: 3,
            file_count: 3,
            thumbnail: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["mcVersion"], "1.20.1");
        assert_eq!(json["modCount"], 3);
        assert!(json.get("thumbnail").is_none());
    }
}
