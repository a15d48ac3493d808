use std::collections::HashMap;

use serde::Deserialize;

use super::ModpackMetadata;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::instance::LoaderType;

const UNKNOWN_VERSION: &str = "unknown";
const DEFAULT_PACK_VERSION: &str = "1.0.0";
const DEFAULT_AUTHOR: &str = "Unknown";

/// Known manifest documents, tried in `PRIORITY` order.
///
/// Each variant is a pure predicate (`matches`) plus parser (`parse`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// `modrinth.index.json` from an `.mrpack`.
    Modrinth,
    /// CurseForge `manifest.json`, or MultiMC/Prism `mmc-pack.json`.
    CurseForge,
}

impl ManifestFormat {
    pub const PRIORITY: [ManifestFormat; 2] = [ManifestFormat::Modrinth, ManifestFormat::CurseForge];

    pub fn matches(&self, entry_name: &str) -> bool {
        match self {
            ManifestFormat::Modrinth => entry_name.ends_with("modrinth.index.json"),
            ManifestFormat::CurseForge => {
                entry_name == "manifest.json" || entry_name == "mmc-pack.json"
            }
        }
    }

    /// Parse the raw manifest document. `fallback_name` is used when the
    /// document carries no name (usually the archive's file stem).
    pub fn parse(&self, raw: &[u8], fallback_name: &str) -> PipelineResult<ModpackMetadata> {
        match self {
            ManifestFormat::Modrinth => {
                let index: ModrinthIndex = serde_json::from_slice(raw)?;
                Ok(index.into_metadata(fallback_name))
            }
            ManifestFormat::CurseForge => {
                let manifest: CurseForgeManifest = serde_json::from_slice(raw)?;
                Ok(manifest.into_metadata(fallback_name))
            }
        }
    }
}

// ── Modrinth ────────────────────────────────────────────

/// Dependency keys checked in order; the first present wins.
const MODRINTH_LOADER_KEYS: [(&str, LoaderType); 4] = [
    ("fabric-loader", LoaderType::Fabric),
    ("forge", LoaderType::Forge),
    ("quilt-loader", LoaderType::Quilt),
    ("neoforge", LoaderType::NeoForge),
];

#[derive(Debug, Deserialize)]
struct ModrinthIndex {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "versionId")]
    version_id: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default, alias = "summary")]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    dependencies: HashMap<String, String>,
    #[serde(default)]
    files: Vec<serde_json::Value>,
}

impl ModrinthIndex {
    fn into_metadata(self, fallback_name: &str) -> ModpackMetadata {
        let loader = MODRINTH_LOADER_KEYS
            .iter()
            .find(|(key, _)| self.dependencies.contains_key(*key))
            .map(|(_, loader)| *loader)
            .unwrap_or(LoaderType::Vanilla);

        let mc_version = self
            .dependencies
            .get("minecraft")
            .cloned()
            .unwrap_or_else(|| UNKNOWN_VERSION.into());

        ModpackMetadata {
            id: self.id.unwrap_or_else(|| "unknown".into()),
            name: non_empty(self.name).unwrap_or_else(|| fallback_name.to_string()),
            version: self
                .version_id
                .or(self.version)
                .unwrap_or_else(|| DEFAULT_PACK_VERSION.into()),
            description: self
                .description
                .unwrap_or_else(|| "Modpack without description".into()),
            author: self.author.unwrap_or_else(|| DEFAULT_AUTHOR.into()),
            mc_version,
            loader,
            mod_count: self.files.len(),
            file_count: self.files.len(),
            thumbnail: None,
        }
    }
}

// ── CurseForge / mmc-pack ───────────────────────────────

/// Substrings tested against each `modLoaders[].id`, in order.
///
/// First match wins, so an id such as `neoforge-20.4.80` is classified as
/// `forge` because it contains that substring.
const CURSEFORGE_LOADER_NEEDLES: [(&str, LoaderType); 4] = [
    ("fabric", LoaderType::Fabric),
    ("forge", LoaderType::Forge),
    ("quilt", LoaderType::Quilt),
    ("neoforge", LoaderType::NeoForge),
];

/// mmc-pack component uids that identify a loader.
const MMC_LOADER_UIDS: [(&str, LoaderType); 4] = [
    ("net.fabricmc.fabric-loader", LoaderType::Fabric),
    ("net.minecraftforge", LoaderType::Forge),
    ("org.quiltmc.quilt-loader", LoaderType::Quilt),
    ("net.neoforged", LoaderType::NeoForge),
];

#[derive(Debug, Deserialize)]
struct CurseForgeManifest {
    #[serde(default, rename = "projectID")]
    project_id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    overrides: Option<String>,
    #[serde(default)]
    minecraft: Option<CurseForgeMinecraft>,
    #[serde(default)]
    files: Vec<serde_json::Value>,
    /// Present on `mmc-pack.json`.
    #[serde(default)]
    components: Vec<MmcComponent>,
}

#[derive(Debug, Deserialize)]
struct CurseForgeMinecraft {
    #[serde(default)]
    version: Option<String>,
    #[serde(default, rename = "modLoaders")]
    mod_loaders: Option<OneOrMany<ModLoaderEntry>>,
}

#[derive(Debug, Deserialize)]
struct ModLoaderEntry {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct MmcComponent {
    uid: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Substring classification of a CurseForge mod loader id.
pub fn loader_from_mod_loader_id(id: &str) -> Option<LoaderType> {
    CURSEFORGE_LOADER_NEEDLES
        .iter()
        .find(|(needle, _)| id.contains(needle))
        .map(|(_, loader)| *loader)
}

impl CurseForgeManifest {
    fn into_metadata(self, fallback_name: &str) -> ModpackMetadata {
        let (mc_version, loader) = match self.minecraft {
            Some(minecraft) => {
                let loader = minecraft
                    .mod_loaders
                    .map(OneOrMany::into_vec)
                    .unwrap_or_default()
                    .iter()
                    .find_map(|entry| loader_from_mod_loader_id(&entry.id))
                    .unwrap_or(LoaderType::Vanilla);
                (minecraft.version, loader)
            }
            None => mmc_components(&self.components),
        };

        let id = match self.project_id {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            _ => "unknown".into(),
        };

        let description = if self.overrides.is_some() {
            "CurseForge modpack"
        } else {
            "Modpack without description"
        };

        ModpackMetadata {
            id,
            name: non_empty(self.name).unwrap_or_else(|| fallback_name.to_string()),
            version: self.version.unwrap_or_else(|| DEFAULT_PACK_VERSION.into()),
            description: description.into(),
            author: self.author.unwrap_or_else(|| DEFAULT_AUTHOR.into()),
            mc_version: mc_version.unwrap_or_else(|| UNKNOWN_VERSION.into()),
            loader,
            mod_count: self.files.len(),
            file_count: self.files.len(),
            thumbnail: None,
        }
    }
}

fn mmc_components(components: &[MmcComponent]) -> (Option<String>, LoaderType) {
    let mc_version = components
        .iter()
        .find(|c| c.uid == "net.minecraft")
        .and_then(|c| c.version.clone());
    let loader = components
        .iter()
        .find_map(|c| {
            MMC_LOADER_UIDS
                .iter()
                .find(|(uid, _)| c.uid == *uid)
                .map(|(_, loader)| *loader)
        })
        .unwrap_or(LoaderType::Vanilla);
    (mc_version, loader)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modrinth_index_maps_dependencies() {
        let raw = br#"{
            "formatVersion": 1,
            "game": "minecraft",
            "versionId": "2.3.0",
            "name": "Fabulously Optimized",
            "summary": "Performance pack",
            "files": [{"path": "mods/sodium.jar"}, {"path": "mods/lithium.jar"}],
            "dependencies": {"minecraft": "1.20.1", "fabric-loader": "0.15.7"}
        }"#;
        let meta = ManifestFormat::Modrinth.parse(raw, "fallback").unwrap();
        assert_eq!(meta.name, "Fabulously Optimized");
        assert_eq!(meta.version, "2.3.0");
        assert_eq!(meta.description, "Performance pack");
        assert_eq!(meta.mc_version, "1.20.1");
        assert_eq!(meta.loader, LoaderType::Fabric);
        assert_eq!(meta.mod_count, 2);
    }

    #[test]
    fn modrinth_index_without_loader_is_vanilla() {
        let raw = br#"{"dependencies": {"minecraft": "1.21"}}"#;
        let meta = ManifestFormat::Modrinth.parse(raw, "My Pack").unwrap();
        assert_eq!(meta.loader, LoaderType::Vanilla);
        assert_eq!(meta.name, "My Pack");
        assert_eq!(meta.version, "1.0.0");
    }

    #[test]
    fn curseforge_manifest_reads_minecraft_block() {
        let raw = br#"{
            "manifestType": "minecraftModpack",
            "projectID": 381671,
            "name": "All the Mods 9",
            "version": "0.2.44",
            "author": "ATMTeam",
            "overrides": "overrides",
            "minecraft": {
                "version": "1.20.1",
                "modLoaders": [{"id": "forge-47.2.0", "primary": true}]
            },
            "files": [{"projectID": 1, "fileID": 2}]
        }"#;
        let meta = ManifestFormat::CurseForge.parse(raw, "fallback").unwrap();
        assert_eq!(meta.id, "381671");
        assert_eq!(meta.author, "ATMTeam");
        assert_eq!(meta.mc_version, "1.20.1");
        assert_eq!(meta.loader, LoaderType::Forge);
        assert_eq!(meta.description, "CurseForge modpack");
    }

    #[test]
    fn curseforge_single_object_mod_loader_is_accepted() {
        let raw = br#"{"minecraft": {"version": "1.19.2", "modLoaders": {"id": "quilt-0.19.0"}}}"#;
        let meta = ManifestFormat::CurseForge.parse(raw, "x").unwrap();
        assert_eq!(meta.loader, LoaderType::Quilt);
    }

    #[test]
    fn neoforge_id_is_classified_as_forge_by_substring_order() {
        // Known edge case: first-match-wins substring matching.
        assert_eq!(loader_from_mod_loader_id("neoforge-20.4.80"), Some(LoaderType::Forge));
        assert_eq!(loader_from_mod_loader_id("fabric-0.15.7"), Some(LoaderType::Fabric));
        assert_eq!(loader_from_mod_loader_id("liteloader"), None);
    }

    #[test]
    fn mmc_pack_components_are_understood() {
        let raw = br#"{
            "formatVersion": 1,
            "components": [
                {"uid": "org.lwjgl3", "version": "3.3.1"},
                {"uid": "net.minecraft", "version": "1.20.4"},
                {"uid": "net.neoforged", "version": "20.4.190"}
            ]
        }"#;
        let meta = ManifestFormat::CurseForge.parse(raw, "Prism Export").unwrap();
        assert_eq!(meta.name, "Prism Export");
        assert_eq!(meta.mc_version, "1.20.4");
        assert_eq!(meta.loader, LoaderType::NeoForge);
    }

    #[test]
    fn detectors_match_expected_entry_names() {
        assert!(ManifestFormat::Modrinth.matches("modrinth.index.json"));
        assert!(ManifestFormat::Modrinth.matches("pack/modrinth.index.json"));
        assert!(ManifestFormat::CurseForge.matches("manifest.json"));
        assert!(ManifestFormat::CurseForge.matches("mmc-pack.json"));
        assert!(!ManifestFormat::CurseForge.matches("config/manifest.json"));
    }

    #[test]
    fn malformed_manifest_is_a_json_error() {
        let err = ManifestFormat::Modrinth.parse(b"{ nope", "x").unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }
}
