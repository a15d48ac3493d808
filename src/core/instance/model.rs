use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Supported mod loaders.
///
/// `Unknown` only appears on placeholder metadata for remote archives that
/// have not been downloaded yet; real instances always carry a concrete loader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Vanilla,
    Forge,
    Fabric,
    #[serde(rename = "neoforge")]
    NeoForge,
    Quilt,
    Unknown,
}

impl LoaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderType::Vanilla => "vanilla",
            LoaderType::Forge => "forge",
            LoaderType::Fabric => "fabric",
            LoaderType::NeoForge => "neoforge",
            LoaderType::Quilt => "quilt",
            LoaderType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LoaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoaderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" => Ok(LoaderType::Vanilla),
            "forge" => Ok(LoaderType::Forge),
            "fabric" => Ok(LoaderType::Fabric),
            "neoforge" => Ok(LoaderType::NeoForge),
            "quilt" => Ok(LoaderType::Quilt),
            "unknown" => Ok(LoaderType::Unknown),
            other => Err(format!("unknown loader '{other}'")),
        }
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Instance record exists but no content has been installed.
    Created,
    /// A modpack is being transferred or extracted into it.
    Installing,
    /// Ready to launch.
    Ready,
    /// The last install failed.
    Error,
}

/// Modpack most recently installed into an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledModpack {
    pub id: String,
    pub name: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

/// Content subdirectories every instance carries.
pub const CONTENT_DIRS: [&str; 5] = ["mods", "resourcepacks", "shaderpacks", "config", "datapacks"];

/// Instance representation persisted to disk as `instance.json`.
///
/// Each instance has its own folder with:
/// - `mods/`, `resourcepacks/`, `shaderpacks/`, `config/`, `datapacks/`
/// - `instance.json` - this serialized struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Game runtime version, e.g. "1.20.1".
    pub version: String,
    pub loader: LoaderType,
    pub path: PathBuf,

    #[serde(default)]
    pub loader_version: Option<String>,
    #[serde(default = "default_state")]
    pub state: InstanceState,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modpack: Option<InstalledModpack>,
}

fn default_state() -> InstanceState {
    InstanceState::Created
}

impl Instance {
    /// Create a new instance rooted under `base_dir/<uuid>`.
    pub fn new(
        name: String,
        version: String,
        loader: LoaderType,
        loader_version: Option<String>,
        base_dir: &Path,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let path = base_dir.join(&id);

        Self {
            id,
            name,
            version,
            loader,
            path,
            loader_version,
            state: InstanceState::Created,
            created_at: Utc::now(),
            modpack: None,
        }
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.path.join("mods")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path.join("config")
    }

    /// Path to this instance's record file.
    pub fn config_path(&self) -> PathBuf {
        self.path.join("instance.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LoaderType::NeoForge).unwrap(), "\"neoforge\"");
        let parsed: LoaderType = serde_json::from_str("\"fabric\"").unwrap();
        assert_eq!(parsed, LoaderType::Fabric);
    }

    #[test]
    fn minimal_record_deserializes_with_defaults() {
        let json = r#"{
            "id": "a1",
            "name": "Skyblock",
            "version": "1.20.1",
            "loader": "fabric",
            "path": "/instances/a1"
        }"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.state, InstanceState::Created);
        assert!(instance.modpack.is_none());
        assert_eq!(instance.mods_dir(), PathBuf::from("/instances/a1/mods"));
    }
}
