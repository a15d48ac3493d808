use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::model::{Instance, InstanceState, CONTENT_DIRS};
use crate::core::error::{PipelineError, PipelineResult};

/// Manages instance records on disk.
pub struct InstanceManager {
    /// Root directory where all instances live.
    instances_dir: PathBuf,
}

impl InstanceManager {
    pub fn new(instances_dir: PathBuf) -> Self {
        Self { instances_dir }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Create a new instance on disk with its content directories.
    pub async fn create(&self, mut instance: Instance) -> PipelineResult<Instance> {
        instance.path = self.instances_dir.join(&instance.id);

        if instance.path.exists() {
            return Err(PipelineError::InstanceAlreadyExists(instance.id.clone()));
        }

        for subdir in CONTENT_DIRS {
            create_dir_safe(&instance.path.join(subdir)).await?;
        }

        self.save(&instance).await?;

        info!("Created instance '{}' ({})", instance.name, instance.id);
        Ok(instance)
    }

    /// Save instance metadata to disk.
    pub async fn save(&self, instance: &Instance) -> PipelineResult<()> {
        let json = serde_json::to_string_pretty(instance)?;
        let config_path = instance.config_path();

        if let Some(parent) = config_path.parent() {
            create_dir_safe(parent).await?;
        }

        tokio::fs::write(&config_path, json)
            .await
            .map_err(|e| PipelineError::io(config_path, e))?;

        Ok(())
    }

    /// Load a single instance by ID.
    pub async fn load(&self, id: &str) -> PipelineResult<Instance> {
        let config_path = self.instances_dir.join(id).join("instance.json");
        if !config_path.exists() {
            return Err(PipelineError::InstanceNotFound(id.to_string()));
        }

        let json = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| PipelineError::io(config_path.clone(), e))?;

        let instance: Instance = serde_json::from_str(&json)?;
        Ok(instance)
    }

    /// List all instances. Unreadable records are skipped with a warning.
    pub async fn list(&self) -> PipelineResult<Vec<Instance>> {
        let mut instances = Vec::new();

        if !self.instances_dir.exists() {
            return Ok(instances);
        }

        let mut entries = tokio::fs::read_dir(&self.instances_dir)
            .await
            .map_err(|e| PipelineError::io(self.instances_dir.clone(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(self.instances_dir.clone(), e))?
        {
            let config_path = entry.path().join("instance.json");
            if !config_path.exists() {
                continue;
            }
            match tokio::fs::read_to_string(&config_path).await {
                Ok(json) => match serde_json::from_str::<Instance>(&json) {
                    Ok(inst) => instances.push(inst),
                    Err(e) => warn!("Corrupt instance.json at {:?}: {}", config_path, e),
                },
                Err(e) => warn!("Cannot read {:?}: {}", config_path, e),
            }
        }

        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(instances)
    }

    /// Delete an instance from disk.
    pub async fn delete(&self, id: &str) -> PipelineResult<()> {
        let instance_dir = self.instances_dir.join(id);
        if !instance_dir.exists() {
            return Err(PipelineError::InstanceNotFound(id.to_string()));
        }

        tokio::fs::remove_dir_all(&instance_dir)
            .await
            .map_err(|e| PipelineError::io(instance_dir, e))?;

        info!("Deleted instance {}", id);
        Ok(())
    }

    /// Update instance state and persist.
    pub async fn set_state(
        &self,
        instance: &mut Instance,
        state: InstanceState,
    ) -> PipelineResult<()> {
        instance.state = state;
        self.save(instance).await
    }
}

async fn create_dir_safe(path: &Path) -> PipelineResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| PipelineError::io(path, source))
}
