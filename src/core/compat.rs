// ─── Compatibility ───
// Strict match between a modpack's target runtime and existing instances.

use serde::Serialize;

use crate::core::instance::Instance;
use crate::core::manifest::ModpackMetadata;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityResult {
    pub compatible: bool,
    pub message: String,
    pub compatible_instances: Vec<Instance>,
    pub incompatible_instances: Vec<Instance>,
}

/// An instance can host the pack only on an exact version and loader match.
pub fn is_compatible(metadata: &ModpackMetadata, instance: &Instance) -> bool {
    instance.version == metadata.mc_version && instance.loader == metadata.loader
}

/// Partition `instances` into compatible and incompatible sets, preserving order.
pub fn evaluate(metadata: &ModpackMetadata, instances: &[Instance]) -> CompatibilityResult {
    let (compatible_instances, incompatible_instances): (Vec<Instance>, Vec<Instance>) = instances
        .iter()
        .cloned()
        .partition(|instance| is_compatible(metadata, instance));

    let compatible = !compatible_instances.is_empty();
    let message = if compatible {
        format!(
            "Compatible with {} existing instance(s)",
            compatible_instances.len()
        )
    } else {
        format!(
            "No existing instance runs Minecraft {} with {}",
            metadata.mc_version, metadata.loader
        )
    };

    CompatibilityResult {
        compatible,
        message,
        compatible_instances,
        incompatible_instances,
    }
}
