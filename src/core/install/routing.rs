use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::core::instance::CONTENT_DIRS;

/// Pack folders whose prefix is stripped before routing.
const OVERRIDE_PREFIXES: [&str; 2] = ["overrides", "client-overrides"];

/// Instance folder an archive entry lands in. Folder variants are declared in
/// `CONTENT_DIRS` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRoute {
    Mods,
    ResourcePacks,
    ShaderPacks,
    Config,
    DataPacks,
    Root,
}

impl ContentRoute {
    pub const FOLDERS: [ContentRoute; CONTENT_DIRS.len()] = [
        ContentRoute::Mods,
        ContentRoute::ResourcePacks,
        ContentRoute::ShaderPacks,
        ContentRoute::Config,
        ContentRoute::DataPacks,
    ];

    pub fn dir_name(&self) -> Option<&'static str> {
        match self {
            ContentRoute::Root => None,
            folder => CONTENT_DIRS.get(*folder as usize).copied(),
        }
    }

    fn from_segment(segment: &str) -> Self {
        Self::FOLDERS
            .into_iter()
            .find(|route| route.dir_name() == Some(segment))
            .unwrap_or(ContentRoute::Root)
    }
}

/// Route a sanitized entry path. Returns the route and the path relative to
/// the instance root, or `None` when nothing is left to write.
///
/// `mods/sub/a.jar` keeps its nesting under `mods/`; an `overrides/` or
/// `client-overrides/` prefix is dropped first.
pub fn route(entry: &Path) -> Option<(ContentRoute, PathBuf)> {
    let mut parts: Vec<&str> = entry
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();

    if parts.len() > 1 && OVERRIDE_PREFIXES.contains(&parts[0]) {
        parts.remove(0);
    }
    if parts.is_empty() {
        return None;
    }

    let route = if parts.len() > 1 {
        ContentRoute::from_segment(parts[0])
    } else {
        ContentRoute::Root
    };
    Some((route, parts.iter().collect()))
}
