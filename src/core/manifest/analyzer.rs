use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use super::formats::ManifestFormat;
use super::marketplace::{MarketplaceApi, PackDownload};
use super::{ModpackMetadata, ModpackSource};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::instance::LoaderType;

/// Extensions accepted as direct archive links.
const ARCHIVE_EXTENSIONS: [&str; 2] = [".mrpack", ".zip"];

/// Produces `ModpackMetadata` from remote links and local archives.
pub struct ManifestAnalyzer {
    marketplaces: Vec<Arc<dyn MarketplaceApi>>,
}

impl ManifestAnalyzer {
    pub fn new(marketplaces: Vec<Arc<dyn MarketplaceApi>>) -> Self {
        Self { marketplaces }
    }

    pub async fn analyze(&self, source: &ModpackSource) -> PipelineResult<ModpackMetadata> {
        match source {
            ModpackSource::Remote(url) => self.analyze_url(url).await,
            ModpackSource::Local(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || analyze_archive(&path))
                    .await
                    .map_err(|e| PipelineError::Other(format!("analysis task failed: {e}")))?
            }
        }
    }

    async fn analyze_url(&self, url: &Url) -> PipelineResult<ModpackMetadata> {
        for marketplace in &self.marketplaces {
            if let Some(project_id) = marketplace.project_id(url) {
                return marketplace.fetch_metadata(&project_id).await;
            }
        }

        let path = url.path().to_ascii_lowercase();
        if ARCHIVE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return Ok(placeholder_for_url(url));
        }

        Err(PipelineError::UnrecognizedFormat(url.to_string()))
    }

    /// Archive to download for a remote source: the marketplace's latest pack
    /// file, or the link itself when it already points at an archive.
    pub async fn resolve_download(&self, url: &Url) -> PipelineResult<PackDownload> {
        for marketplace in &self.marketplaces {
            if let Some(project_id) = marketplace.project_id(url) {
                return marketplace.fetch_download(&project_id).await;
            }
        }

        let path = url.path().to_ascii_lowercase();
        if ARCHIVE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return Ok(PackDownload {
                url: url.to_string(),
                file_name: placeholder_for_url(url).name,
                sha1: None,
            });
        }

        Err(PipelineError::UnrecognizedFormat(url.to_string()))
    }
}

/// Metadata for a direct archive link, produced without downloading it.
fn placeholder_for_url(url: &Url) -> ModpackMetadata {
    let basename = url
        .path_segments()
        .and_then(|s| s.last())
        .filter(|s| !s.is_empty())
        .unwrap_or("modpack")
        .to_string();

    ModpackMetadata {
        id: format!("url-{}", slug(&basename)),
        name: basename,
        version: "1.0.0".into(),
        description: format!("Remote archive: {url}"),
        author: "Remote".into(),
        mc_version: "unknown".into(),
        loader: LoaderType::Unknown,
        mod_count: 0,
        file_count: 0,
        thumbnail: None,
    }
}

/// Inspect a local archive. Blocking; call from the blocking pool.
pub fn analyze_archive(path: &Path) -> PipelineResult<ModpackMetadata> {
    let unreadable = |reason: String| PipelineError::UnreadableSource {
        source_name: path.display().to_string(),
        reason,
    };

    let file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| unreadable(e.to_string()))?;
    let fallback_name = file_stem(path);

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    for format in ManifestFormat::PRIORITY {
        let Some(entry_name) = names.iter().find(|n| format.matches(n)) else {
            continue;
        };

        let mut raw = Vec::new();
        archive
            .by_name(entry_name)
            .map_err(|e| unreadable(e.to_string()))?
            .read_to_end(&mut raw)
            .map_err(|e| unreadable(e.to_string()))?;

        let metadata = format
            .parse(&raw, &fallback_name)
            .map_err(|e| unreadable(format!("{entry_name}: {e}")))?;
        info!(
            "Detected {:?} manifest in {:?}: {} ({} {})",
            format, path, metadata.name, metadata.mc_version, metadata.loader
        );
        return Ok(metadata);
    }

    // No known manifest: accept as a generic bundle.
    let degraded = PipelineError::UnrecognizedFormat(path.display().to_string());
    warn!("{degraded}; treating as a generic archive");

    Ok(ModpackMetadata {
        id: format!("local-{}", slug(&fallback_name)),
        name: fallback_name,
        version: "1.0.0".into(),
        description: "Local archive without metadata".into(),
        author: "User".into(),
        mc_version: "unknown".into(),
        loader: LoaderType::Vanilla,
        mod_count: 0,
        file_count: archive.len(),
        thumbnail: None,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "modpack".into())
}

fn slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    fn analyzer() -> ManifestAnalyzer {
        ManifestAnalyzer::new(Vec::new())
    }

    #[tokio::test]
    async fn modrinth_pack_is_detected_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("Simply Optimized.mrpack");
        write_zip(
            &pack,
            &[
                (
                    "modrinth.index.json",
                    br#"{"name":"Simply Optimized","versionId":"1.0",
                        "dependencies":{"minecraft":"1.20.1","fabric-loader":"0.14.21"},
                        "files":[{"path":"mods/a.jar"}]}"#,
                ),
                ("overrides/config/sodium.json", b"{}"),
            ],
        );

        let source = ModpackSource::Local(pack);
        let first = analyzer().analyze(&source).await.unwrap();
        let second = analyzer().analyze(&source).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.loader, LoaderType::Fabric);
        assert_eq!(first.mc_version, "1.20.1");
        assert_eq!(first.mod_count, 1);
    }

    #[tokio::test]
    async fn curseforge_pack_is_detected_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("atm.zip");
        write_zip(
            &pack,
            &[
                (
                    "manifest.json",
                    br#"{"projectID":123,"name":"ATM","version":"1.2","author":"team",
                        "minecraft":{"version":"1.19.2","modLoaders":[{"id":"forge-43.2.0"}]},
                        "files":[{},{}],"overrides":"overrides"}"#,
                ),
                ("overrides/mods/extra.jar", b"jar"),
            ],
        );

        let source = ModpackSource::Local(pack);
        let first = analyzer().analyze(&source).await.unwrap();
        assert_eq!(first, analyzer().analyze(&source).await.unwrap());
        assert_eq!(first.id, "123");
        assert_eq!(first.loader, LoaderType::Forge);
        assert_eq!(first.file_count, 2);
    }

    #[tokio::test]
    async fn modrinth_index_wins_over_curseforge_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("both.zip");
        write_zip(
            &pack,
            &[
                ("manifest.json", br#"{"minecraft":{"version":"1.16.5","modLoaders":[{"id":"forge-36"}]}}"#),
                ("modrinth.index.json", br#"{"dependencies":{"minecraft":"1.20.1","quilt-loader":"0.20"}}"#),
            ],
        );

        let meta = analyze_archive(&pack).unwrap();
        assert_eq!(meta.loader, LoaderType::Quilt);
        assert_eq!(meta.mc_version, "1.20.1");
    }

    #[tokio::test]
    async fn generic_archive_degrades_to_best_effort_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let pack = dir.path().join("My Cool Pack.zip");
        write_zip(&pack, &[("mods/a.jar", b"a"), ("README.txt", b"hi"), ("config/x.toml", b"")]);

        let source = ModpackSource::Local(pack);
        let first = analyzer().analyze(&source).await.unwrap();
        let second = analyzer().analyze(&source).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "My Cool Pack");
        assert_eq!(first.id, "local-my-cool-pack");
        assert_eq!(first.file_count, 3);
        assert_eq!(first.mc_version, "unknown");
    }

    #[tokio::test]
    async fn missing_or_corrupt_archive_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ModpackSource::Local(dir.path().join("nope.zip"));
        assert!(matches!(
            analyzer().analyze(&missing).await,
            Err(PipelineError::UnreadableSource { .. })
        ));

        let garbage = dir.path().join("garbage.zip");
        std::fs::write(&garbage, b"definitely not a zip").unwrap();
        assert!(matches!(
            analyzer().analyze(&ModpackSource::Local(garbage)).await,
            Err(PipelineError::UnreadableSource { .. })
        ));
    }

    #[tokio::test]
    async fn direct_archive_link_yields_placeholder() {
        let source = ModpackSource::parse("https://files.example.net/packs/Skyfactory.mrpack").unwrap();
        let meta = analyzer().analyze(&source).await.unwrap();
        assert_eq!(meta.name, "Skyfactory.mrpack");
        assert_eq!(meta.loader, LoaderType::Unknown);
        assert_eq!(meta.mc_version, "unknown");
        assert_eq!(meta, analyzer().analyze(&source).await.unwrap());
    }

    #[tokio::test]
    async fn direct_link_downloads_itself() {
        let url = Url::parse("https://files.example.net/packs/Skyfactory.mrpack").unwrap();
        let download = analyzer().resolve_download(&url).await.unwrap();
        assert_eq!(download.url, url.as_str());
        assert_eq!(download.file_name, "Skyfactory.mrpack");
        assert_eq!(download.sha1, None);
    }

    #[tokio::test]
    async fn unrelated_url_is_unrecognized() {
        let source = ModpackSource::parse("https://example.com/some/page").unwrap();
        assert!(matches!(
            analyzer().analyze(&source).await,
            Err(PipelineError::UnrecognizedFormat(_))
        ));
    }
}
