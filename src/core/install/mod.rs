pub mod installer;
pub mod routing;

pub use installer::{
    ArchiveEntries, ArchiveEntry, ArchiveInstaller, InstallProgress, InstallReport,
    DEFAULT_SAMPLE_EVERY,
};
pub use routing::ContentRoute;
