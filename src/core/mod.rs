// ─── Interface Modpacks Core ───
// Modpack acquisition and installation pipeline.
//
// Architecture:
//   core/
//     manifest/  - Source parsing, format detection, marketplace lookups
//     compat     - Instance compatibility partitioning
//     transfer/  - Resumable downloads + persisted install records
//     install/   - Archive extraction and content routing
//     progress/  - Event log + per-operation status hub
//     instance/  - Instance model + CRUD manager
//     import     - End-to-end import orchestration
//     share      - Temporary share links
//     state/     - Settings and application state

pub mod compat;
pub mod error;
pub mod http;
pub mod import;
pub mod install;
pub mod instance;
pub mod manifest;
pub mod progress;
pub mod share;
pub mod state;
pub mod transfer;
