pub mod manager;
pub mod model;

pub use manager::InstanceManager;
pub use model::{InstalledModpack, Instance, InstanceState, LoaderType, CONTENT_DIRS};
