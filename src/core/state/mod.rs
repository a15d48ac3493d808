pub mod app_state;
pub mod settings;

pub use app_state::{default_data_dir, AppState};
pub use settings::PipelineSettings;
