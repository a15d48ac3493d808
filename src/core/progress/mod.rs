pub mod event;
pub mod hub;

pub use event::{
    HubStats, LogEvent, LogEventType, OperationKind, OverallProgress, ProgressState,
    ProgressStatus,
};
pub use hub::{ProgressHub, DEFAULT_LOG_CAPACITY};
