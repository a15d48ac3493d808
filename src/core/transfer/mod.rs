pub mod manager;
pub mod record;
pub mod task;
pub mod throughput;

pub use manager::{TransferManager, DEFAULT_MAX_CONCURRENT};
pub use record::{
    IncompleteInstallRecord, InstallTarget, RecordStatus, ResumeStore, STEP_INSTALL, STEP_TRANSFER,
};
pub use task::{InstallContext, TransferEvent, TransferRequest, TransferState, TransferTask};
pub use throughput::ThroughputMeter;
