pub mod batch;
pub mod batch_status;
pub mod config;
pub mod event;

pub use batch::{Batch, IssueTarget, QrPosition, ResultItem};
pub use batch_status::{BatchStatus, ItemStatus};
pub use config::IssuanceConfig;
pub use event::BatchEvent;
