//! Core of bulk certificate issuance: archive ingestion, mapping validation,
//! QR stamping, batch persistence contracts and result bundling.

pub mod archive;
pub mod broadcast;
pub mod bundle;
pub mod engine;
pub mod error;
pub mod fields;
pub mod layout;
pub mod mapping;
pub mod project;
pub mod stamp;
pub mod store;
pub mod validate;

pub use archive::Archive;
pub use broadcast::Broadcaster;
pub use engine::{IssuanceEngine, IssuanceRun};
pub use error::{
    ArchiveError, BundleError, IssuanceError, ItemError, MappingError, StoreError,
    ValidationError,
};
pub use layout::WorkspaceLayout;
pub use project::{MemoryProjects, ProjectLookup};
pub use store::{BatchStore, MemoryBatchStore, NewBatch};
pub use validate::{ValidationPolicy, ValidationReport, validate};
