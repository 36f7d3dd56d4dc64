use std::path::PathBuf;

use common::BatchStatus;
use thiserror::Error;

/// The mapping payload could not be decoded as the declared kind.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Unreadable mapping file: {0}")]
    Format(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid ZIP archive: {0}")]
    Invalid(String),

    #[error("No mapping file (CSV/XLSX) found")]
    NoMappingFile,

    #[error("Archive entry '{name}' exceeds the {limit} byte decompression limit")]
    TooLarge { name: String, limit: u64 },

    #[error("Failed to write '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Max limit {max} exceeded ({total} rows)")]
    LimitExceeded { total: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Batch '{0}' not found")]
    NotFound(String),

    #[error("Batch store error: {0}")]
    Backend(String),
}

/// Failures that stop a run before its first row is attempted.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("Batch '{0}' not found")]
    NotFound(String),

    #[error("Batch '{0}' already has a run in progress")]
    AlreadyRunning(String),

    #[error("Batch '{id}' is {status}; only completed batches can be retried")]
    NotRetryable { id: String, status: BatchStatus },

    #[error("Failed to prepare '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for IssuanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => IssuanceError::NotFound(id),
            other => IssuanceError::Store(other),
        }
    }
}

/// A single row failed. Always folded into a `failed` result, never propagated.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("QR generation failed: {0}")]
    Qr(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for ItemError {
    fn from(err: lopdf::Error) -> Self {
        ItemError::Pdf(err.to_string())
    }
}

impl From<qrcode::types::QrError> for ItemError {
    fn from(err: qrcode::types::QrError) -> Self {
        ItemError::Qr(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("No issued files found for batch '{0}'")]
    NotFound(String),

    #[error("Bundle I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bundle ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
