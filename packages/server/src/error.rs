use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use issuer::archive::ArchiveMappingError;
use issuer::{
    ArchiveError, BundleError, IssuanceError, MappingError, StoreError, ValidationError,
};
use sea_orm::DbErr;
use serde::Serialize;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `NO_MAPPING_FILE`,
    /// `LIMIT_EXCEEDED`, `NOT_FOUND`, `CONFLICT`, `INTERNAL_ERROR`.
    #[schema(example = "NO_MAPPING_FILE")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "No mapping file (CSV/XLSX) found")]
    pub message: String,
    /// Row count of the rejected mapping (`LIMIT_EXCEEDED` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    /// Configured row limit (`LIMIT_EXCEEDED` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

impl ErrorBody {
    fn new(code: &'static str, message: String) -> Self {
        Self {
            code,
            message,
            total: None,
            max: None,
        }
    }
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NoMappingFile,
    LimitExceeded { total: usize, max: usize },
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("VALIDATION_ERROR", msg),
            ),
            AppError::NoMappingFile => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("NO_MAPPING_FILE", ArchiveError::NoMappingFile.to_string()),
            ),
            AppError::LimitExceeded { total, max } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    total: Some(total),
                    max: Some(max),
                    ..ErrorBody::new(
                        "LIMIT_EXCEEDED",
                        ValidationError::LimitExceeded { total, max }.to_string(),
                    )
                },
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::new("NOT_FOUND", msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorBody::new("CONFLICT", msg)),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("INTERNAL_ERROR", "An unexpected error occurred".into()),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<MappingError> for AppError {
    fn from(err: MappingError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ArchiveError> for AppError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::NoMappingFile => AppError::NoMappingFile,
            ArchiveError::Invalid(_) | ArchiveError::TooLarge { .. } => {
                AppError::Validation(err.to_string())
            }
            ArchiveError::Storage { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl From<ArchiveMappingError> for AppError {
    fn from(err: ArchiveMappingError) -> Self {
        match err {
            ArchiveMappingError::Archive(e) => e.into(),
            ArchiveMappingError::Mapping(e) => e.into(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::LimitExceeded { total, max } => {
                tracing::warn!(total, max, "Upload rejected over row limit");
                AppError::LimitExceeded { total, max }
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::Backend(detail) => AppError::Internal(detail),
        }
    }
}

impl From<IssuanceError> for AppError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::NotFound(_) => AppError::NotFound(err.to_string()),
            IssuanceError::AlreadyRunning(_) | IssuanceError::NotRetryable { .. } => {
                AppError::Conflict(err.to_string())
            }
            IssuanceError::Store(e) => e.into(),
            IssuanceError::Storage { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl From<BundleError> for AppError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::NotFound(_) => AppError::NotFound(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
