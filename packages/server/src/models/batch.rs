use common::BatchStatus;
use issuer::ValidationReport;
use issuer::mapping::MappingRow;
use serde::{Deserialize, Serialize};

/// Counts and plan computed at upload time.
#[derive(Serialize, utoipa::ToSchema)]
pub struct BatchSummary {
    /// Mapping rows read from the archive.
    #[schema(example = 3)]
    pub total: usize,
    #[schema(example = 2)]
    pub valid: usize,
    #[schema(example = 1)]
    pub invalid: usize,
    /// Advisory issuance time estimate.
    #[schema(example = 1)]
    pub estimated_seconds: u64,
    /// Valid filenames in groups of the configured chunk size.
    #[schema(example = json!([["alice.pdf", "bob.pdf"]]))]
    pub chunks: Vec<Vec<String>>,
}

/// A mapping row that will not be issued.
#[derive(Serialize, utoipa::ToSchema)]
pub struct InvalidRowResponse {
    /// The row as read, keyed by header.
    #[schema(value_type = Object, example = json!({"filename": "carol.pdf", "certificateId": "C-3"}))]
    pub row: MappingRow,
    /// `file missing` or `duplicate filename`.
    #[schema(example = "file missing")]
    pub reason: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadBatchResponse {
    #[schema(example = "01936f0e-1234-7abc-8000-000000000001")]
    pub batch_id: String,
    pub summary: BatchSummary,
    pub invalid_rows: Vec<InvalidRowResponse>,
}

impl UploadBatchResponse {
    pub fn new(batch_id: String, report: ValidationReport) -> Self {
        let summary = BatchSummary {
            total: report.total,
            valid: report.valid_count(),
            invalid: report.invalid_count(),
            estimated_seconds: report.estimated_seconds,
            chunks: report.chunks,
        };
        let invalid_rows = report
            .invalid
            .into_iter()
            .map(|r| InvalidRowResponse {
                row: r.row,
                reason: r.reason.to_string(),
            })
            .collect();

        Self {
            batch_id,
            summary,
            invalid_rows,
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct StartBatchRequest {
    #[schema(example = "01936f0e-1234-7abc-8000-000000000001")]
    pub batch_id: String,
}

/// Acknowledgement that a run was accepted; progress follows on the event stream.
#[derive(Serialize, utoipa::ToSchema)]
pub struct RunAcceptedResponse {
    pub batch_id: String,
    pub status: BatchStatus,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    /// Only forward events for this batch.
    pub batch_id: Option<String>,
}
