use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch_status::{BatchStatus, ItemStatus};

/// One submitted issuance job.
///
/// `valid_count + invalid_count == total` is fixed at validation time and never
/// rewritten by issuance. `results` only grows during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Batch {
    #[schema(example = "01936f0e-1234-7abc-8000-000000000001")]
    pub id: String,
    /// Project supplying QR placement. `None` means default placement.
    pub project_id: Option<i32>,
    /// Stored name of the uploaded archive.
    #[schema(example = "1731000000000_certificates.zip")]
    pub archive_ref: String,
    pub total: u32,
    pub valid_count: u32,
    pub invalid_count: u32,
    pub status: BatchStatus,
    pub results: Vec<ResultItem>,
    pub created_at: DateTime<Utc>,
    /// Archive entry the mapping was read from at upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_ref: Option<String>,
    /// Rows that passed validation, in mapping order. Issuance walks exactly these.
    #[serde(default)]
    pub targets: Vec<IssueTarget>,
}

impl Batch {
    /// Number of results currently marked issued.
    pub fn issued_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ItemStatus::Issued)
            .count()
    }
}

/// A validated row: the certificate id and the archive path it stamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct IssueTarget {
    #[schema(example = "CERT-0001")]
    pub cert_id: String,
    #[schema(example = "alice.pdf")]
    pub filename: String,
}

/// Outcome for one mapping row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResultItem {
    #[schema(example = "CERT-0001")]
    pub cert_id: String,
    #[schema(example = "alice.pdf")]
    pub filename: String,
    pub status: ItemStatus,
    /// Present only when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Present only when `status` is `issued`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ResultItem {
    pub fn issued(cert_id: String, filename: String, download_url: String) -> Self {
        Self {
            cert_id,
            filename,
            status: ItemStatus::Issued,
            reason: None,
            download_url: Some(download_url),
        }
    }

    pub fn failed(cert_id: String, filename: String, reason: impl Into<String>) -> Self {
        Self {
            cert_id,
            filename,
            status: ItemStatus::Failed,
            reason: Some(reason.into()),
            download_url: None,
        }
    }

    pub fn is_issued(&self) -> bool {
        self.status == ItemStatus::Issued
    }
}

/// QR placement stored on a project, in PDF user-space points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QrPosition {
    pub x: Option<f32>,
    pub y: Option<f32>,
}
