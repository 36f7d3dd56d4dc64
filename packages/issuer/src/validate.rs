use std::collections::HashSet;

use common::{IssuanceConfig, IssueTarget};
use serde::Serialize;

use crate::error::ValidationError;
use crate::fields;
use crate::layout::output_name;
use crate::mapping::MappingRow;

pub const REASON_FILE_MISSING: &str = "file missing";
pub const REASON_DUPLICATE: &str = "duplicate filename";

/// Limits and estimate constants applied during validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationPolicy {
    pub max_rows: usize,
    pub chunk_size: usize,
    pub per_item_secs: f64,
    pub per_chunk_secs: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&IssuanceConfig::default())
    }
}

impl From<&IssuanceConfig> for ValidationPolicy {
    fn from(config: &IssuanceConfig) -> Self {
        Self {
            max_rows: config.max_rows,
            chunk_size: config.chunk_size.max(1),
            per_item_secs: config.per_item_secs,
            per_chunk_secs: config.per_chunk_secs,
        }
    }
}

/// A row that resolved to an archived file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidRow {
    pub cert_id: String,
    pub filename: String,
}

impl From<ValidRow> for IssueTarget {
    fn from(row: ValidRow) -> Self {
        Self {
            cert_id: row.cert_id,
            filename: row.filename,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvalidRow {
    pub row: MappingRow,
    pub reason: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: Vec<ValidRow>,
    pub invalid: Vec<InvalidRow>,
    /// Filenames of `valid`, grouped for reporting only.
    pub chunks: Vec<Vec<String>>,
    pub estimated_seconds: u64,
}

impl ValidationReport {
    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }
}

/// Partition `rows` against the archive's entry names.
///
/// Fails without partitioning when the row count is over the policy limit.
/// Filenames must match an entry exactly (case and extension included).
/// Outputs are flat, so a row whose base name was already taken by an
/// earlier row is a duplicate even when the directories differ.
pub fn validate(
    rows: Vec<MappingRow>,
    entry_names: &[&str],
    policy: &ValidationPolicy,
) -> Result<ValidationReport, ValidationError> {
    let total = rows.len();
    if total > policy.max_rows {
        return Err(ValidationError::LimitExceeded {
            total,
            max: policy.max_rows,
        });
    }

    let entries: HashSet<&str> = entry_names.iter().copied().collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut valid = Vec::new();
    let mut invalid = Vec::new();

    for row in rows {
        let resolved = fields::filename(&row)
            .filter(|name| entries.contains(name))
            .map(|name| ValidRow {
                cert_id: fields::cert_id(&row, name).to_string(),
                filename: name.to_string(),
            });

        match resolved {
            Some(item) if seen.insert(output_name(&item.filename).to_string()) => {
                valid.push(item)
            }
            Some(_) => invalid.push(InvalidRow {
                row,
                reason: REASON_DUPLICATE,
            }),
            None => invalid.push(InvalidRow {
                row,
                reason: REASON_FILE_MISSING,
            }),
        }
    }

    let chunks = plan_chunks(&valid, policy.chunk_size);
    let estimated_seconds = estimate_seconds(valid.len(), chunks.len(), policy);

    Ok(ValidationReport {
        total,
        valid,
        invalid,
        chunks,
        estimated_seconds,
    })
}

/// Split the valid list into order-preserving groups of `chunk_size`.
pub fn plan_chunks(valid: &[ValidRow], chunk_size: usize) -> Vec<Vec<String>> {
    valid
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().map(|v| v.filename.clone()).collect())
        .collect()
}

/// Advisory linear model: per-item cost plus per-chunk overhead, rounded.
pub fn estimate_seconds(items: usize, chunks: usize, policy: &ValidationPolicy) -> u64 {
    let secs = items as f64 * policy.per_item_secs + chunks as f64 * policy.per_chunk_secs;
    secs.round().max(0.0) as u64
}
