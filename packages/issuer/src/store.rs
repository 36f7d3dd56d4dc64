use async_trait::async_trait;
use chrono::Utc;
use common::{Batch, BatchStatus, IssueTarget, ResultItem};
use dashmap::DashMap;

use crate::error::StoreError;

/// Fields fixed when a batch is created from a validation report.
#[derive(Clone, Debug)]
pub struct NewBatch {
    pub id: String,
    pub project_id: Option<i32>,
    pub archive_ref: String,
    pub total: u32,
    pub valid_count: u32,
    pub invalid_count: u32,
    pub mapping_ref: Option<String>,
    pub targets: Vec<IssueTarget>,
}

impl NewBatch {
    pub fn into_batch(self) -> Batch {
        Batch {
            id: self.id,
            project_id: self.project_id,
            archive_ref: self.archive_ref,
            total: self.total,
            valid_count: self.valid_count,
            invalid_count: self.invalid_count,
            status: BatchStatus::Validated,
            results: Vec::new(),
            created_at: Utc::now(),
            mapping_ref: self.mapping_ref,
            targets: self.targets,
        }
    }
}

/// Durable batch records. Every method is a single write, so a `get` after
/// a completed update always observes it.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Persist a new batch in `validated` state.
    async fn create(&self, batch: NewBatch) -> Result<Batch, StoreError>;

    async fn get(&self, id: &str) -> Result<Batch, StoreError>;

    async fn set_status(&self, id: &str, status: BatchStatus) -> Result<(), StoreError>;

    /// Replace the whole result sequence.
    async fn set_results(&self, id: &str, results: &[ResultItem]) -> Result<(), StoreError>;

    /// Replace the result sequence and status in one write.
    async fn finish(
        &self,
        id: &str,
        status: BatchStatus,
        results: &[ResultItem],
    ) -> Result<(), StoreError>;
}

/// In-process store keyed by batch id. Updates to different ids never contend
/// on the same shard lock for longer than one write.
#[derive(Default)]
pub struct MemoryBatchStore {
    batches: DashMap<String, Batch>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Batch),
    {
        let mut batch = self
            .batches
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(&mut batch);
        Ok(())
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn create(&self, batch: NewBatch) -> Result<Batch, StoreError> {
        let batch = batch.into_batch();
        self.batches.insert(batch.id.clone(), batch.clone());
        Ok(batch)
    }

    async fn get(&self, id: &str) -> Result<Batch, StoreError> {
        self.batches
            .get(id)
            .map(|b| b.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn set_status(&self, id: &str, status: BatchStatus) -> Result<(), StoreError> {
        self.update(id, |b| b.status = status)
    }

    async fn set_results(&self, id: &str, results: &[ResultItem]) -> Result<(), StoreError> {
        self.update(id, |b| b.results = results.to_vec())
    }

    async fn finish(
        &self,
        id: &str,
        status: BatchStatus,
        results: &[ResultItem],
    ) -> Result<(), StoreError> {
        self.update(id, |b| {
            b.status = status;
            b.results = results.to_vec();
        })
    }
}
