use async_trait::async_trait;
use common::{Batch, BatchStatus, IssueTarget, QrPosition, ResultItem};
use issuer::{BatchStore, NewBatch, ProjectLookup, StoreError};
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};

use crate::entity::{batch, project};

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn count_to_db(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("count {value} out of range")))
}

fn results_to_db(results: &[ResultItem]) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(results).map_err(|e| StoreError::Backend(e.to_string()))
}

fn targets_to_db(targets: &[IssueTarget]) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(targets).map_err(|e| StoreError::Backend(e.to_string()))
}

impl TryFrom<batch::Model> for Batch {
    type Error = StoreError;

    fn try_from(model: batch::Model) -> Result<Self, Self::Error> {
        let results: Vec<ResultItem> = serde_json::from_value(model.results).map_err(|e| {
            StoreError::Backend(format!("Corrupt results for batch '{}': {e}", model.id))
        })?;
        let targets: Vec<IssueTarget> = serde_json::from_value(model.targets).map_err(|e| {
            StoreError::Backend(format!("Corrupt targets for batch '{}': {e}", model.id))
        })?;

        Ok(Batch {
            id: model.id,
            project_id: model.project_id,
            archive_ref: model.archive_ref,
            total: u32::try_from(model.total).unwrap_or_default(),
            valid_count: u32::try_from(model.valid_count).unwrap_or_default(),
            invalid_count: u32::try_from(model.invalid_count).unwrap_or_default(),
            status: model.status,
            results,
            created_at: model.created_at,
            mapping_ref: model.mapping_ref,
            targets,
        })
    }
}

/// Batch records in the `batch` table.
#[derive(Clone)]
pub struct DbBatchStore {
    db: DatabaseConnection,
}

impl DbBatchStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Write the set columns of `model` to an existing row.
    async fn apply(&self, id: &str, model: batch::ActiveModel) -> Result<(), StoreError> {
        match model.update(&self.db).await {
            Ok(_) => Ok(()),
            Err(DbErr::RecordNotUpdated) => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(backend(e)),
        }
    }
}

#[async_trait]
impl BatchStore for DbBatchStore {
    async fn create(&self, batch: NewBatch) -> Result<Batch, StoreError> {
        let batch = batch.into_batch();
        let model = batch::ActiveModel {
            id: Set(batch.id.clone()),
            project_id: Set(batch.project_id),
            archive_ref: Set(batch.archive_ref.clone()),
            total: Set(count_to_db(batch.total)?),
            valid_count: Set(count_to_db(batch.valid_count)?),
            invalid_count: Set(count_to_db(batch.invalid_count)?),
            status: Set(batch.status),
            results: Set(results_to_db(&batch.results)?),
            created_at: Set(batch.created_at),
            mapping_ref: Set(batch.mapping_ref.clone()),
            targets: Set(targets_to_db(&batch.targets)?),
        };
        model.insert(&self.db).await.map_err(backend)?;
        Ok(batch)
    }

    async fn get(&self, id: &str) -> Result<Batch, StoreError> {
        batch::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn set_status(&self, id: &str, status: BatchStatus) -> Result<(), StoreError> {
        let model = batch::ActiveModel {
            id: Set(id.to_string()),
            status: Set(status),
            ..Default::default()
        };
        self.apply(id, model).await
    }

    async fn set_results(&self, id: &str, results: &[ResultItem]) -> Result<(), StoreError> {
        let model = batch::ActiveModel {
            id: Set(id.to_string()),
            results: Set(results_to_db(results)?),
            ..Default::default()
        };
        self.apply(id, model).await
    }

    async fn finish(
        &self,
        id: &str,
        status: BatchStatus,
        results: &[ResultItem],
    ) -> Result<(), StoreError> {
        let model = batch::ActiveModel {
            id: Set(id.to_string()),
            status: Set(status),
            results: Set(results_to_db(results)?),
            ..Default::default()
        };
        self.apply(id, model).await
    }
}

/// QR placement read from the `project` table.
#[derive(Clone)]
pub struct DbProjectLookup {
    db: DatabaseConnection,
}

impl DbProjectLookup {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProjectLookup for DbProjectLookup {
    async fn qr_position(&self, project_id: i32) -> Result<Option<QrPosition>, StoreError> {
        let project = project::Entity::find_by_id(project_id)
            .one(&self.db)
            .await
            .map_err(backend)?;

        Ok(project.map(|p| QrPosition {
            x: p.qr_x,
            y: p.qr_y,
        }))
    }
}
