use common::BatchStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch")]
pub struct Model {
    /// UUIDv7, also the directory key under the storage root.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Project whose QR placement applies. NULL uses the default placement.
    pub project_id: Option<i32>,

    /// Stored name of the original upload under `archives/`.
    pub archive_ref: String,

    pub total: i32,
    pub valid_count: i32,
    pub invalid_count: i32,

    pub status: BatchStatus,

    /// Result items in mapping order, stored as a JSON array.
    #[sea_orm(column_type = "JsonBinary")]
    pub results: serde_json::Value,

    pub created_at: DateTimeUtc,

    /// Archive entry the mapping was read from.
    pub mapping_ref: Option<String>,

    /// Validated `{cert_id, filename}` rows issuance walks, as a JSON array.
    #[sea_orm(column_type = "JsonBinary")]
    pub targets: serde_json::Value,
}

impl ActiveModelBehavior for ActiveModel {}
