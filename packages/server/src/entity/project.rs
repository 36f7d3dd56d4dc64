use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Projects are managed elsewhere; this service only reads QR placement.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "project")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    /// QR origin in PDF points from the page's lower-left corner.
    pub qr_x: Option<f32>,
    pub qr_y: Option<f32>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
