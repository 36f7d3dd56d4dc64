use std::sync::Arc;

use issuer::{BatchStore, Broadcaster, IssuanceEngine, WorkspaceLayout};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::store::{DbBatchStore, DbProjectLookup};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DatabaseConnection,
    pub store: Arc<dyn BatchStore>,
    pub engine: IssuanceEngine,
    pub layout: WorkspaceLayout,
}

impl AppState {
    /// Wire the database-backed store and project lookup into a fresh engine.
    pub fn new(config: AppConfig, db: DatabaseConnection) -> Self {
        let layout = WorkspaceLayout::new(&config.storage.root);
        let store: Arc<dyn BatchStore> = Arc::new(DbBatchStore::new(db.clone()));
        let projects = Arc::new(DbProjectLookup::new(db.clone()));
        let engine = IssuanceEngine::new(
            store.clone(),
            projects,
            Broadcaster::new(config.issuance.event_capacity),
            layout.clone(),
            config.issuance.clone(),
        );

        Self {
            config,
            db,
            store,
            engine,
            layout,
        }
    }
}
