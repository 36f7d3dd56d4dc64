use async_trait::async_trait;
use common::QrPosition;
use dashmap::DashMap;

use crate::error::StoreError;

/// Read-only access to the QR placement stored on a project.
///
/// `Ok(None)` is the normal answer for an unknown project or one without a
/// saved position; callers fall back to default placement.
#[async_trait]
pub trait ProjectLookup: Send + Sync {
    async fn qr_position(&self, project_id: i32) -> Result<Option<QrPosition>, StoreError>;
}

/// Fixed placements keyed by project id.
#[derive(Default)]
pub struct MemoryProjects {
    positions: DashMap<i32, QrPosition>,
}

impl MemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_id: i32, position: QrPosition) {
        self.positions.insert(project_id, position);
    }
}

#[async_trait]
impl ProjectLookup for MemoryProjects {
    async fn qr_position(&self, project_id: i32) -> Result<Option<QrPosition>, StoreError> {
        Ok(self.positions.get(&project_id).map(|p| *p))
    }
}
