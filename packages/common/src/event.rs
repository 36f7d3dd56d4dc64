use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::batch::ResultItem;

/// Core event trait
#[async_trait]
pub trait Event: Send + Sync + Sized + Serialize + DeserializeOwned {
    /// Get the event topic/category (e.g., "batch:update", "batch:completed")
    fn topic(&self) -> &str;

    /// Convert event to a generic event
    fn to_generic_event(&self) -> GenericEvent {
        GenericEvent {
            topic: self.topic().to_string(),
            payload: serde_json::to_value(self).unwrap_or_default(),
        }
    }

    /// Create an event from a generic event
    fn from_generic_event(e: &GenericEvent) -> Result<Self, anyhow::Error> {
        let payload: Self = serde_json::from_value(e.payload.clone())?;
        Ok(payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Progress of an issuance run, published after every row and once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Emitted after each row attempt. `attempted` strictly increases within a run.
    Update {
        batch_id: String,
        attempted: usize,
        issued: usize,
        total: usize,
    },
    /// Emitted once when every row has been attempted.
    Completed {
        batch_id: String,
        results: Vec<ResultItem>,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            Self::Update { batch_id, .. } | Self::Completed { batch_id, .. } => batch_id,
        }
    }
}

impl Event for BatchEvent {
    fn topic(&self) -> &str {
        match self {
            Self::Update { .. } => "batch:update",
            Self::Completed { .. } => "batch:completed",
        }
    }
}
