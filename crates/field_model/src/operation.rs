//! Queued write operations

use crate::{Action, EntityId, EntityType, ModelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A write that could not be confirmed synchronously and waits in the queue.
///
/// The operation shares its `id` with the draft created alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: EntityId,
    pub action: Action,
    pub entity_type: EntityType,
    /// Entity addressed by an update or delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntityId>,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    /// Sent with every delivery attempt so the server can deduplicate replays
    pub idempotency_key: String,
}

impl PendingOperation {
    /// Create a new operation with a fresh local id and idempotency key.
    pub fn new(
        entity_type: EntityType,
        action: Action,
        target: Option<EntityId>,
        payload: Value,
    ) -> Result<Self> {
        if action.requires_target() && target.is_none() {
            return Err(ModelError::MissingTarget { action });
        }

        Ok(Self {
            id: EntityId::generate_local(),
            action,
            entity_type,
            target,
            payload,
            enqueued_at: Utc::now(),
            idempotency_key: Uuid::new_v4().to_string(),
        })
    }

    /// Whether this operation addresses `id`.
    pub fn targets(&self, id: &EntityId) -> bool {
        self.target.as_ref() == Some(id)
    }

    /// Point the operation at `to` if it currently targets `from`.
    ///
    /// Returns true if the operation changed.
    pub fn retarget(&mut self, from: &EntityId, to: &EntityId) -> bool {
        if self.targets(from) {
            self.target = Some(to.clone());
            true
        } else {
            false
        }
    }

    /// The request the transport sends for this operation.
    pub fn to_request(&self) -> WriteRequest {
        WriteRequest {
            entity_type: self.entity_type,
            action: self.action,
            target: self.target.clone(),
            payload: self.payload.clone(),
            idempotency_key: Some(self.idempotency_key.clone()),
        }
    }
}

/// A create/update/delete request as handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub entity_type: EntityType,
    pub action: Action,
    pub target: Option<EntityId>,
    pub payload: Value,
    pub idempotency_key: Option<String>,
}
