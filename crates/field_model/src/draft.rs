//! Offline drafts

use crate::{Action, Entity, EntityId, EntityType, PendingOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A locally materialized stand-in for an entity whose write is still queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftEntity {
    /// Same id as the paired [`PendingOperation`]
    pub id: EntityId,
    pub entity_type: EntityType,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntityId>,
    pub data: Value,
    pub is_offline: bool,
    pub created_at: DateTime<Utc>,
}

impl DraftEntity {
    /// Draft paired with a queued operation.
    pub fn for_operation(op: &PendingOperation) -> Self {
        Self {
            id: op.id.clone(),
            entity_type: op.entity_type,
            action: op.action,
            target: op.target.clone(),
            data: op.payload.clone(),
            is_offline: true,
            created_at: op.enqueued_at,
        }
    }

    /// The id callers know this entity by: the target for update/delete,
    /// the draft's own local id for a create.
    pub fn entity_id(&self) -> &EntityId {
        self.target.as_ref().unwrap_or(&self.id)
    }

    /// Point the draft at `to` if it currently targets `from`.
    pub fn retarget(&mut self, from: &EntityId, to: &EntityId) -> bool {
        if self.target.as_ref() == Some(from) {
            self.target = Some(to.clone());
            true
        } else {
            false
        }
    }

    /// View of the draft as an entity, flagged offline.
    pub fn to_entity(&self) -> Entity {
        let id = self.entity_id().clone();
        let mut data = match &self.data {
            Value::Object(map) => Value::Object(map.clone()),
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::String(id.to_string()));
            map.insert("is_offline".to_string(), Value::Bool(true));
        }

        Entity {
            id,
            entity_type: self.entity_type,
            data,
            is_offline: true,
        }
    }
}
