//! Write dispatch adapter
//!
//! Online writes go straight to the server. Writes made offline, writes that
//! fail for lack of connectivity, and writes addressing an entity that only
//! exists as a local draft become a draft plus a queued operation, and the
//! caller gets the draft back instead of an error.

use crate::connectivity::ConnectivityMonitor;
use crate::error::DispatchError;
use crate::transport::SyncTransport;
use field_model::{Action, DraftEntity, Entity, EntityId, EntityType, PendingOperation};
use local_store::LocalStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct WriteDispatcher<T> {
    store: Arc<LocalStore>,
    transport: Arc<T>,
    connectivity: ConnectivityMonitor,
}

impl<T> Clone for WriteDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            connectivity: self.connectivity.clone(),
        }
    }
}

impl<T: SyncTransport> WriteDispatcher<T> {
    pub fn new(
        store: Arc<LocalStore>,
        transport: Arc<T>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
        }
    }

    /// Perform a write, queueing it when it cannot be confirmed now.
    ///
    /// `target` addresses the entity for update and delete. Returned entities
    /// with `is_offline == true` are drafts awaiting the sync engine.
    pub async fn write(
        &self,
        entity_type: EntityType,
        action: Action,
        target: Option<EntityId>,
        payload: Value,
    ) -> Result<Entity, DispatchError> {
        let op = PendingOperation::new(entity_type, action, target, payload)?;

        if op.target.as_ref().is_some_and(EntityId::is_local) {
            return Ok(self.enqueue(op));
        }
        if !self.connectivity.is_online() {
            return Ok(self.enqueue(op));
        }

        match self.transport.send(&op.to_request()).await {
            Ok(response) => Ok(confirmed_entity(&op, response)),
            Err(e) if e.is_connectivity() => {
                warn!(%entity_type, %action, error = %e, "Write failed to reach server, queueing");
                Ok(self.enqueue(op))
            }
            Err(e) => Err(DispatchError::Transport(e)),
        }
    }

    pub async fn create(&self, entity_type: EntityType, data: Value) -> Result<Entity, DispatchError> {
        self.write(entity_type, Action::Create, None, data).await
    }

    pub async fn update(
        &self,
        entity_type: EntityType,
        id: EntityId,
        data: Value,
    ) -> Result<Entity, DispatchError> {
        self.write(entity_type, Action::Update, Some(id), data).await
    }

    pub async fn delete(&self, entity_type: EntityType, id: EntityId) -> Result<Entity, DispatchError> {
        self.write(entity_type, Action::Delete, Some(id), Value::Null).await
    }

    /// Drop a draft and its queued operation, along with every queued
    /// operation (and draft) that targets it.
    ///
    /// Returns the number of operations removed.
    pub fn discard_draft(&self, id: &EntityId) -> usize {
        let dependents: Vec<EntityId> = self
            .store
            .read_queue()
            .into_iter()
            .filter(|op| op.targets(id))
            .map(|op| op.id)
            .collect();

        let mut removed = 0;
        for op_id in std::iter::once(id.clone()).chain(dependents) {
            let dequeued = self.store.remove_from_queue(&op_id);
            let dropped = self.store.remove_draft(&op_id);
            if dequeued || dropped {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(%id, removed, "Discarded draft");
        }
        removed
    }

    /// Drafts of one entity type, as entities.
    pub fn drafts(&self, entity_type: EntityType) -> Vec<Entity> {
        self.store
            .read_drafts()
            .iter()
            .filter(|draft| draft.entity_type == entity_type)
            .map(DraftEntity::to_entity)
            .collect()
    }

    fn enqueue(&self, op: PendingOperation) -> Entity {
        let draft = DraftEntity::for_operation(&op);
        let entity = draft.to_entity();

        info!(
            op_id = %op.id,
            entity_type = %op.entity_type,
            action = %op.action,
            "Saved offline draft"
        );
        self.store.save_draft(draft);
        self.store.append_to_queue(op);
        entity
    }
}

/// Entity for a write the server accepted.
///
/// A 2xx means the write is committed, so this never fails. Responses that
/// carry no record fall back to the addressed entity, then to the
/// operation's own id, with the sent payload as data.
fn confirmed_entity(op: &PendingOperation, response: Value) -> Entity {
    if op.action == Action::Delete {
        if let Some(target) = &op.target {
            return Entity {
                id: target.clone(),
                entity_type: op.entity_type,
                data: response,
                is_offline: false,
            };
        }
    }

    let data = if response.is_object() {
        response
    } else {
        op.payload.clone()
    };
    Entity::from_response(op.entity_type, data, op.target.as_ref()).unwrap_or_else(|_| {
        warn!(
            op_id = %op.id,
            entity_type = %op.entity_type,
            "Server accepted write without returning an id"
        );
        Entity {
            id: op.id.clone(),
            entity_type: op.entity_type,
            data: op.payload.clone(),
            is_offline: false,
        }
    })
}
