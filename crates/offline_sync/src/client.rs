//! Offline client facade for the presentation layer

use crate::connectivity::ConnectivityMonitor;
use crate::dispatch::WriteDispatcher;
use crate::engine::{EngineConfig, RejectedOperation, SyncEngine, SyncEvent, SyncHandle};
use crate::error::{DispatchError, ReadError};
use crate::reader::{CachedReader, ReadParams, ReadResult};
use crate::status::SyncStatusInfo;
use crate::transport::SyncTransport;
use field_model::{CollectionName, DraftEntity, Entity, EntityId, EntityType};
use local_store::LocalStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Reads, writes, and sync control behind one handle.
///
/// Behaves the same online and offline: reads fall back to the cache and
/// writes fall back to drafts.
pub struct OfflineClient<T> {
    store: Arc<LocalStore>,
    connectivity: ConnectivityMonitor,
    reader: CachedReader<T>,
    dispatcher: WriteDispatcher<T>,
    sync: SyncHandle,
}

impl<T: SyncTransport + 'static> OfflineClient<T> {
    /// Build the client and spawn its sync engine.
    pub fn start(
        store: Arc<LocalStore>,
        transport: Arc<T>,
        connectivity: ConnectivityMonitor,
        config: EngineConfig,
    ) -> (Self, JoinHandle<()>) {
        let engine = SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            connectivity.clone(),
            config,
        );
        let (sync, task) = engine.spawn();

        let client = Self {
            reader: CachedReader::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                connectivity.clone(),
            ),
            dispatcher: WriteDispatcher::new(Arc::clone(&store), transport, connectivity.clone()),
            store,
            connectivity,
            sync,
        };
        (client, task)
    }

    // ----- reads -----

    pub async fn read(
        &self,
        collection: CollectionName,
        params: &ReadParams,
    ) -> Result<ReadResult, ReadError> {
        self.reader.read(collection, params).await
    }

    pub async fn templates(&self, params: &ReadParams) -> Result<ReadResult, ReadError> {
        self.read(CollectionName::Templates, params).await
    }

    pub async fn submissions(&self, params: &ReadParams) -> Result<ReadResult, ReadError> {
        self.read(CollectionName::Submissions, params).await
    }

    pub async fn contacts(&self, params: &ReadParams) -> Result<ReadResult, ReadError> {
        self.read(CollectionName::Contacts, params).await
    }

    // ----- writes -----

    pub async fn create_submission(&self, data: Value) -> Result<Entity, DispatchError> {
        self.dispatcher.create(EntityType::Submission, data).await
    }

    pub async fn update_submission(&self, id: EntityId, data: Value) -> Result<Entity, DispatchError> {
        self.dispatcher.update(EntityType::Submission, id, data).await
    }

    pub async fn delete_submission(&self, id: EntityId) -> Result<Entity, DispatchError> {
        self.dispatcher.delete(EntityType::Submission, id).await
    }

    pub async fn create_template(&self, data: Value) -> Result<Entity, DispatchError> {
        self.dispatcher.create(EntityType::Template, data).await
    }

    pub async fn update_template(&self, id: EntityId, data: Value) -> Result<Entity, DispatchError> {
        self.dispatcher.update(EntityType::Template, id, data).await
    }

    pub async fn delete_template(&self, id: EntityId) -> Result<Entity, DispatchError> {
        self.dispatcher.delete(EntityType::Template, id).await
    }

    // ----- drafts -----

    /// All drafts, oldest first.
    pub fn drafts(&self) -> Vec<Entity> {
        self.store
            .read_drafts()
            .iter()
            .map(DraftEntity::to_entity)
            .collect()
    }

    pub fn drafts_of(&self, entity_type: EntityType) -> Vec<Entity> {
        self.dispatcher.drafts(entity_type)
    }

    pub fn discard_draft(&self, id: &EntityId) -> usize {
        self.dispatcher.discard_draft(id)
    }

    // ----- sync -----

    /// Ask the engine for an immediate pass. False while one is running.
    pub fn sync_now(&self) -> bool {
        self.sync.trigger()
    }

    pub fn status(&self) -> SyncStatusInfo {
        SyncStatusInfo::collect(&self.store, &self.connectivity, &self.sync)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    pub fn rejected_operations(&self) -> Vec<RejectedOperation> {
        self.sync.rejected_operations()
    }

    /// Forget everything stored on this device: cache, queue, and drafts.
    ///
    /// The sync engine is reset too, so the next account does not inherit
    /// the previous one's backoff delay or sync history.
    pub fn logout(&self) {
        self.store.clear_all();
        if !self.sync.reset() {
            warn!("Sync engine not running, backoff state not reset");
        }
        info!("Cleared local data on logout");
    }

    /// Stop the sync engine.
    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.sync
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }
}
