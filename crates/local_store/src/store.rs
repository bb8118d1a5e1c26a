//! The durable local store
//!
//! All three slots are held in memory behind one mutex and written through to
//! the backend before a mutating call returns. Callers never see storage
//! errors: a failed write is logged, the store is marked
//! [`Durability::Degraded`], and the in-memory state stays authoritative.
//!
//! A slot that cannot be read at open time is never written back blind. The
//! store retries the read on later calls and merges what is on disk in front
//! of anything recorded in memory meanwhile.

use crate::{StorageBackend, StoreError};
use chrono::{DateTime, Utc};
use field_model::{
    CacheBundle, CachedCollection, CollectionName, DraftEntity, EntityId, PendingOperation,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const CACHE_SLOT: &str = "cache";
const QUEUE_SLOT: &str = "queue";
const DRAFTS_SLOT: &str = "drafts";

/// Whether mutations currently reach persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Durability {
    Durable,
    /// Mutations live in memory only until a later write succeeds
    Degraded { reason: String },
}

impl Durability {
    pub fn is_durable(&self) -> bool {
        matches!(self, Durability::Durable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Cache,
    Queue,
    Drafts,
}

impl Slot {
    const ALL: [Slot; 3] = [Slot::Cache, Slot::Queue, Slot::Drafts];

    fn key(self) -> &'static str {
        match self {
            Slot::Cache => CACHE_SLOT,
            Slot::Queue => QUEUE_SLOT,
            Slot::Drafts => DRAFTS_SLOT,
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    cache: CacheBundle,
    queue: Vec<PendingOperation>,
    drafts: Vec<DraftEntity>,
}

impl Slots {
    fn encode(&self, slot: Slot) -> serde_json::Result<String> {
        match slot {
            Slot::Cache => serde_json::to_string(&self.cache),
            Slot::Queue => serde_json::to_string(&self.queue),
            Slot::Drafts => serde_json::to_string(&self.drafts),
        }
    }
}

struct Inner {
    slots: Slots,
    durability: Durability,
    /// Slots whose stored contents could not be read yet
    unloaded: HashSet<Slot>,
}

/// Persistent home of the read cache, the mutation queue, and the drafts.
///
/// Shared between the write path (producer) and the sync engine (consumer)
/// behind an `Arc`; every method takes `&self`.
pub struct LocalStore {
    backend: Box<dyn StorageBackend>,
    inner: Mutex<Inner>,
}

impl LocalStore {
    /// Open the store and load all slots from `backend`.
    ///
    /// Never fails. Unreadable slots start empty and the store reports
    /// itself degraded; corrupt slots are logged and start empty.
    pub fn open(backend: impl StorageBackend + 'static) -> Self {
        let mut durability = Durability::Durable;
        let mut unloaded = HashSet::new();
        let mut note_failure = |slot: Slot, e: StoreError| {
            warn!(slot = slot.key(), error = %e, "Failed to read slot, starting empty");
            durability = Durability::Degraded {
                reason: e.to_string(),
            };
            unloaded.insert(slot);
        };

        let cache: CacheBundle = load_slot(&backend, CACHE_SLOT).unwrap_or_else(|e| {
            note_failure(Slot::Cache, e);
            CacheBundle::default()
        });
        let queue: Vec<PendingOperation> = load_slot(&backend, QUEUE_SLOT).unwrap_or_else(|e| {
            note_failure(Slot::Queue, e);
            Vec::new()
        });
        let drafts: Vec<DraftEntity> = load_slot(&backend, DRAFTS_SLOT).unwrap_or_else(|e| {
            note_failure(Slot::Drafts, e);
            Vec::new()
        });

        info!(
            backend = %backend.describe(),
            queued = queue.len(),
            drafts = drafts.len(),
            "Opened local store"
        );

        Self {
            backend: Box::new(backend),
            inner: Mutex::new(Inner {
                slots: Slots {
                    cache,
                    queue,
                    drafts,
                },
                durability,
                unloaded,
            }),
        }
    }

    /// Store backed by memory only.
    pub fn in_memory() -> Self {
        Self::open(crate::MemoryBackend::new())
    }

    pub fn durability(&self) -> Durability {
        self.lock().durability.clone()
    }

    pub fn is_durable(&self) -> bool {
        self.lock().durability.is_durable()
    }

    // ----- read cache -----

    /// Last snapshot of `name`, if one was ever stored.
    pub fn get(&self, name: CollectionName) -> Option<CachedCollection> {
        self.lock().slots.cache.get(name).cloned()
    }

    /// Replace the snapshot of `name` wholesale.
    pub fn put(&self, name: CollectionName, snapshot: CachedCollection) {
        let mut inner = self.lock();
        inner.slots.cache.replace(name, snapshot);
        self.persist(&mut inner, Slot::Cache);
    }

    pub fn cache_bundle(&self) -> CacheBundle {
        self.lock().slots.cache.clone()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.lock().slots.cache.last_sync
    }

    // ----- mutation queue -----

    pub fn append_to_queue(&self, op: PendingOperation) {
        let mut inner = self.lock();
        debug!(op_id = %op.id, action = %op.action, "Queued operation");
        inner.slots.queue.push(op);
        self.persist(&mut inner, Slot::Queue);
    }

    /// Snapshot of the queue in FIFO order.
    pub fn read_queue(&self) -> Vec<PendingOperation> {
        self.lock().slots.queue.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().slots.queue.len()
    }

    /// Current version of a queued operation, if it is still queued.
    pub fn queued_operation(&self, id: &EntityId) -> Option<PendingOperation> {
        self.lock().slots.queue.iter().find(|op| &op.id == id).cloned()
    }

    /// Remove the queued operation with `id`. Returns false if absent.
    pub fn remove_from_queue(&self, id: &EntityId) -> bool {
        let mut inner = self.lock();
        let before = inner.slots.queue.len();
        inner.slots.queue.retain(|op| &op.id != id);
        let removed = inner.slots.queue.len() != before;
        if removed {
            self.persist(&mut inner, Slot::Queue);
        }
        removed
    }

    // ----- drafts -----

    /// Insert a draft or replace the one with the same id.
    pub fn save_draft(&self, draft: DraftEntity) {
        let mut inner = self.lock();
        let drafts = &mut inner.slots.drafts;
        match drafts.iter().position(|d| d.id == draft.id) {
            Some(index) => drafts[index] = draft,
            None => drafts.push(draft),
        }
        self.persist(&mut inner, Slot::Drafts);
    }

    pub fn remove_draft(&self, id: &EntityId) -> bool {
        let mut inner = self.lock();
        let before = inner.slots.drafts.len();
        inner.slots.drafts.retain(|d| &d.id != id);
        let removed = inner.slots.drafts.len() != before;
        if removed {
            self.persist(&mut inner, Slot::Drafts);
        }
        removed
    }

    pub fn read_drafts(&self) -> Vec<DraftEntity> {
        self.lock().slots.drafts.clone()
    }

    pub fn draft(&self, id: &EntityId) -> Option<DraftEntity> {
        self.lock().slots.drafts.iter().find(|d| &d.id == id).cloned()
    }

    /// Rewrite queued operations and drafts that target `from` to target `to`.
    ///
    /// Both slots are persisted before returning. Returns the number of
    /// queued operations changed.
    pub fn retarget(&self, from: &EntityId, to: &EntityId) -> usize {
        let mut inner = self.lock();

        let ops_changed = inner
            .slots
            .queue
            .iter_mut()
            .map(|op| op.retarget(from, to))
            .filter(|changed| *changed)
            .count();
        let drafts_changed = inner
            .slots
            .drafts
            .iter_mut()
            .map(|d| d.retarget(from, to))
            .filter(|changed| *changed)
            .count();

        if ops_changed > 0 {
            self.persist(&mut inner, Slot::Queue);
        }
        if drafts_changed > 0 {
            self.persist(&mut inner, Slot::Drafts);
        }
        if ops_changed + drafts_changed > 0 {
            debug!(%from, %to, ops_changed, drafts_changed, "Retargeted local id");
        }
        ops_changed
    }

    /// Drop the cache, the queue, and all drafts.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.slots = Slots::default();
        inner.unloaded.clear();

        let mut failure = None;
        for slot in Slot::ALL {
            if let Err(e) = self.backend.remove(slot.key()) {
                warn!(slot = slot.key(), error = %e, "Failed to clear slot");
                failure = Some(e.to_string());
            }
        }
        inner.durability = match failure {
            Some(reason) => Durability::Degraded { reason },
            None => Durability::Durable,
        };
        info!("Cleared local store");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.unloaded.is_empty() {
            self.reload_unloaded(&mut inner);
        }
        inner
    }

    /// Retry reading slots that failed at open and merge them with memory:
    /// stored operations and drafts first, newer snapshots win.
    fn reload_unloaded(&self, inner: &mut Inner) {
        let mut recovered = false;

        for slot in Slot::ALL {
            if !inner.unloaded.contains(&slot) {
                continue;
            }
            let backend = &*self.backend;
            let slots = &mut inner.slots;
            let loaded = match slot {
                Slot::Cache => load_slot(backend, slot.key()).map(|stored| {
                    slots.cache = merge_cache(stored, std::mem::take(&mut slots.cache));
                }),
                Slot::Queue => load_slot(backend, slot.key()).map(|stored| {
                    slots.queue = merge_by_id(stored, std::mem::take(&mut slots.queue), op_id);
                }),
                Slot::Drafts => load_slot(backend, slot.key()).map(|stored| {
                    slots.drafts = merge_by_id(stored, std::mem::take(&mut slots.drafts), draft_id);
                }),
            };

            if loaded.is_ok() {
                inner.unloaded.remove(&slot);
                recovered = true;
                info!(slot = slot.key(), "Recovered slot from storage");
            }
        }

        if recovered && inner.unloaded.is_empty() {
            // Degraded, so this writes the merged state of every slot
            self.persist(inner, Slot::Queue);
        }
    }

    /// Write `slot` through to the backend. Once degraded, the next
    /// successful write flushes every loaded slot so the medium catches up.
    /// Slots never read from the backend are left alone.
    fn persist(&self, inner: &mut Inner, slot: Slot) {
        let was_degraded = !inner.durability.is_durable();
        let pending = if was_degraded {
            Slot::ALL.to_vec()
        } else {
            vec![slot]
        };

        for slot in pending {
            if inner.unloaded.contains(&slot) {
                continue;
            }
            if let Err(reason) = self.write_slot(&inner.slots, slot) {
                warn!(
                    backend = %self.backend.describe(),
                    slot = slot.key(),
                    error = %reason,
                    "Local store write failed, continuing in memory"
                );
                inner.durability = Durability::Degraded { reason };
                return;
            }
        }

        if was_degraded && inner.unloaded.is_empty() {
            info!(backend = %self.backend.describe(), "Local store durable again");
            inner.durability = Durability::Durable;
        }
    }

    fn write_slot(&self, slots: &Slots, slot: Slot) -> Result<(), String> {
        let contents = slots.encode(slot).map_err(|e| e.to_string())?;
        self.backend
            .write(slot.key(), &contents)
            .map_err(|e| e.to_string())
    }
}

/// Read and parse one slot. A missing slot is empty; a corrupt one is
/// logged and treated as empty. Only read failures are errors.
fn load_slot<T: DeserializeOwned + Default>(
    backend: &dyn StorageBackend,
    key: &str,
) -> Result<T, StoreError> {
    match backend.read(key)? {
        Some(contents) => Ok(serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(slot = key, error = %e, "Discarding corrupt slot");
            T::default()
        })),
        None => Ok(T::default()),
    }
}

/// `stored` in order, then entries only `memory` has. On a shared id the
/// memory version replaces the stored one in place.
fn merge_by_id<T>(stored: Vec<T>, memory: Vec<T>, id_of: fn(&T) -> &EntityId) -> Vec<T> {
    let mut merged = stored;
    for entry in memory {
        match merged.iter().position(|existing| id_of(existing) == id_of(&entry)) {
            Some(index) => merged[index] = entry,
            None => merged.push(entry),
        }
    }
    merged
}

fn op_id(op: &PendingOperation) -> &EntityId {
    &op.id
}

fn draft_id(draft: &DraftEntity) -> &EntityId {
    &draft.id
}

fn merge_cache(mut stored: CacheBundle, memory: CacheBundle) -> CacheBundle {
    let last_sync = stored.last_sync.max(memory.last_sync);
    for name in CollectionName::ALL {
        if let Some(snapshot) = memory.get(name) {
            let newer = stored
                .get(name)
                .map_or(true, |existing| existing.fetched_at <= snapshot.fetched_at);
            if newer {
                stored.replace(name, snapshot.clone());
            }
        }
    }
    stored.last_sync = last_sync;
    stored
}
