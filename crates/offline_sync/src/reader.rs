//! Cache & fallback reader
//!
//! Online reads fetch the whole collection, replace the cached snapshot, and
//! filter in memory. Offline reads, and online reads that fail while a
//! snapshot exists, filter the snapshot instead. Filtering never touches the
//! cache.

use crate::connectivity::ConnectivityMonitor;
use crate::error::ReadError;
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use field_model::{CachedCollection, CollectionName, EntityId};
use local_store::LocalStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client-side filter applied to a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadParams {
    /// Only the record with this id
    pub id: Option<EntityId>,
    /// Top-level field equality
    pub filters: BTreeMap<String, Value>,
    /// Case-insensitive substring over string fields
    pub search: Option<String>,
}

impl ReadParams {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<EntityId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn matches(&self, record: &Value) -> bool {
        if let Some(id) = &self.id {
            if EntityId::from_record(record).as_ref() != Some(id) {
                return false;
            }
        }

        let filters_match = self
            .filters
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected));
        if !filters_match {
            return false;
        }

        match &self.search {
            Some(term) if !term.is_empty() => {
                let needle = term.to_lowercase();
                match record {
                    Value::Object(map) => map.values().any(|value| match value {
                        Value::String(s) => s.to_lowercase().contains(&needle),
                        _ => false,
                    }),
                    _ => false,
                }
            }
            _ => true,
        }
    }

    pub fn apply(&self, items: &[Value]) -> Vec<Value> {
        items.iter().filter(|item| self.matches(item)).cloned().collect()
    }
}

/// Where a read was served from.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadSource {
    Network,
    Cache { fetched_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub items: Vec<Value>,
    pub source: ReadSource,
}

impl ReadResult {
    pub fn is_from_cache(&self) -> bool {
        matches!(self.source, ReadSource::Cache { .. })
    }

    /// First matching record, for id lookups.
    pub fn first(&self) -> Option<&Value> {
        self.items.first()
    }
}

/// Read path wrapper shared by every collection.
pub struct CachedReader<T> {
    store: Arc<LocalStore>,
    transport: Arc<T>,
    connectivity: ConnectivityMonitor,
}

impl<T> Clone for CachedReader<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            connectivity: self.connectivity.clone(),
        }
    }
}

impl<T: SyncTransport> CachedReader<T> {
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

    pub async fn read(
        &self,
        collection: CollectionName,
        params: &ReadParams,
    ) -> Result<ReadResult, ReadError> {
        if !self.connectivity.is_online() {
            return self
                .from_cache(collection, params)
                .ok_or(ReadError::NotCached(collection));
        }

        match self.transport.fetch(collection).await {
            Ok(items) => {
                let filtered = params.apply(&items);
                debug!(%collection, total = items.len(), "Refreshed cache from network");
                self.store.put(collection, CachedCollection::new(items));
                Ok(ReadResult {
                    items: filtered,
                    source: ReadSource::Network,
                })
            }
            Err(e) => match self.from_cache(collection, params) {
                Some(result) => {
                    warn!(%collection, error = %e, "Network read failed, serving cache");
                    Ok(result)
                }
                None => Err(e.into()),
            },
        }
    }

    fn from_cache(&self, collection: CollectionName, params: &ReadParams) -> Option<ReadResult> {
        self.store.get(collection).map(|snapshot| ReadResult {
            items: params.apply(&snapshot.items),
            source: ReadSource::Cache {
                fetched_at: snapshot.fetched_at,
            },
        })
    }
}
