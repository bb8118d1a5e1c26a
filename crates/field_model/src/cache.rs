//! Cached collection snapshots

use crate::{ModelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Collections mirrored in the read cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionName {
    Templates,
    Submissions,
    Contacts,
}

impl CollectionName {
    pub const ALL: [CollectionName; 3] = [
        CollectionName::Templates,
        CollectionName::Submissions,
        CollectionName::Contacts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectionName::Templates => "templates",
            CollectionName::Submissions => "submissions",
            CollectionName::Contacts => "contacts",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "templates" => Ok(CollectionName::Templates),
            "submissions" => Ok(CollectionName::Submissions),
            "contacts" => Ok(CollectionName::Contacts),
            other => Err(ModelError::UnknownCollection(other.to_string())),
        }
    }
}

/// Last known good snapshot of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCollection {
    pub items: Vec<Value>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedCollection {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The persisted read cache: one optional snapshot per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheBundle {
    #[serde(default)]
    pub templates: Option<CachedCollection>,
    #[serde(default)]
    pub submissions: Option<CachedCollection>,
    #[serde(default)]
    pub contacts: Option<CachedCollection>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl CacheBundle {
    pub fn get(&self, name: CollectionName) -> Option<&CachedCollection> {
        self.slot(name).as_ref()
    }

    /// Replace a snapshot wholesale and stamp `last_sync`.
    pub fn replace(&mut self, name: CollectionName, snapshot: CachedCollection) {
        self.last_sync = Some(snapshot.fetched_at);
        *self.slot_mut(name) = Some(snapshot);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn slot(&self, name: CollectionName) -> &Option<CachedCollection> {
        match name {
            CollectionName::Templates => &self.templates,
            CollectionName::Submissions => &self.submissions,
            CollectionName::Contacts => &self.contacts,
        }
    }

    fn slot_mut(&mut self, name: CollectionName) -> &mut Option<CachedCollection> {
        match name {
            CollectionName::Templates => &mut self.templates,
            CollectionName::Submissions => &mut self.submissions,
            CollectionName::Contacts => &mut self.contacts,
        }
    }
}
