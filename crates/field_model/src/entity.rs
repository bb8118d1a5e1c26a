//! Entity kinds, write actions, and the entity view handed back to callers

use crate::{CollectionName, EntityId, ModelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kinds of entities that can be written (and therefore queued).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Submission,
    Template,
}

impl EntityType {
    /// All writable entity types.
    pub const ALL: [EntityType; 2] = [EntityType::Submission, EntityType::Template];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Submission => "submission",
            EntityType::Template => "template",
        }
    }

    /// The cached collection that mirrors this entity type.
    pub fn collection(self) -> CollectionName {
        match self {
            EntityType::Submission => CollectionName::Submissions,
            EntityType::Template => CollectionName::Templates,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "submission" => Ok(EntityType::Submission),
            "template" => Ok(EntityType::Template),
            other => Err(ModelError::UnknownEntityType(other.to_string())),
        }
    }
}

/// Mutating action carried by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Update and delete address an existing entity.
    pub fn requires_target(self) -> bool {
        !matches!(self, Action::Create)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(ModelError::UnknownAction(other.to_string())),
        }
    }
}

/// An entity as the presentation layer sees it.
///
/// Either confirmed by the server (`is_offline == false`) or a local draft
/// standing in for a write that has not reached the server yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub data: Value,
    pub is_offline: bool,
}

impl Entity {
    /// Build an entity from a server response body.
    ///
    /// The id comes from the response's `id` field; `fallback` covers
    /// update/delete endpoints that answer without echoing the record.
    pub fn from_response(
        entity_type: EntityType,
        response: Value,
        fallback: Option<&EntityId>,
    ) -> Result<Self> {
        let id = EntityId::from_record(&response)
            .or_else(|| fallback.cloned())
            .ok_or(ModelError::MissingId(entity_type))?;

        Ok(Self {
            id,
            entity_type,
            data: response,
            is_offline: false,
        })
    }

    /// Top-level field of the entity's data.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}
