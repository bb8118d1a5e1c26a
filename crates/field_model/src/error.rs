//! Error types for domain model validation

use crate::{Action, EntityType};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("{action} requires a target entity id")]
    MissingTarget { action: Action },

    #[error("Server response for {0} carries no id")]
    MissingId(EntityType),
}

pub type Result<T> = std::result::Result<T, ModelError>;
