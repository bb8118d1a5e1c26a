//! Field Model - Domain types shared by the local store and the sync engine
//!
//! This crate defines the records that move between the field client and the
//! reporting server: entity identifiers (server-issued or locally generated),
//! queued write operations, offline drafts, and cached collection snapshots.
//! Every type here round-trips through JSON so it can be persisted by any
//! storage backend.

mod cache;
mod draft;
mod entity;
mod error;
mod id;
mod operation;

pub use cache::*;
pub use draft::*;
pub use entity::*;
pub use error::*;
pub use id::*;
pub use operation::*;
