//! Local Store - Durable client-side persistence for offline operation
//!
//! The store keeps three independent slots, each persisted as one JSON
//! document through a [`StorageBackend`]:
//!
//! - `cache`: the last known good snapshot of every read collection
//! - `queue`: the ordered list of writes waiting for the server
//! - `drafts`: local stand-ins for entities whose writes are still queued
//!
//! Storage failures never reach the caller. They are logged and reflected in
//! [`LocalStore::durability`], and the store keeps serving from memory.

mod backend;
mod error;
mod file_backend;
mod store;

pub use backend::*;
pub use error::*;
pub use file_backend::*;
pub use store::*;
