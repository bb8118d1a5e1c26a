//! Offline Sync - Offline-first synchronization for field reports
//!
//! This crate keeps the reporting client usable without a network:
//!
//! - [`CachedReader`] serves reads from the network when possible and from
//!   the last cached snapshot otherwise
//! - [`WriteDispatcher`] turns writes that cannot reach the server into
//!   offline drafts backed by queued operations
//! - [`SyncEngine`] drains the queue in order once connectivity returns,
//!   backing off on failure
//! - [`ConnectivityMonitor`] tracks online/offline transitions
//!
//! [`OfflineClient`] bundles all of them for the presentation layer.

pub mod backoff;
pub mod client;
pub mod connectivity;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod reader;
pub mod settings;
pub mod status;
pub mod transport;

pub use backoff::BackoffSchedule;
pub use client::OfflineClient;
pub use connectivity::{spawn_poller, ConnectivityEvent, ConnectivityMonitor, ReachabilityProbe};
pub use dispatch::WriteDispatcher;
pub use engine::{
    DrainReport, EngineConfig, EngineState, RejectedOperation, SyncEngine, SyncEvent, SyncHandle,
};
pub use error::{DispatchError, FailureClass, ReadError, SettingsError, TransportError};
pub use reader::{CachedReader, ReadParams, ReadResult, ReadSource};
pub use settings::{SettingsManager, SyncSettings};
pub use status::SyncStatusInfo;
pub use transport::{HttpTransport, SyncTransport};
