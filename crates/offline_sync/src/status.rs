//! Sync status for the offline indicator

use crate::connectivity::ConnectivityMonitor;
use crate::engine::{EngineState, SyncHandle};
use chrono::{DateTime, Utc};
use local_store::LocalStore;

/// Snapshot of everything the offline indicator shows.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatusInfo {
    pub online: bool,
    pub pending_operations: usize,
    pub drafts: usize,
    pub state: EngineState,
    pub is_syncing: bool,
    pub backoff_level: u32,
    pub last_sync: Option<DateTime<Utc>>,
    /// Seconds since `last_sync`
    pub time_since_sync: Option<u64>,
    pub durable: bool,
    pub status_message: String,
}

impl SyncStatusInfo {
    /// Collect the current status.
    pub fn collect(store: &LocalStore, connectivity: &ConnectivityMonitor, sync: &SyncHandle) -> Self {
        let last_sync = sync.last_synced_at().or_else(|| store.last_sync());
        Self::build(
            connectivity.is_online(),
            store.queue_len(),
            store.read_drafts().len(),
            sync.state(),
            sync.backoff_level(),
            last_sync,
            store.is_durable(),
            Utc::now(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        online: bool,
        pending_operations: usize,
        drafts: usize,
        state: EngineState,
        backoff_level: u32,
        last_sync: Option<DateTime<Utc>>,
        durable: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let is_syncing = state == EngineState::Draining;
        let time_since_sync =
            last_sync.map(|at| u64::try_from((now - at).num_seconds()).unwrap_or(0));

        let status_message = if !durable {
            "Storage unavailable - changes are kept in memory only".to_string()
        } else if is_syncing {
            format!("Syncing {} pending change(s)", pending_operations)
        } else if !online && pending_operations > 0 {
            format!("Offline - {} change(s) saved on this device", pending_operations)
        } else if !online {
            "Offline - showing saved data".to_string()
        } else if pending_operations > 0 && backoff_level > 0 {
            format!(
                "{} change(s) waiting, retrying soon",
                pending_operations
            )
        } else if pending_operations > 0 {
            format!("{} change(s) waiting to sync", pending_operations)
        } else {
            "All changes synced".to_string()
        };

        Self {
            online,
            pending_operations,
            drafts,
            state,
            is_syncing,
            backoff_level,
            last_sync,
            time_since_sync,
            durable,
            status_message,
        }
    }

    /// Check if the indicator should be shown
    ///
    /// Returns true if offline, has pending changes, or storage is degraded
    pub fn should_show(&self) -> bool {
        !self.online || self.pending_operations > 0 || !self.durable
    }

    /// Get a short status string
    pub fn short_status(&self) -> &'static str {
        if self.is_syncing {
            "Syncing"
        } else if !self.online {
            "Offline"
        } else if self.backoff_level > 0 {
            "Retrying"
        } else {
            "Online"
        }
    }

    /// Format time since sync for display
    pub fn formatted_time_since_sync(&self) -> Option<String> {
        self.time_since_sync.map(|seconds| {
            if seconds < 60 {
                format!("{}s ago", seconds)
            } else if seconds < 3600 {
                format!("{}m ago", seconds / 60)
            } else if seconds < 86400 {
                format!("{}h ago", seconds / 3600)
            } else {
                format!("{}d ago", seconds / 86400)
            }
        })
    }
}
