//! FieldSync Agent - hosts the sync engine for the field reporting client
//!
//! Usage: `fieldsync-agent [SETTINGS_DIR]`
//!
//! Loads `settings.json` from the settings directory (default: the current
//! directory), opens the local store under its data directory, and keeps the
//! offline queue draining until interrupted.

use anyhow::{Context, Result};
use local_store::{FileBackend, LocalStore};
use offline_sync::{
    spawn_poller, ConnectivityMonitor, EngineConfig, HttpTransport, ReachabilityProbe,
    SettingsManager, SyncEngine, SyncEvent, SyncHandle, SyncStatusInfo,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut manager = SettingsManager::new(&settings_dir);
    let settings = manager
        .load()
        .with_context(|| format!("Failed to load settings from {}", settings_dir.display()))?
        .clone();
    let data_dir = manager.data_dir();
    info!("Starting FieldSync agent, data directory: {:?}", data_dir);

    let backend = FileBackend::open(&data_dir)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
    let store = Arc::new(LocalStore::open(backend));
    if !store.is_durable() {
        warn!(durability = ?store.durability(), "Local store is not durable");
    }

    let transport = Arc::new(
        HttpTransport::from_settings(&settings).context("Invalid server settings")?,
    );
    let online = transport.probe().await;
    info!(online, server = transport.base_url(), "Initial reachability check");

    let connectivity = ConnectivityMonitor::new(online);
    let poller = spawn_poller(
        connectivity.clone(),
        Arc::clone(&transport),
        settings.connectivity_poll_interval(),
    );

    let engine = SyncEngine::new(
        Arc::clone(&store),
        transport,
        connectivity.clone(),
        EngineConfig::from(&settings),
    );
    let (handle, engine_task) = engine.spawn();
    let mut events = handle.subscribe();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    log_status(&SyncStatusInfo::collect(&store, &connectivity, &handle));
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed sync events"),
                Err(RecvError::Closed) => break,
            },
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    stop(&handle).await;
    engine_task.await.context("Sync engine task failed")?;
    poller.abort();

    log_status(&SyncStatusInfo::collect(&store, &connectivity, &handle));
    Ok(())
}

async fn stop(handle: &SyncHandle) {
    if handle.is_syncing() {
        info!("Waiting for the current sync pass to finish");
    }
    handle.shutdown().await;
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::SyncComplete { count } => info!(count, "Synced offline changes"),
        SyncEvent::OperationRejected(rejected) => error!(
            op_id = %rejected.operation.id,
            entity_type = %rejected.operation.entity_type,
            action = %rejected.operation.action,
            error = %rejected.error,
            "Server rejected a queued change"
        ),
        SyncEvent::AuthenticationRequired { status } => warn!(
            status,
            "Server refused the API token, update it in settings.json or the environment"
        ),
    }
}

fn log_status(status: &SyncStatusInfo) {
    let since = status
        .formatted_time_since_sync()
        .unwrap_or_else(|| "never".to_string());
    info!(
        online = status.online,
        pending = status.pending_operations,
        drafts = status.drafts,
        backoff_level = status.backoff_level,
        last_sync = %since,
        "{}",
        status.status_message
    );
}
