//! Sync engine
//!
//! Drains the mutation queue against the server in strict FIFO order. The
//! engine is a state machine owned by a single task:
//!
//! ```text
//!            went-online / timer / trigger
//!   Idle ─────────────────────────────────▶ Draining
//!    ▲                                        │
//!    │ clean pass: level = 0, short recheck   │ failure: stop the pass
//!    └────────────────────────────────────────┤
//!    ▲                                        ▼
//!    └──── timer fires / went-online ──── BackingOff
//!                                         (delay = schedule[level], level += 1)
//! ```
//!
//! A failure at position N leaves N and everything after it queued until a
//! later pass gets past it. The only exception is an operation the server
//! refuses outright (4xx other than 401/403/408/429): it is dropped together
//! with its draft and reported through [`SyncEvent::OperationRejected`].

use crate::backoff::BackoffSchedule;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{FailureClass, TransportError};
use crate::settings::SyncSettings;
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use field_model::{Action, EntityId, PendingOperation};
use local_store::LocalStore;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 16;
/// Rejection reports kept in memory
const MAX_REJECTED_REPORTS: usize = 100;

/// Engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
    /// A pass failed and the retry timer is armed
    BackingOff,
}

/// An operation the server refused and the engine dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOperation {
    pub operation: PendingOperation,
    pub error: TransportError,
    pub rejected_at: DateTime<Utc>,
}

/// Notifications emitted by the engine. Delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass finished without failures after syncing `count` operations
    SyncComplete { count: usize },
    OperationRejected(RejectedOperation),
    /// The server refused the credentials; the queue waits for new ones
    AuthenticationRequired { status: u16 },
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Operations sent to the server
    pub attempted: usize,
    pub synced: usize,
    pub rejected: usize,
    /// The failure that stopped the pass
    pub failure: Option<TransportError>,
    /// Queue length after the pass
    pub remaining: usize,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failure.is_none()
    }
}

/// Engine timing.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub schedule: BackoffSchedule,
    /// Delay before re-checking the queue after a clean pass
    pub success_recheck: Duration,
    /// Delay between checks while offline
    pub idle_keepalive: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule: BackoffSchedule::default(),
            success_recheck: Duration::from_secs(5),
            idle_keepalive: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    pub fn with_schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_success_recheck(mut self, delay: Duration) -> Self {
        self.success_recheck = delay;
        self
    }

    pub fn with_idle_keepalive(mut self, delay: Duration) -> Self {
        self.idle_keepalive = delay;
        self
    }
}

impl From<&SyncSettings> for EngineConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            schedule: settings.backoff_schedule(),
            success_recheck: settings.recheck_interval(),
            idle_keepalive: settings.idle_keepalive(),
        }
    }
}

/// State readable from outside the engine task.
struct EngineShared {
    state: Mutex<EngineState>,
    backoff_level: AtomicU32,
    is_syncing: AtomicBool,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
    rejected: Mutex<Vec<RejectedOperation>>,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::Idle),
            backoff_level: AtomicU32::new(0),
            is_syncing: AtomicBool::new(false),
            last_synced_at: Mutex::new(None),
            rejected: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
    }

    fn backoff_level(&self) -> u32 {
        self.backoff_level.load(Ordering::SeqCst)
    }

    fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_synced_at)
    }

    fn rejected(&self) -> Vec<RejectedOperation> {
        lock(&self.rejected).clone()
    }

    fn reset(&self) {
        self.backoff_level.store(0, Ordering::SeqCst);
        *lock(&self.last_synced_at) = None;
        lock(&self.rejected).clear();
    }

    fn record_rejection(&self, report: RejectedOperation) {
        let mut rejected = lock(&self.rejected);
        rejected.push(report);
        let overflow = rejected.len().saturating_sub(MAX_REJECTED_REPORTS);
        rejected.drain(..overflow);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Retry after a failed pass
    Backoff,
    /// Look at the queue again after a clean pass
    Recheck,
    /// Periodic wake-up while offline
    Keepalive,
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Debug)]
enum EngineCommand {
    Trigger,
    /// Forget backoff and sync history, as after a logout
    Reset,
    Shutdown,
}

/// Background drain engine.
///
/// Drive it directly with [`SyncEngine::drain`] and
/// [`SyncEngine::went_online`], or hand it to its own task with
/// [`SyncEngine::spawn`].
pub struct SyncEngine<T> {
    store: Arc<LocalStore>,
    transport: Arc<T>,
    connectivity: ConnectivityMonitor,
    config: EngineConfig,
    shared: Arc<EngineShared>,
    events: broadcast::Sender<SyncEvent>,
    pending_timer: Option<PendingTimer>,
}

impl<T: SyncTransport> SyncEngine<T> {
    pub fn new(
        store: Arc<LocalStore>,
        transport: Arc<T>,
        connectivity: ConnectivityMonitor,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            transport,
            connectivity,
            config,
            shared: Arc::new(EngineShared::new()),
            events,
            pending_timer: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn backoff_level(&self) -> u32 {
        self.shared.backoff_level()
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.is_syncing()
    }

    /// Deadline of the armed timer, if any.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.pending_timer.map(|timer| timer.deadline)
    }

    pub fn timer_armed(&self) -> bool {
        self.pending_timer.is_some()
    }

    pub fn rejected_operations(&self) -> Vec<RejectedOperation> {
        self.shared.rejected()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run one drain pass.
    ///
    /// Cancels any armed timer first; arms the next one afterwards.
    pub async fn drain(&mut self) -> DrainReport {
        self.pending_timer = None;
        self.shared.is_syncing.store(true, Ordering::SeqCst);
        self.shared.set_state(EngineState::Draining);

        let report = self.run_pass().await;
        self.finish_pass(&report);

        self.shared.is_syncing.store(false, Ordering::SeqCst);
        report
    }

    /// Handle a transition to online: cancel the timer, reset the backoff
    /// level, then drain immediately.
    pub async fn went_online(&mut self) -> DrainReport {
        self.pending_timer = None;
        self.shared.backoff_level.store(0, Ordering::SeqCst);
        info!("Back online, draining queue");
        self.drain().await
    }

    /// Forget the previous session: cancel the armed timer, drop the
    /// backoff level, the last sync time, and the rejection reports, then
    /// wait for the next check as a freshly started engine would.
    pub fn reset(&mut self) {
        self.shared.reset();
        if self.connectivity.is_online() {
            self.arm(self.config.success_recheck, TimerKind::Recheck);
        } else {
            self.arm(self.config.idle_keepalive, TimerKind::Keepalive);
        }
        self.shared.set_state(EngineState::Idle);
        info!("Sync engine reset");
    }

    /// Send queued operations in order until one fails.
    ///
    /// Any `Ok` from the transport counts as committed, body or not. A
    /// create answered without an id leaves dependents targeting the local
    /// id. Failures classed as retryable, `Protocol` and `Configuration`
    /// included, replay the same operation on the next pass; the server
    /// de-duplicates those replays only through the `Idempotency-Key`.
    async fn run_pass(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        let queued: Vec<EntityId> = self.store.read_queue().into_iter().map(|op| op.id).collect();
        debug!(queued = queued.len(), "Starting drain pass");

        for op_id in queued {
            // Re-read: earlier entries may have retargeted or discarded it
            let Some(op) = self.store.queued_operation(&op_id) else {
                continue;
            };

            report.attempted += 1;
            match self.transport.send(&op.to_request()).await {
                Ok(response) => {
                    if op.action == Action::Create {
                        if let Some(server_id) = EntityId::from_record(&response) {
                            self.store.retarget(&op.id, &server_id);
                        }
                    }
                    self.store.remove_from_queue(&op.id);
                    self.store.remove_draft(&op.id);
                    report.synced += 1;
                    debug!(op_id = %op.id, action = %op.action, "Synced operation");
                }
                Err(e) => match e.classify() {
                    FailureClass::Reject => {
                        report.rejected += self.reject(op, e);
                    }
                    FailureClass::AuthRequired => {
                        warn!(op_id = %op.id, error = %e, "Server refused credentials, pausing sync");
                        if let Some(status) = e.status() {
                            let _ = self.events.send(SyncEvent::AuthenticationRequired { status });
                        }
                        report.failure = Some(e);
                        break;
                    }
                    FailureClass::Retry => {
                        warn!(op_id = %op.id, error = %e, "Sync attempt failed");
                        report.failure = Some(e);
                        break;
                    }
                },
            }
        }

        report.remaining = self.store.queue_len();
        report
    }

    /// Drop a refused operation, plus any queued operations that target the
    /// entity it would have created. Returns the number dropped.
    fn reject(&mut self, op: PendingOperation, error: TransportError) -> usize {
        let mut doomed = vec![op];
        if doomed[0].action == Action::Create {
            let created = doomed[0].id.clone();
            doomed.extend(
                self.store
                    .read_queue()
                    .into_iter()
                    .filter(|queued| queued.targets(&created)),
            );
        }

        let count = doomed.len();
        for operation in doomed {
            error!(
                op_id = %operation.id,
                entity_type = %operation.entity_type,
                action = %operation.action,
                error = %error,
                "Server rejected operation, dropping it"
            );
            self.store.remove_from_queue(&operation.id);
            self.store.remove_draft(&operation.id);

            let report = RejectedOperation {
                operation,
                error: error.clone(),
                rejected_at: Utc::now(),
            };
            self.shared.record_rejection(report.clone());
            let _ = self.events.send(SyncEvent::OperationRejected(report));
        }
        count
    }

    fn finish_pass(&mut self, report: &DrainReport) {
        if let Some(failure) = &report.failure {
            let level = self.shared.backoff_level();
            let delay = self.config.schedule.delay_for(level);
            self.shared
                .backoff_level
                .store(level.saturating_add(1), Ordering::SeqCst);
            self.arm(delay, TimerKind::Backoff);
            self.shared.set_state(EngineState::BackingOff);
            info!(
                level = level + 1,
                delay_secs = delay.as_secs(),
                remaining = report.remaining,
                error = %failure,
                "Drain pass failed, backing off"
            );
            return;
        }

        self.shared.backoff_level.store(0, Ordering::SeqCst);
        if report.synced > 0 {
            *lock(&self.shared.last_synced_at) = Some(Utc::now());
            info!(count = report.synced, "Sync complete");
            let _ = self.events.send(SyncEvent::SyncComplete {
                count: report.synced,
            });
        }

        let delay = if report.remaining > 0 {
            Duration::ZERO
        } else {
            self.config.success_recheck
        };
        self.arm(delay, TimerKind::Recheck);
        self.shared.set_state(EngineState::Idle);
    }

    fn arm(&mut self, delay: Duration, kind: TimerKind) {
        self.pending_timer = Some(PendingTimer {
            deadline: Instant::now() + delay,
            kind,
        });
    }

    async fn on_timer(&mut self) {
        let Some(timer) = self.pending_timer.take() else {
            return;
        };

        if self.connectivity.is_online() {
            debug!(kind = ?timer.kind, "Timer fired, draining");
            self.drain().await;
        } else {
            if self.state() == EngineState::BackingOff {
                self.shared.set_state(EngineState::Idle);
            }
            self.arm(self.config.idle_keepalive, TimerKind::Keepalive);
        }
    }
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Move the engine onto its own task.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let handle = SyncHandle {
            commands,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
        };
        // Subscribe before the task first runs so no transition is missed
        let connectivity = self.connectivity.subscribe();
        let task = tokio::spawn(self.run(receiver, connectivity));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut connectivity: broadcast::Receiver<ConnectivityEvent>,
    ) {
        if self.connectivity.is_online() {
            self.arm(Duration::ZERO, TimerKind::Recheck);
        } else {
            self.arm(self.config.idle_keepalive, TimerKind::Keepalive);
        }
        info!(queued = self.store.queue_len(), "Sync engine started");

        loop {
            let deadline = self.timer_deadline();
            tokio::select! {
                _ = sleep_until(deadline) => {
                    self.on_timer().await;
                }
                event = connectivity.recv() => match event {
                    Ok(ConnectivityEvent::WentOnline) => {
                        self.went_online().await;
                    }
                    Ok(ConnectivityEvent::WentOffline) => {
                        debug!("Went offline, pausing until reconnect");
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.connectivity.is_online() {
                            self.went_online().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Some(EngineCommand::Trigger) => {
                        debug!("Manual sync triggered");
                        self.drain().await;
                    }
                    Some(EngineCommand::Reset) => self.reset(),
                    Some(EngineCommand::Shutdown) | None => break,
                },
            }
        }

        info!("Sync engine stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle to a spawned engine. Cheap to clone.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<EngineCommand>,
    shared: Arc<EngineShared>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncHandle {
    /// Ask for an immediate drain pass.
    ///
    /// A no-op returning false while a pass is running or the engine has
    /// stopped.
    pub fn trigger(&self) -> bool {
        if self.shared.is_syncing() {
            return false;
        }
        self.commands.try_send(EngineCommand::Trigger).is_ok()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn backoff_level(&self) -> u32 {
        self.shared.backoff_level()
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.is_syncing()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.shared.last_synced_at()
    }

    pub fn rejected_operations(&self) -> Vec<RejectedOperation> {
        self.shared.rejected()
    }

    /// Reset the engine to its freshly started state.
    ///
    /// Counters visible through the handle reset immediately; the armed
    /// timer is replaced once the task picks up the command. Returns false
    /// if the engine has stopped.
    pub fn reset(&self) -> bool {
        self.shared.reset();
        self.commands.try_send(EngineCommand::Reset).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop the engine task after its current pass.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("state", &self.state())
            .field("backoff_level", &self.backoff_level())
            .finish()
    }
}
