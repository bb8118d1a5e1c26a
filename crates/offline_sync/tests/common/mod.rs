//! Shared test harness: a scripted in-memory server and a wired-up store
#![allow(dead_code)]

use field_model::{Action, CollectionName, WriteRequest};
use local_store::{LocalStore, MemoryBackend};
use offline_sync::{
    CachedReader, ConnectivityMonitor, EngineConfig, SyncEngine, SyncTransport, TransportError,
    WriteDispatcher,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn status(code: u16) -> TransportError {
    TransportError::Status {
        status: code,
        message: format!("scripted {}", code),
    }
}

pub fn unreachable() -> TransportError {
    TransportError::Connectivity("connection refused".to_string())
}

#[derive(Default)]
struct ServerState {
    attempts: Vec<WriteRequest>,
    applied: Vec<WriteRequest>,
    /// Per-attempt outcomes; `None` lets the attempt through
    script: VecDeque<Option<TransportError>>,
    persistent_failure: Option<TransportError>,
    collections: HashMap<CollectionName, Vec<Value>>,
    fetch_failure: Option<TransportError>,
    fetches: usize,
    next_id: u64,
    /// Accept writes but answer with an empty body
    bodiless: bool,
}

/// In-memory stand-in for the reporting server.
///
/// Creates are answered with ids `srv-1`, `srv-2`, ... Failures can be
/// scripted per attempt or set persistently.
#[derive(Default)]
pub struct MockServer {
    state: Mutex<ServerState>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next scripted send attempt with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().unwrap().script.push_back(Some(error));
    }

    /// Let the next `count` scripted attempts through.
    pub fn succeed_next(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state.script.push_back(None);
        }
    }

    /// Fail every send attempt until cleared with `None`.
    pub fn fail_all(&self, error: Option<TransportError>) {
        self.state.lock().unwrap().persistent_failure = error;
    }

    pub fn set_unreachable(&self, unreachable_now: bool) {
        self.fail_all(unreachable_now.then(unreachable));
        self.fail_fetches(unreachable_now.then(unreachable));
    }

    /// Commit writes but answer them without a body.
    pub fn respond_without_body(&self, bodiless: bool) {
        self.state.lock().unwrap().bodiless = bodiless;
    }

    pub fn set_collection(&self, name: CollectionName, items: Vec<Value>) {
        self.state.lock().unwrap().collections.insert(name, items);
    }

    pub fn fail_fetches(&self, error: Option<TransportError>) {
        self.state.lock().unwrap().fetch_failure = error;
    }

    /// Hold every send until the returned gate is notified.
    pub fn hold_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn release_sends(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_waiters();
        }
    }

    pub fn attempts(&self) -> Vec<WriteRequest> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn applied(&self) -> Vec<WriteRequest> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn applied_payloads(&self) -> Vec<Value> {
        self.applied().into_iter().map(|r| r.payload).collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }
}

impl SyncTransport for MockServer {
    async fn fetch(&self, collection: CollectionName) -> Result<Vec<Value>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if let Some(error) = state.fetch_failure.clone() {
            return Err(error);
        }
        Ok(state.collections.get(&collection).cloned().unwrap_or_default())
    }

    async fn send(&self, request: &WriteRequest) -> Result<Value, TransportError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        state.attempts.push(request.clone());
        if let Some(error) = state.persistent_failure.clone() {
            return Err(error);
        }
        if let Some(Some(error)) = state.script.pop_front() {
            return Err(error);
        }
        state.applied.push(request.clone());
        if state.bodiless {
            return Ok(Value::Null);
        }

        let response = match request.action {
            Action::Create => {
                state.next_id += 1;
                let mut body = request.payload.clone();
                body["id"] = json!(format!("srv-{}", state.next_id));
                body
            }
            Action::Update => {
                let mut body = request.payload.clone();
                if let Some(target) = &request.target {
                    body["id"] = json!(target.as_str());
                }
                body
            }
            Action::Delete => Value::Null,
        };
        Ok(response)
    }
}

/// Store, server, and connectivity wired together.
pub struct Harness {
    pub store: Arc<LocalStore>,
    pub server: Arc<MockServer>,
    pub connectivity: ConnectivityMonitor,
}

impl Harness {
    pub fn new(online: bool) -> Self {
        Self {
            store: Arc::new(LocalStore::open(MemoryBackend::new())),
            server: MockServer::new(),
            connectivity: ConnectivityMonitor::new(online),
        }
    }

    pub fn with_store(store: Arc<LocalStore>, online: bool) -> Self {
        Self {
            store,
            server: MockServer::new(),
            connectivity: ConnectivityMonitor::new(online),
        }
    }

    pub fn dispatcher(&self) -> WriteDispatcher<MockServer> {
        WriteDispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.server),
            self.connectivity.clone(),
        )
    }

    pub fn reader(&self) -> CachedReader<MockServer> {
        CachedReader::new(
            Arc::clone(&self.store),
            Arc::clone(&self.server),
            self.connectivity.clone(),
        )
    }

    pub fn engine(&self) -> SyncEngine<MockServer> {
        self.engine_with(EngineConfig::default())
    }

    pub fn engine_with(&self, config: EngineConfig) -> SyncEngine<MockServer> {
        SyncEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.server),
            self.connectivity.clone(),
            config,
        )
    }
}
