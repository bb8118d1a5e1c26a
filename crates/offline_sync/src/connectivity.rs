//! Connectivity monitor
//!
//! Holds the current online flag and broadcasts edge-triggered transitions.
//! Platforms that push change events call [`ConnectivityMonitor::set_online`]
//! directly; everything else runs [`spawn_poller`] with a
//! [`ReachabilityProbe`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 16;

/// Edge-triggered connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    WentOnline,
    WentOffline,
}

struct MonitorInner {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
}

/// Shared online/offline signal. Cloning yields another handle to the same
/// state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(initially_online),
                events,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Record the current reachability.
    ///
    /// Emits an event only when the value changes; returns whether it did.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        let event = if online {
            info!("Connectivity restored");
            ConnectivityEvent::WentOnline
        } else {
            info!("Connectivity lost");
            ConnectivityEvent::WentOffline
        };
        // No subscribers is fine
        let _ = self.inner.events.send(event);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

/// Reachability check used when the platform provides no change events.
#[trait_variant::make(Send)]
pub trait ReachabilityProbe: Send + Sync {
    /// Whether the server is reachable right now.
    async fn probe(&self) -> bool;
}

/// Poll `probe` every `interval` and feed the result into `monitor`.
pub fn spawn_poller<P>(monitor: ConnectivityMonitor, probe: Arc<P>, interval: Duration) -> JoinHandle<()>
where
    P: ReachabilityProbe + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = probe.probe().await;
            debug!(reachable, "Reachability probe");
            monitor.set_online(reachable);
        }
    })
}
