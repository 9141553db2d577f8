//! Connectivity state and the monitor that feeds it to the dispatcher.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Reachable,
    Unreachable,
}

impl ConnectivityState {
    pub fn is_reachable(self) -> bool {
        matches!(self, Self::Reachable)
    }

    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Reachable
        } else {
            Self::Unreachable
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => f.write_str("reachable"),
            Self::Unreachable => f.write_str("unreachable"),
        }
    }
}

/// Handle returned by [`ConnectivitySource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked on every reported state.
pub type ConnectivityListener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

/// Platform-specific source of reachability notifications.
pub trait ConnectivitySource: Send + Sync {
    /// Current state, read synchronously.
    fn current(&self) -> ConnectivityState;

    /// Register a listener; it may be called from any thread.
    fn subscribe(&self, listener: ConnectivityListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process source whose state is set by hand.
///
/// Used by the command-line binary and by tests to drive transitions.
pub struct ManualConnectivitySource {
    state: Mutex<ConnectivityState>,
    listeners: Mutex<BTreeMap<SubscriptionId, ConnectivityListener>>,
    next_id: AtomicU64,
}

impl ManualConnectivitySource {
    pub fn new(initial: ConnectivityState) -> Self {
        Self {
            state: Mutex::new(initial),
            listeners: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn reachable() -> Self {
        Self::new(ConnectivityState::Reachable)
    }

    pub fn unreachable() -> Self {
        Self::new(ConnectivityState::Unreachable)
    }

    /// Set the state and notify every listener.
    pub fn set_state(&self, state: ConnectivityState) {
        *self.state.lock() = state;
        // Snapshot so a listener may unsubscribe without deadlocking.
        let listeners: Vec<ConnectivityListener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(state);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.set_state(ConnectivityState::from_reachable(reachable));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl ConnectivitySource for ManualConnectivitySource {
    fn current(&self) -> ConnectivityState {
        *self.state.lock()
    }

    fn subscribe(&self, listener: ConnectivityListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id);
    }
}

/// Latest connectivity state, published through a watch channel.
///
/// Only real transitions are published, so an observer that falls behind
/// sees the newest state once. Dropping the monitor unsubscribes it from
/// the source.
pub struct ConnectivityMonitor {
    source: Arc<dyn ConnectivitySource>,
    subscription: SubscriptionId,
    state_tx: Arc<watch::Sender<ConnectivityState>>,
}

impl ConnectivityMonitor {
    /// Subscribes before reading the current state, so a transition that
    /// lands in between is never lost.
    pub fn new(source: Arc<dyn ConnectivitySource>) -> Self {
        let state_tx = Arc::new(watch::Sender::new(ConnectivityState::Unreachable));

        let listener_tx = Arc::clone(&state_tx);
        let subscription = source.subscribe(Arc::new(move |state| {
            if publish(&listener_tx, state) {
                info!(state = %state, "Connectivity changed");
            }
        }));

        let initial = source.current();
        publish(&state_tx, initial);

        debug!(state = %initial, "Connectivity monitor started");
        Self {
            source,
            subscription,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    /// Receiver that observes transitions from now on.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }
}

/// Store `state` if it differs from the current one; returns whether it did.
fn publish(tx: &watch::Sender<ConnectivityState>, state: ConnectivityState) -> bool {
    tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    })
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
    }
}
