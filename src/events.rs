//! Typed publish/subscribe for session events.
//!
//! The event set is closed; listeners subscribe per kind and run on their
//! own task turn so a slow or panicking listener cannot stall emission or
//! starve its siblings. The listener table is snapshotted before
//! dispatch, which makes un-subscribing from inside a listener safe.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::models::MessageHeader;

/// Events emitted by a Kaspeak session.
#[derive(Clone, Debug)]
pub enum KaspeakEvent {
    /// A verified Kaspeak payload arrived in a confirmed block.
    MessageReceived {
        header: MessageHeader,
        data: Vec<u8>,
    },
    /// The session connected to the ledger.
    Connected { network_id: String },
    /// The session disconnected from the ledger.
    Disconnected,
    /// The tracked balance changed.
    BalanceChanged {
        balance_sompi: u64,
        utxo_count: usize,
    },
}

impl KaspeakEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            KaspeakEvent::MessageReceived { .. } => EventKind::MessageReceived,
            KaspeakEvent::Connected { .. } => EventKind::Connected,
            KaspeakEvent::Disconnected => EventKind::Disconnected,
            KaspeakEvent::BalanceChanged { .. } => EventKind::BalanceChanged,
        }
    }
}

/// The closed set of event names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    Connected,
    Disconnected,
    BalanceChanged,
}

/// A subscribed callback.
pub type Listener = Arc<dyn Fn(KaspeakEvent) + Send + Sync>;

/// Handle for removing a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Inner {
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        match listeners.get_mut(&kind) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                entries.len() != before
            }
            None => false,
        }
    }
}

/// Clonable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn insert(&self, kind: EventKind, id: ListenerId, listener: Listener) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        listeners.entry(kind).or_default().push((id, listener));
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribes `listener` to events of `kind`.
    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = self.next_id();
        self.insert(kind, id, listener);
        id
    }

    /// Subscribes a listener that removes itself after its first call.
    pub fn once(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = self.next_id();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let fired = AtomicBool::new(false);
        let proxy: Listener = Arc::new(move |event| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.remove(kind, id);
            }
            listener(event);
        });
        self.insert(kind, id, proxy);
        id
    }

    /// Removes a subscription; returns whether it was present.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.remove(kind, id)
    }

    /// Emits an event: every current listener for its kind is invoked on
    /// its own task turn. Panicking listeners are logged and contained.
    pub fn emit(&self, event: KaspeakEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = {
            let listeners = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            listeners
                .get(&kind)
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            let event = event.clone();
            tokio::spawn(async move {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
                if result.is_err() {
                    tracing::warn!(?kind, "event listener panicked");
                }
            });
        }
    }

    /// Number of live subscriptions for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        listeners.get(&kind).map(Vec::len).unwrap_or(0)
    }
}
