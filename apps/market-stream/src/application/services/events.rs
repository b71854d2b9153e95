//! Change Notifications
//!
//! Observers registered on the facade receive every [`StreamEvent`] in the
//! order the events were produced. Callbacks run on the thread that produced
//! the event, after internal state has been released, so a callback may call
//! back into the facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::domain::connection::ConnectionState;
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::symbol::Symbol;

/// A change visible to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The connection moved to a new state.
    ConnectionStateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A watched symbol received a new snapshot.
    SnapshotUpdated(MarketSnapshot),
    /// A symbol was unwatched and its snapshot discarded.
    SnapshotEvicted(Symbol),
}

/// Handle returned by observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Observer callback.
pub type Observer = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Registered observers.
#[derive(Default)]
pub struct ObserverList {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("count", &self.len())
            .finish()
    }
}

impl ObserverList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn subscribe(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver events to every observer, in order.
    ///
    /// The list is copied before any callback runs; observers added or
    /// removed by a callback take effect from the next dispatch.
    pub fn dispatch(&self, events: &[StreamEvent]) {
        if events.is_empty() {
            return;
        }

        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for event in events {
            for observer in &observers {
                observer(event);
            }
        }
    }
}
