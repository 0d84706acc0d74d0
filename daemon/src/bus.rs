use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use common::TransitionOrigin;

/// A request to switch the visible clip. Created when a trigger fires and
/// consumed (accepted or dropped) immediately by the engine, never queued.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub target_url: String,
    pub origin: TransitionOrigin,
    pub requested_at: Instant,
}

impl TransitionRequest {
    pub fn new(target_url: &str, origin: TransitionOrigin) -> Self {
        Self {
            target_url: target_url.to_string(),
            origin,
            requested_at: Instant::now(),
        }
    }
}

/// How a transition request settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The clip played through to its ended signal
    Completed,
    /// The safety window elapsed first; the session was forced back to idle
    Forced,
    /// Another session was in flight; the request was discarded
    Dropped,
    /// The clip is unreachable; the fallback image was engaged instead
    Unavailable,
}

/// Events fanned out to subscribers
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A trigger asking the engine to switch the visible clip
    Trigger(TransitionRequest),
    /// A transition session settled
    TransitionCompleted {
        url: String,
        outcome: TransitionOutcome,
    },
    /// A clip is terminally unavailable; collaborators should show the
    /// static image instead
    FallbackEngaged { url: String, image: Option<String> },
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Decouples triggers from the engine: ordered listener registry with
/// best-effort fan-out.
///
/// The bus holds no transition state. A panicking listener is caught and
/// logged so it cannot block later listeners or the engine. The boot guard
/// swallows the very first trigger publish after startup; nothing should
/// play before the first real navigation.
pub struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    boot_armed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            boot_armed: AtomicBool::new(false),
        }
    }

    /// Register a listener; notified in registration order
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        SubscriptionId(id)
    }

    /// Remove a listener. Returns false if the id was already gone.
    #[allow(dead_code)] // Part of the subscription API
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        listeners.len() != before
    }

    /// Fan an event out to all current listeners, in registration order
    pub fn publish(&self, event: BusEvent) {
        if let BusEvent::Trigger(req) = &event {
            if !self.boot_armed.swap(true, Ordering::SeqCst) {
                log::debug!(
                    "Boot guard: suppressing first trigger ({:?} -> {})",
                    req.origin,
                    req.target_url
                );
                return;
            }
        }

        // Snapshot so a listener that (un)subscribes reentrantly cannot
        // deadlock the registry lock
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                log::error!("Event listener panicked, continuing fan-out");
            }
        }
    }

    /// Number of registered listeners
    #[allow(dead_code)] // Part of the subscription API
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}
