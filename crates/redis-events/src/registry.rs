//! In-process listener registry.
//!
//! The generic dispatch half of the emitter: ordered listeners per event
//! name, `once` auto-removal, counts, and removal bookkeeping. The facade
//! composes over this registry and layers the broker side on top; nothing
//! in here knows about connections or wire formats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// Callback invoked with the decoded argument list of one event.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    once: bool,
    callback: Listener,
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Number of listeners invoked.
    pub invoked: usize,

    /// Number of `once` listeners removed by this dispatch.
    pub removed: usize,
}

/// Ordered listener registry keyed by event name.
///
/// Listeners fire in registration order. Callbacks are invoked outside the
/// registry lock, so a listener may freely register or remove listeners
/// (the changes take effect for the next dispatch).
#[derive(Default)]
pub struct LocalRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<ListenerEntry>>>,
}

impl LocalRegistry {
    /// Register a listener for `event`, returning its removal handle.
    ///
    /// A `once` listener is removed immediately before its first
    /// invocation.
    pub fn add(&self, event: &str, once: bool, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(event.to_owned())
            .or_default()
            .push(ListenerEntry { id, once, callback });
        id
    }

    /// Remove one listener. Returns whether it was still registered.
    pub fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut map = self.lock();
        let Some(entries) = map.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            map.remove(event);
        }
        removed
    }

    /// Remove every listener for `event`, returning how many there were.
    pub fn remove_all(&self, event: &str) -> usize {
        self.lock().remove(event).map_or(0, |entries| entries.len())
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Invoke every listener registered for `event`, in registration
    /// order, with the given arguments.
    ///
    /// `once` listeners are unregistered before the invocation pass, so a
    /// listener that re-emits the same event cannot re-trigger them.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> Dispatch {
        let (callbacks, removed) = {
            let mut map = self.lock();
            let Some(entries) = map.get_mut(event) else {
                return Dispatch {
                    invoked: 0,
                    removed: 0,
                };
            };
            let callbacks: Vec<Listener> = entries
                .iter()
                .map(|entry| Arc::clone(&entry.callback))
                .collect();
            let before = entries.len();
            entries.retain(|entry| !entry.once);
            let removed = before.saturating_sub(entries.len());
            if entries.is_empty() {
                map.remove(event);
            }
            (callbacks, removed)
        };

        for callback in &callbacks {
            callback(args);
        }

        Dispatch {
            invoked: callbacks.len(),
            removed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<ListenerEntry>>> {
        // Callbacks never run under the lock, so a poisoned mutex can only
        // mean a panic between lock and unlock in this module; the map is
        // still structurally sound.
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
