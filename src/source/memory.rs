//! In-memory event target
//!
//! A process-local `EventSource` for tests, benches, and single-process use.
//! Listeners are grouped per event type; capture listeners run before the
//! rest, each group in registration order.

use super::{EventSource, Listener};
use crate::cancel::CancelRegistration;
use crate::error::{EventError, Result};
use crate::types::ListenerOptions;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

struct Entry<E> {
    id: u64,
    listener: Listener<E>,
    capture: bool,
    once: bool,
    registration: Option<CancelRegistration>,
}

struct TargetInner<E> {
    listeners: RwLock<HashMap<String, Vec<Entry<E>>>>,
    next_id: AtomicU64,
}

impl<E> TargetInner<E> {
    // Listeners are never invoked while the lock is held, so a poisoned
    // map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Entry<E>>>> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Entry<E>>>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, event_type: &str, id: u64) -> Option<Entry<E>> {
        let mut listeners = self.write();
        let entries = listeners.get_mut(event_type)?;
        let pos = entries.iter().position(|e| e.id == id)?;
        let entry = entries.remove(pos);
        if entries.is_empty() {
            listeners.remove(event_type);
        }
        Some(entry)
    }

    fn contains(&self, event_type: &str, id: u64) -> bool {
        self.read()
            .get(event_type)
            .is_some_and(|entries| entries.iter().any(|e| e.id == id))
    }
}

/// In-memory event source
///
/// Cloning yields another handle to the same target.
pub struct MemoryEventTarget<E> {
    inner: Arc<TargetInner<E>>,
}

impl<E> Clone for MemoryEventTarget<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for MemoryEventTarget<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for MemoryEventTarget<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.read();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(t, entries)| (t.as_str(), entries.len()))
            .collect();
        f.debug_struct("MemoryEventTarget")
            .field("listeners", &counts)
            .finish()
    }
}

impl<E> MemoryEventTarget<E> {
    /// Create an empty target
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TargetInner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live listeners for `event_type`
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner.read().get(event_type).map_or(0, Vec::len)
    }

    /// Remove every listener for `event_type`, returning how many were removed
    pub fn clear(&self, event_type: &str) -> usize {
        let removed = self.inner.write().remove(event_type).unwrap_or_default();
        let count = removed.len();
        for entry in removed {
            if let Some(registration) = entry.registration {
                registration.disarm();
            }
        }
        count
    }
}

impl<E: Clone> MemoryEventTarget<E> {
    /// Deliver `event` to every listener for `event_type`
    ///
    /// Returns the number of listeners invoked. A listener removed by an
    /// earlier listener during the same dispatch is skipped.
    pub fn dispatch(&self, event_type: &str, event: E) -> usize {
        let snapshot: Vec<(u64, Listener<E>, bool)> = {
            let listeners = self.inner.read();
            let Some(entries) = listeners.get(event_type) else {
                return 0;
            };
            let capture = entries.iter().filter(|e| e.capture);
            let bubble = entries.iter().filter(|e| !e.capture);
            capture
                .chain(bubble)
                .map(|e| (e.id, e.listener.clone(), e.once))
                .collect()
        };

        let mut invoked = 0;
        for (id, listener, once) in snapshot {
            if once {
                match self.inner.remove(event_type, id) {
                    Some(entry) => {
                        if let Some(registration) = entry.registration {
                            registration.disarm();
                        }
                    }
                    None => continue,
                }
            } else if !self.inner.contains(event_type, id) {
                continue;
            }

            listener(event.clone());
            invoked += 1;
        }

        tracing::trace!(event_type, invoked, "Event dispatched");
        invoked
    }
}

impl<E: Send + Sync + 'static> EventSource<E> for MemoryEventTarget<E> {
    fn add_listener(
        &self,
        event_type: &str,
        listener: Listener<E>,
        options: ListenerOptions,
    ) -> Result<()> {
        if event_type.is_empty() {
            return Err(EventError::Registration {
                event_type: String::new(),
                reason: "Event type cannot be empty".to_string(),
            });
        }

        // A listener whose token already fired is never registered
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Ok(());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Entry {
                id,
                listener,
                capture: options.capture,
                once: options.once,
                registration: None,
            });

        if let Some(token) = options.cancel {
            let weak: Weak<TargetInner<E>> = Arc::downgrade(&self.inner);
            let key = event_type.to_string();
            let registration = token.on_cancel(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.remove(&key, id);
                }
            });

            let mut listeners = self.inner.write();
            let entry = listeners
                .get_mut(event_type)
                .and_then(|entries| entries.iter_mut().find(|e| e.id == id));
            match entry {
                Some(entry) => entry.registration = Some(registration),
                None => {
                    drop(listeners);
                    registration.disarm();
                }
            }
        }

        tracing::debug!(
            event_type,
            listener_id = id,
            capture = options.capture,
            passive = options.passive,
            once = options.once,
            "Listener added"
        );
        Ok(())
    }
}
