//! Accessor registry — convenience entry points bound to an event type
//!
//! `On<E>` hands out an `OnEvent<E>` per event-type name. The accessor for a
//! name is built on first lookup and cached for the registry's lifetime, so
//! every lookup of the same name yields the identical handle. Members
//! installed with `define` take precedence over generated accessors and are
//! returned unchanged.

use crate::error::{EventError, Result};
use crate::iter::{on, EventIter};
use crate::source::EventSource;
use crate::types::OnOptions;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

type OnFn<E> = dyn Fn(&dyn EventSource<E>, OnOptions) -> Result<EventIter<E>> + Send + Sync;

/// An entry point that creates iterators for a fixed event type
pub struct OnEvent<E> {
    event_type: Arc<str>,
    f: Arc<OnFn<E>>,
}

impl<E> Clone for OnEvent<E> {
    fn clone(&self) -> Self {
        Self {
            event_type: self.event_type.clone(),
            f: self.f.clone(),
        }
    }
}

impl<E> fmt::Debug for OnEvent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnEvent")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

impl<E: Send + 'static> OnEvent<E> {
    /// An accessor that calls `on` with `event_type`
    pub fn bound(event_type: &str) -> Self {
        let name: Arc<str> = Arc::from(event_type);
        let bound = name.clone();
        Self {
            event_type: name,
            f: Arc::new(move |source: &dyn EventSource<E>, options: OnOptions| {
                on(source, &bound, options)
            }),
        }
    }
}

impl<E> OnEvent<E> {
    /// An accessor backed by a custom constructor
    pub fn from_fn(
        event_type: &str,
        f: impl Fn(&dyn EventSource<E>, OnOptions) -> Result<EventIter<E>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            event_type: Arc::from(event_type),
            f: Arc::new(f),
        }
    }

    /// Create an iterator from `source`
    pub fn call(&self, source: &dyn EventSource<E>, options: OnOptions) -> Result<EventIter<E>> {
        (self.f)(source, options)
    }

    /// The event type this accessor is bound to
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Whether both handles refer to the same accessor instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

/// Lazily populated registry of per-event-type accessors
///
/// Entries are never evicted. Each registry is independent; nothing is
/// shared between instances.
pub struct On<E> {
    /// Explicitly defined members, never shadowed
    members: RwLock<HashMap<String, OnEvent<E>>>,

    /// Accessors generated on first lookup
    cache: RwLock<HashMap<String, OnEvent<E>>>,
}

impl<E> Default for On<E> {
    fn default() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> fmt::Debug for On<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.members.read().map(|m| m.len()).unwrap_or_default();
        let cached = self.cache.read().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("On")
            .field("members", &members)
            .field("cached", &cached)
            .finish()
    }
}

fn poisoned(e: impl fmt::Display) -> EventError {
    EventError::Lock(format!("Accessor registry lock poisoned: {}", e))
}

impl<E: Send + 'static> On<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an iterator directly, without caching an accessor
    pub fn call<S>(&self, source: &S, event_type: &str, options: OnOptions) -> Result<EventIter<E>>
    where
        S: EventSource<E> + ?Sized,
    {
        on(source, event_type, options)
    }

    /// Get the accessor for `event_type`, building it on first use
    pub fn get(&self, event_type: &str) -> Result<OnEvent<E>> {
        if let Some(member) = self.members.read().map_err(poisoned)?.get(event_type) {
            return Ok(member.clone());
        }

        if let Some(cached) = self.cache.read().map_err(poisoned)?.get(event_type) {
            return Ok(cached.clone());
        }

        let mut cache = self.cache.write().map_err(poisoned)?;
        let accessor = cache
            .entry(event_type.to_string())
            .or_insert_with(|| {
                tracing::trace!(event_type, "Accessor created");
                OnEvent::bound(event_type)
            })
            .clone();
        Ok(accessor)
    }

    /// Install a member under `name`
    ///
    /// Later `get(name)` calls return this member unchanged. Returns the
    /// previously defined member, if any.
    pub fn define(&self, name: &str, member: OnEvent<E>) -> Result<Option<OnEvent<E>>> {
        let mut members = self.members.write().map_err(poisoned)?;
        Ok(members.insert(name.to_string(), member))
    }

    /// Whether `name` resolves to a defined member
    pub fn is_defined(&self, name: &str) -> Result<bool> {
        Ok(self.members.read().map_err(poisoned)?.contains_key(name))
    }

    /// Names with a generated accessor, sorted
    pub fn cached(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.cache.read().map_err(poisoned)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
