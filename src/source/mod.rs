//! Event source trait — the push side of the adapter
//!
//! Anything that reports named occurrences by invoking registered callbacks
//! can implement `EventSource`. Unregistration is implicit: the source must
//! stop delivering to a listener once the `cancel` token in its
//! `ListenerOptions` fires.

use crate::error::Result;
use crate::types::ListenerOptions;
use std::sync::Arc;

pub mod memory;

/// Callback invoked by a source for every delivered event
pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Core trait for push-based event sources
///
/// The event payload type is fixed by the source, so iterators created from
/// a source yield that type without any further annotation.
pub trait EventSource<E>: Send + Sync {
    /// Register `listener` for events named `event_type`
    ///
    /// Implementations must honour `options.cancel`: once the token fires,
    /// the listener is never invoked again. An error means the listener was
    /// not registered.
    fn add_listener(
        &self,
        event_type: &str,
        listener: Listener<E>,
        options: ListenerOptions,
    ) -> Result<()>;
}

impl<E, S> EventSource<E> for Arc<S>
where
    S: EventSource<E> + ?Sized,
{
    fn add_listener(
        &self,
        event_type: &str,
        listener: Listener<E>,
        options: ListenerOptions,
    ) -> Result<()> {
        (**self).add_listener(event_type, listener, options)
    }
}
