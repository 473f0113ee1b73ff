//! Listener registration lifecycle
//!
//! A `Subscription` owns exactly one listener registration on an event
//! source. The listener is registered with the coordinator's merged token,
//! so releasing the subscription is just firing that token; the source drops
//! the listener in response.

use crate::coordinator::StopCoordinator;
use crate::error::Result;
use crate::source::{EventSource, Listener};
use crate::types::ListenerOptions;

/// A listener registration owned by one iterator
#[derive(Debug)]
pub struct Subscription {
    event_type: String,
    coordinator: StopCoordinator,
    registered: bool,
}

impl Subscription {
    /// Register `listener` on `source` for `event_type`
    ///
    /// If the coordinator is already stopped the source is never touched.
    /// A registration error from the source is returned as-is.
    pub fn subscribe<E, S>(
        source: &S,
        event_type: &str,
        listener: Listener<E>,
        mut options: ListenerOptions,
        coordinator: StopCoordinator,
    ) -> Result<Self>
    where
        S: EventSource<E> + ?Sized,
    {
        if coordinator.is_stopped() {
            tracing::debug!(event_type, "Already cancelled, skipping registration");
            return Ok(Self {
                event_type: event_type.to_string(),
                coordinator,
                registered: false,
            });
        }

        options.cancel = Some(coordinator.token());
        source.add_listener(event_type, listener, options)?;

        Ok(Self {
            event_type: event_type.to_string(),
            coordinator,
            registered: true,
        })
    }

    /// Release the registration
    ///
    /// Returns true on the first call; later calls are no-ops.
    pub fn unsubscribe(&mut self, reason: Option<String>) -> bool {
        let released = self.coordinator.stop(reason);
        if released && self.registered {
            tracing::debug!(event_type = %self.event_type, "Subscription released");
        }
        released
    }

    /// Whether a listener was registered with the source
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Whether the listener is still live on the source
    pub fn is_active(&self) -> bool {
        self.registered && !self.coordinator.is_stopped()
    }

    /// The event type this subscription listens for
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe(None);
    }
}
