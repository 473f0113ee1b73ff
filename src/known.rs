//! Well-known event names
//!
//! String constants for the event types most sources emit, shortcuts on the
//! accessor registry, and `KnownEvent` for mapping a name to its payload type
//! at compile time.

use crate::error::Result;
use crate::iter::{on, EventIter};
use crate::registry::{On, OnEvent};
use crate::source::EventSource;
use crate::types::OnOptions;

pub const ABORT: &str = "abort";
pub const BLUR: &str = "blur";
pub const CLICK: &str = "click";
pub const FOCUS: &str = "focus";

/// Every well-known event name
pub const KNOWN_EVENTS: [&str; 4] = [ABORT, BLUR, CLICK, FOCUS];

/// Whether `name` is one of the well-known event names
pub fn is_known(name: &str) -> bool {
    KNOWN_EVENTS.contains(&name)
}

/// A named event with a fixed payload type
///
/// ```rust
/// use a3s_on::{on_known, KnownEvent, MemoryEventTarget, OnOptions};
///
/// #[derive(Clone)]
/// struct PointerEvent { x: i32, y: i32 }
///
/// struct Click;
/// impl KnownEvent for Click {
///     const NAME: &'static str = "click";
///     type Payload = PointerEvent;
/// }
///
/// let target = MemoryEventTarget::<PointerEvent>::new();
/// let clicks = on_known::<Click, _>(&target, OnOptions::default()).unwrap();
/// assert_eq!(clicks.event_type(), "click");
/// ```
pub trait KnownEvent {
    /// Event type name used to register with the source
    const NAME: &'static str;

    /// Payload delivered for this event
    type Payload: Send + 'static;
}

/// Create an iterator for a `KnownEvent`, checked against the source's
/// payload type at compile time
pub fn on_known<K, S>(source: &S, options: OnOptions) -> Result<EventIter<K::Payload>>
where
    K: KnownEvent,
    S: EventSource<K::Payload> + ?Sized,
{
    on(source, K::NAME, options)
}

impl<E: Send + 'static> On<E> {
    /// Accessor for `abort` events
    pub fn abort(&self) -> Result<OnEvent<E>> {
        self.get(ABORT)
    }

    /// Accessor for `blur` events
    pub fn blur(&self) -> Result<OnEvent<E>> {
        self.get(BLUR)
    }

    /// Accessor for `click` events
    pub fn click(&self) -> Result<OnEvent<E>> {
        self.get(CLICK)
    }

    /// Accessor for `focus` events
    pub fn focus(&self) -> Result<OnEvent<E>> {
        self.get(FOCUS)
    }
}
