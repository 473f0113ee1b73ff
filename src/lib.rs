//! # a3s-on
//!
//! Pull-based, cancellable async iteration over push-based event sources.
//!
//! ## Overview
//!
//! Callback-driven sources fire listeners whenever they like. `a3s-on`
//! turns one listener registration into an `EventIter` the consumer pulls
//! from at its own pace: events that arrive early are buffered, a consumer
//! that arrives early waits, and stopping from either side releases the
//! listener exactly once.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_on::{on, CancelSource, MemoryEventTarget, OnOptions};
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> a3s_on::Result<()> {
//! let target = MemoryEventTarget::<String>::new();
//! let stop = CancelSource::new();
//!
//! let mut messages = on(&target, "message", OnOptions::default().with_cancel(stop.token()))?;
//!
//! target.dispatch("message", "hello".to_string());
//! while let Some(message) = messages.next().await {
//!     println!("got {}", message);
//!     stop.cancel_with("done");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **EventSource** trait — the push side; registers listeners, honours
//!   cancel tokens
//! - **EventIter** — the pull side; `next_step()` or `Stream`
//! - **CancelSource / CancelToken** — cooperative cancellation with reasons
//! - **On** — registry of cached per-event-type accessors
//! - **MemoryEventTarget** — in-process source for tests and local use

pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod iter;
pub mod known;
pub mod queue;
pub mod registry;
pub mod source;
pub mod subscription;
pub mod types;

// Re-export core types
pub use cancel::{CancelRegistration, CancelSource, CancelToken};
pub use coordinator::{StopCoordinator, StopOrigin};
pub use error::{EventError, Result};
pub use iter::{on, EventIter};
pub use known::{on_known, KnownEvent};
pub use queue::EventQueue;
pub use registry::{On, OnEvent};
pub use source::{EventSource, Listener};
pub use subscription::Subscription;
pub use types::{CancelPolicy, ListenerOptions, OnOptions, Step, DEFAULT_MAX_QUEUE_SIZE};

// Re-export the in-memory source for convenience
pub use source::memory::MemoryEventTarget;
