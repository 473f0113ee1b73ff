//! Core iteration and option types
//!
//! Option types use camelCase JSON serialization so they can be loaded from
//! the same configuration files as the rest of the A3S ecosystem.

use crate::cancel::CancelToken;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Default number of consumed events kept before the buffer is compacted
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

/// One step of an event iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<E> {
    /// The next event, in firing order
    Event(E),

    /// Iteration is over; carries the stop reason, if one was given
    Done(Option<String>),
}

impl<E> Step<E> {
    /// Whether this is the terminal step
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done(_))
    }

    /// The event, if this step carries one
    pub fn into_event(self) -> Option<E> {
        match self {
            Step::Event(event) => Some(event),
            Step::Done(_) => None,
        }
    }
}

/// How external cancellation is reported to the consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CancelPolicy {
    /// Cancellation ends iteration with `Step::Done(reason)`
    #[default]
    Complete,
    /// Cancellation by the external token yields `EventError::Cancelled`
    ///
    /// Early termination by the consumer still completes cleanly.
    Error,
}

/// Listener options passed through to the event source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerOptions {
    /// Invoke during the capture phase, before non-capture listeners
    #[serde(default)]
    pub capture: bool,

    /// Hint that the listener never blocks the source's default action
    #[serde(default)]
    pub passive: bool,

    /// Remove the listener after its first delivery
    #[serde(default)]
    pub once: bool,

    /// Token that removes the listener when it fires
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

/// Options for creating an event iterator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnOptions {
    /// Listener options passed through to the source
    #[serde(flatten)]
    pub listener: ListenerOptions,

    /// Consumed events kept in the buffer before it is compacted
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// How external cancellation is reported
    #[serde(default)]
    pub cancel_policy: CancelPolicy,
}

impl Default for OnOptions {
    fn default() -> Self {
        Self {
            listener: ListenerOptions::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            cancel_policy: CancelPolicy::default(),
        }
    }
}

impl OnOptions {
    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Stop iterating when `token` fires
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.listener.cancel = Some(token);
        self
    }

    /// Set the compaction watermark
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the cancellation policy
    pub fn with_cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }

    /// Register in the capture phase
    pub fn capture(mut self) -> Self {
        self.listener.capture = true;
        self
    }

    /// Mark the listener passive
    pub fn passive(mut self) -> Self {
        self.listener.passive = true;
        self
    }

    /// Stop after the first event
    pub fn once(mut self) -> Self {
        self.listener.once = true;
        self
    }
}
