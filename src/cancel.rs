//! Cooperative cancellation tokens
//!
//! A `CancelSource` owns the right to fire; any number of `CancelToken`
//! clones observe it. A token fires at most once and carries an optional
//! reason. Callbacks registered with `on_cancel` run synchronously on the
//! thread that fires the token, so listeners can release resources before
//! `cancel()` returns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;

type Callback = Box<dyn FnOnce(Option<String>) + Send>;

struct State {
    /// `Some(reason)` once fired
    fired: Option<Option<String>>,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
    /// Registrations on parent tokens, for tokens built with `any`
    parents: Vec<CancelRegistration>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // State is only mutated in short non-panicking sections
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Observer side of a cancellation signal
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    fired: None,
                    next_id: 0,
                    callbacks: Vec::new(),
                    parents: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a token that is already cancelled with the given reason
    pub fn cancelled_with(reason: Option<String>) -> Self {
        let token = Self::new();
        token.fire(reason);
        token
    }

    /// Create a token that fires when any of `tokens` fires
    ///
    /// The merged token takes the reason of whichever parent fires first.
    /// If a parent is already cancelled, the result is already cancelled.
    pub fn any<'a>(tokens: impl IntoIterator<Item = &'a CancelToken>) -> Self {
        let tokens: Vec<&CancelToken> = tokens.into_iter().collect();
        if let Some(fired) = tokens.iter().find(|t| t.is_cancelled()) {
            return Self::cancelled_with(fired.reason());
        }

        let merged = Self::new();
        for parent in tokens {
            let weak = Arc::downgrade(&merged.inner);
            let registration = parent.on_cancel(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    CancelToken { inner }.fire(reason);
                }
            });

            let mut state = merged.inner.lock();
            if state.fired.is_some() {
                drop(state);
                registration.disarm();
            } else {
                state.parents.push(registration);
            }
        }
        merged
    }

    /// Create a token that fires after `duration`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn timeout(duration: Duration, reason: Option<String>) -> Self {
        let token = Self::new();
        let weak = Arc::downgrade(&token.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                CancelToken { inner }.fire(reason);
            }
        });
        token
    }

    /// Whether the token has fired
    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().fired.is_some()
    }

    /// The reason the token fired with, if it fired with one
    pub fn reason(&self) -> Option<String> {
        self.inner.lock().fired.clone().flatten()
    }

    /// Register a callback to run when the token fires
    ///
    /// If the token already fired, the callback runs immediately on the
    /// calling thread and the returned registration is inert.
    pub fn on_cancel(&self, f: impl FnOnce(Option<String>) + Send + 'static) -> CancelRegistration {
        let mut state = self.inner.lock();
        if let Some(reason) = state.fired.clone() {
            drop(state);
            f(reason);
            return CancelRegistration { token: Weak::new(), id: 0 };
        }

        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, Box::new(f)));
        CancelRegistration {
            token: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Wait until the token fires, returning its reason
    pub async fn cancelled(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(reason) = self.inner.lock().fired.clone() {
                return reason;
            }
            notified.await;
        }
    }

    /// Fire the token; returns false if it had already fired
    pub(crate) fn fire(&self, reason: Option<String>) -> bool {
        let (callbacks, parents) = {
            let mut state = self.inner.lock();
            if state.fired.is_some() {
                return false;
            }
            state.fired = Some(reason.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.parents),
            )
        };

        for parent in parents {
            parent.disarm();
        }
        self.inner.notify.notify_waiters();

        for (_, callback) in callbacks {
            callback(reason.clone());
        }
        true
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CancelToken")
            .field("cancelled", &state.fired.is_some())
            .field("reason", &state.fired.clone().flatten())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

/// Owner side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSource {
    token: CancelToken,
}

impl CancelSource {
    /// Create a new, live source
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
        }
    }

    /// Get a token observing this source
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Fire the token with an optional reason
    ///
    /// Returns true if this call fired it; later calls are no-ops.
    pub fn cancel(&self, reason: Option<String>) -> bool {
        self.token.fire(reason)
    }

    /// Fire the token with a reason
    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        self.cancel(Some(reason.into()))
    }

    /// Fire the token once `duration` has elapsed, unless it fired earlier
    ///
    /// Must be called from within a Tokio runtime. The timer does not keep
    /// the source alive.
    pub fn cancel_after(&self, duration: Duration, reason: Option<String>) {
        let weak = Arc::downgrade(&self.token.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                if (CancelToken { inner }).fire(reason.clone()) {
                    tracing::debug!(?reason, "Cancel deadline reached");
                }
            }
        });
    }

    /// Whether the source has fired
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a callback registered with `CancelToken::on_cancel`
///
/// Dropping the handle leaves the callback armed; call `disarm` to remove it.
#[derive(Debug)]
pub struct CancelRegistration {
    token: Weak<Inner>,
    id: u64,
}

impl CancelRegistration {
    /// Remove the callback if it has not run yet
    pub fn disarm(self) {
        if let Some(inner) = self.token.upgrade() {
            inner.lock().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}
