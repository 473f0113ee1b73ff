//! Stop coordination for a single iterator
//!
//! An iterator can be stopped from two places: the caller's external token
//! and the consumer ending iteration early. `StopCoordinator` owns the
//! internal source for the second, merges both into one token handed to the
//! event source, and routes both into the same stop callback.

use crate::cancel::{CancelRegistration, CancelSource, CancelToken};
use std::sync::Arc;

/// Where a stop request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOrigin {
    /// The externally supplied token fired
    External,
    /// The consumer terminated or dropped the iterator
    Consumer,
}

type StopFn = Arc<dyn Fn(StopOrigin, Option<String>) + Send + Sync>;

/// Merges an optional external token with an internal early-return token
#[derive(Debug)]
pub struct StopCoordinator {
    internal: CancelSource,
    external: Option<CancelToken>,
    unified: CancelToken,
    registrations: Vec<CancelRegistration>,
}

impl StopCoordinator {
    /// Build a coordinator around an optional external token
    pub fn new(external: Option<CancelToken>) -> Self {
        let internal = CancelSource::new();
        let unified = match &external {
            Some(token) => CancelToken::any([token, &internal.token()]),
            None => internal.token(),
        };

        Self {
            internal,
            external,
            unified,
            registrations: Vec::new(),
        }
    }

    /// The merged token; fires when either origin stops
    pub fn token(&self) -> CancelToken {
        self.unified.clone()
    }

    /// Whether either origin has stopped
    pub fn is_stopped(&self) -> bool {
        self.unified.is_cancelled()
    }

    /// Route stops from both origins into `f`
    ///
    /// `f` may be called once per origin; callers make the transition
    /// idempotent. If the external token already fired, `f` runs before
    /// this returns.
    pub fn on_stop(&mut self, f: impl Fn(StopOrigin, Option<String>) + Send + Sync + 'static) {
        let f: StopFn = Arc::new(f);

        if let Some(external) = &self.external {
            let cb = f.clone();
            self.registrations
                .push(external.on_cancel(move |reason| cb(StopOrigin::External, reason)));
        }

        let cb = f;
        self.registrations.push(
            self.internal
                .token()
                .on_cancel(move |reason| cb(StopOrigin::Consumer, reason)),
        );
    }

    /// Stop from the consumer side
    ///
    /// Returns false if the consumer already stopped. Callbacks left on the
    /// external token are removed so it does not accumulate dead entries.
    pub fn stop(&mut self, reason: Option<String>) -> bool {
        let fired = self.internal.cancel(reason);
        for registration in self.registrations.drain(..) {
            registration.disarm();
        }
        fired
    }
}

impl Drop for StopCoordinator {
    fn drop(&mut self) {
        for registration in self.registrations.drain(..) {
            registration.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorded(coordinator: &mut StopCoordinator) -> Arc<Mutex<Vec<(StopOrigin, Option<String>)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        coordinator.on_stop(move |origin, reason| l.lock().unwrap().push((origin, reason)));
        log
    }

    #[test]
    fn test_consumer_stop() {
        let mut coordinator = StopCoordinator::new(None);
        let log = recorded(&mut coordinator);
        let token = coordinator.token();

        assert!(coordinator.stop(Some("bye".to_string())));
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("bye"));
        assert_eq!(
            *log.lock().unwrap(),
            vec![(StopOrigin::Consumer, Some("bye".to_string()))]
        );

        assert!(!coordinator.stop(None));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_external_stop() {
        let external = CancelSource::new();
        let mut coordinator = StopCoordinator::new(Some(external.token()));
        let log = recorded(&mut coordinator);

        external.cancel_with("R");
        assert!(coordinator.is_stopped());
        assert_eq!(coordinator.token().reason().as_deref(), Some("R"));
        assert_eq!(
            *log.lock().unwrap(),
            vec![(StopOrigin::External, Some("R".to_string()))]
        );
    }

    #[test]
    fn test_already_stopped_external_runs_callback_immediately() {
        let external = CancelToken::cancelled_with(Some("Oops!".to_string()));
        let mut coordinator = StopCoordinator::new(Some(external));
        assert!(coordinator.is_stopped());

        let log = recorded(&mut coordinator);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(StopOrigin::External, Some("Oops!".to_string()))]
        );
    }

    #[test]
    fn test_consumer_stop_detaches_from_external() {
        let external = CancelSource::new();
        let mut coordinator = StopCoordinator::new(Some(external.token()));
        let log = recorded(&mut coordinator);

        coordinator.stop(None);
        external.cancel_with("late");

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, StopOrigin::Consumer);
        assert_eq!(coordinator.token().reason(), None);
    }
}
