//! Observers of the current synchronization error.
//!
//! Observers are registered with a callback and identified by an
//! [`ObserverToken`]. A callback is invoked with the current error as soon as
//! it is registered, and again every time the error is set or cleared.
//! Observers bound to an owner are dropped automatically once the owner is
//! gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use bridge_traits::SynchronizationError;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

/// Callback receiving the current error, `None` once it is cleared.
pub type ErrorObserver = Arc<dyn Fn(Option<SynchronizationError>) + Send + Sync>;

/// Handle returned when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverToken(Uuid);

impl ObserverToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registration {
    owner: Option<Weak<dyn std::any::Any + Send + Sync>>,
    callback: ErrorObserver,
}

impl Registration {
    fn is_alive(&self) -> bool {
        self.owner
            .as_ref()
            .map_or(true, |owner| owner.strong_count() > 0)
    }
}

#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<HashMap<ObserverToken, Registration>>,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` and call it once with `current`.
    pub fn add(
        &self,
        current: Option<SynchronizationError>,
        callback: ErrorObserver,
    ) -> ObserverToken {
        self.insert(None, current, callback)
    }

    /// Like [`add`](Self::add), but the observer is removed once `owner` is dropped.
    pub fn add_bound<T>(
        &self,
        owner: &Arc<T>,
        current: Option<SynchronizationError>,
        callback: ErrorObserver,
    ) -> ObserverToken
    where
        T: Send + Sync + 'static,
    {
        let owner: Arc<dyn std::any::Any + Send + Sync> = owner.clone();
        self.insert(Some(Arc::downgrade(&owner)), current, callback)
    }

    fn insert(
        &self,
        owner: Option<Weak<dyn std::any::Any + Send + Sync>>,
        current: Option<SynchronizationError>,
        callback: ErrorObserver,
    ) -> ObserverToken {
        let token = ObserverToken::new();
        self.lock().insert(
            token,
            Registration {
                owner,
                callback: Arc::clone(&callback),
            },
        );
        trace!(%token, "Observer added");
        callback(current);
        token
    }

    /// Returns `true` if the token was registered.
    pub fn remove(&self, token: ObserverToken) -> bool {
        let removed = self.lock().remove(&token).is_some();
        trace!(%token, removed, "Observer removed");
        removed
    }

    /// Call every live observer with `error`.
    ///
    /// Callbacks run after the registry lock is released, so they may add or
    /// remove observers.
    pub fn notify(&self, error: Option<SynchronizationError>) {
        let callbacks: Vec<ErrorObserver> = {
            let mut observers = self.lock();
            observers.retain(|_, registration| registration.is_alive());
            observers
                .values()
                .map(|registration| Arc::clone(&registration.callback))
                .collect()
        };

        for callback in callbacks {
            callback(error);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverToken, Registration>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (ErrorObserver, Arc<Mutex<Vec<Option<SynchronizationError>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ErrorObserver = Arc::new(move |error| sink.lock().unwrap().push(error));
        (callback, seen)
    }

    #[test]
    fn test_add_replays_current_error() {
        let registry = ObserverRegistry::new();
        let (callback, seen) = recorder();

        registry.add(Some(SynchronizationError::FileUnavailable), callback);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(SynchronizationError::FileUnavailable)]
        );
    }

    #[test]
    fn test_removed_observer_is_not_notified() {
        let registry = ObserverRegistry::new();
        let (callback, seen) = recorder();

        let token = registry.add(None, callback);
        assert!(registry.remove(token));
        assert!(!registry.remove(token));
        registry.notify(Some(SynchronizationError::ContainerNotFound));

        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_bound_observer_dies_with_owner() {
        let registry = ObserverRegistry::new();
        let (callback, seen) = recorder();
        let owner = Arc::new(String::from("settings screen"));

        registry.add_bound(&owner, None, callback);
        registry.notify(Some(SynchronizationError::FileUnavailable));
        drop(owner);
        registry.notify(None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some(SynchronizationError::FileUnavailable)]
        );
        assert!(registry.is_empty());
    }
}
