//! Process-level collaborators shared by a replica and its sync engine.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ReplicaConfig;
use crate::observer::{Notification, ObserverSet, ReplicaObserver};

/// Configuration and observers, passed explicitly to whoever needs them.
#[derive(Debug, Default)]
pub struct ReplicaContext {
    config: ReplicaConfig,
    observers: RwLock<ObserverSet>,
}

impl ReplicaContext {
    pub fn new(config: ReplicaConfig) -> Self {
        Self {
            config,
            observers: RwLock::new(ObserverSet::new()),
        }
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn observe(&self, observer: Arc<dyn ReplicaObserver>) {
        self.observers.write().add(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Delivers notifications to the observers registered right now.
    ///
    /// The observer list is cloned first so an observer may register
    /// another observer without deadlocking.
    pub(crate) fn notify(&self, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        let observers = self.observers.read().clone();
        observers.notify(notifications);
    }
}
