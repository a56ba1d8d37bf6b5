//! Change notifications.
//!
//! After a mutation commits, local or remote, the replica reports what changed
//! to every registered [`ReplicaObserver`]. Observers run after the write lock
//! is released and see only committed state.

use std::fmt;
use std::sync::Arc;

use crate::address::Address;
use crate::change::ChangeId;
use crate::log::Source;
use crate::permission::PermissionRule;

/// A single observable effect of a committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaEvent {
    Added {
        address: Address,
        parent: Option<Address>,
        /// Ascending position in the whole index when inserted.
        rank: usize,
    },
    Removed {
        address: Address,
    },
    Renamed {
        address: Address,
        name: String,
    },
    ValueSet {
        address: Address,
        value: Vec<u8>,
    },
    Moved {
        address: Address,
        parent: Option<Address>,
    },
    PermissionsChanged {
        rule: PermissionRule,
    },
}

/// An event together with the change that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub change: ChangeId,
    pub source: Source,
    pub event: ReplicaEvent,
}

/// Receives notifications for committed changes.
pub trait ReplicaObserver: Send + Sync {
    fn on_notification(&self, notification: &Notification);
}

impl<F> ReplicaObserver for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification) {
        self(notification)
    }
}

/// Observers registered with a replica context.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ReplicaObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Arc<dyn ReplicaObserver>) {
        self.observers.push(observer);
    }

    /// Delivers notifications to every observer, in registration order.
    pub fn notify(&self, notifications: &[Notification]) {
        for notification in notifications {
            for observer in &self.observers {
                observer.on_notification(notification);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}
