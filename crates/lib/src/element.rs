//! Elements of the replicated tree.

use crate::address::Address;
use crate::change::{ChangeId, ReplicaId};
use crate::index::Keyed;

/// A node in the replicated tree.
///
/// The address is both the element's identity and its position in the global
/// order; siblings are ordered by address. Each mutable field remembers the
/// change that last wrote it so concurrent writes resolve the same way on
/// every replica.
///
/// Removing an element only marks it. A removed element, and everything
/// whose parent chain passes through one, stays known but is hidden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    address: Address,
    origin: ReplicaId,
    parent: Option<Address>,
    name: String,
    value: Vec<u8>,
    name_stamp: Option<ChangeId>,
    value_stamp: Option<ChangeId>,
    parent_stamp: Option<ChangeId>,
    removed: Option<ChangeId>,
}

impl Element {
    pub(crate) fn new(
        address: Address,
        origin: ReplicaId,
        parent: Option<Address>,
        name: String,
        value: Vec<u8>,
    ) -> Self {
        Self {
            address,
            origin,
            parent,
            name,
            value,
            name_stamp: None,
            value_stamp: None,
            parent_stamp: None,
            removed: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Replica that created the element. Permission scopes are evaluated
    /// against this, not against whichever replica holds the element.
    pub fn origin(&self) -> ReplicaId {
        self.origin
    }

    pub fn parent(&self) -> Option<&Address> {
        self.parent.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Whether the element itself was removed. Descendants of a removed
    /// element are hidden without being marked.
    pub fn is_removed(&self) -> bool {
        self.removed.is_some()
    }

    /// The value as UTF-8, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    pub(crate) fn rename(&mut self, name: String, stamp: ChangeId) -> bool {
        if !supersedes(self.name_stamp, stamp) {
            return false;
        }
        self.name = name;
        self.name_stamp = Some(stamp);
        true
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>, stamp: ChangeId) -> bool {
        if !supersedes(self.value_stamp, stamp) {
            return false;
        }
        self.value = value;
        self.value_stamp = Some(stamp);
        true
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Address>, stamp: ChangeId) -> bool {
        if !supersedes(self.parent_stamp, stamp) {
            return false;
        }
        self.parent = parent;
        self.parent_stamp = Some(stamp);
        true
    }

    /// Marks the element removed. Removal is permanent; returns `false` if
    /// it was already marked.
    pub(crate) fn tombstone(&mut self, stamp: ChangeId) -> bool {
        if self.removed.is_some() {
            return false;
        }
        self.removed = Some(stamp);
        true
    }
}

impl Keyed for Element {
    fn key(&self) -> &Address {
        &self.address
    }
}

/// Last writer wins, where "last" is the `(origin, sequence)` order.
fn supersedes(current: Option<ChangeId>, incoming: ChangeId) -> bool {
    current.is_none_or(|stamp| incoming > stamp)
}
