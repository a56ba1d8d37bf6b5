//! Change records exchanged between replicas.
//!
//! A [`Change`] is the immutable unit of replication: every local mutation
//! produces one, the [`ChangeLog`](crate::log::ChangeLog) keeps them, and the
//! sync engine ships them to peers in their wire form (see [`codec`]).

pub mod codec;
mod errors;
mod id;
mod operation;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

pub use errors::ChangeError;
pub use id::{ChangeId, ReplicaId};
pub use operation::{AddPayload, MovePayload, Operation, RenamePayload, SetValuePayload};

/// The acting role of whoever authored a change.
///
/// Roles are supplied by the caller on every mutation; this crate never
/// infers identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of operation a change performs. Also the unit permissions are
/// granted on.
///
/// `Remove` is sometimes called "delete" and `SetValue` "modify".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Insert a new element (as a root or under a parent).
    Add,
    /// Remove an element and its descendants.
    Remove,
    /// Change an element's name.
    Rename,
    /// Replace an element's value.
    SetValue,
    /// Re-parent an element.
    Move,
    /// Add a permission rule.
    Grant,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 6] = [
        ChangeKind::Add,
        ChangeKind::Remove,
        ChangeKind::Rename,
        ChangeKind::SetValue,
        ChangeKind::Move,
        ChangeKind::Grant,
    ];
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
            ChangeKind::Rename => "rename",
            ChangeKind::SetValue => "set_value",
            ChangeKind::Move => "move",
            ChangeKind::Grant => "grant",
        };
        f.write_str(name)
    }
}

/// An immutable, replicated mutation record.
///
/// Field order is the wire order: origin, sequence, kind, target address,
/// payload and acting role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Replica that authored the change.
    pub origin: ReplicaId,
    /// Monotonic, gapless per origin, starting at 1.
    pub sequence: u64,
    pub kind: ChangeKind,
    /// Element the change is about. Empty for grants on a whole origin.
    pub target: Address,
    /// Kind-specific operation data, see [`Operation`].
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub role: Role,
}

impl Change {
    pub fn id(&self) -> ChangeId {
        ChangeId::new(self.origin, self.sequence)
    }

    /// Decodes the payload into the operation it describes.
    pub fn operation(&self) -> Result<Operation, ChangeError> {
        Operation::decode(self.kind, &self.payload)
    }
}
