//! Error types for local replica operations.

use thiserror::Error;

use crate::address::Address;
use crate::change::{ChangeKind, Role};
use crate::sync::RejectionReason;

/// Errors returned by the local mutation API of a [`crate::Replica`].
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaError {
    /// The acting role lacks the permission for this kind of change.
    #[error("Permission denied: role '{role}' may not {kind}")]
    PermissionDenied { role: Role, kind: ChangeKind },

    /// No element exists at the address.
    #[error("Element not found: {address}")]
    ElementNotFound { address: Address },

    /// The move would place an element inside its own subtree.
    #[error("Invalid move of {address}: {reason}")]
    InvalidMove { address: Address, reason: String },

    /// The anchor of a positional insert is not a child of the given parent.
    #[error("{anchor} is not a child of {parent:?}")]
    NotAChild {
        anchor: Address,
        parent: Option<Address>,
    },

    /// An earlier-logged write with a higher change id already holds the
    /// field, so this change would have no effect. Nothing was logged.
    #[error("{kind} of {address} lost to a write with a higher change id")]
    Superseded { address: Address, kind: ChangeKind },

    /// The change was refused for another reason.
    #[error("Change rejected: {reason}")]
    Rejected { reason: RejectionReason },
}

impl ReplicaError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ReplicaError::PermissionDenied { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicaError::ElementNotFound { .. })
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, ReplicaError::Superseded { .. })
    }
}

impl From<RejectionReason> for ReplicaError {
    fn from(reason: RejectionReason) -> Self {
        match reason {
            RejectionReason::PermissionDenied { role, kind } => {
                ReplicaError::PermissionDenied { role, kind }
            }
            RejectionReason::UnknownTarget { address } => ReplicaError::ElementNotFound { address },
            RejectionReason::InvalidMove { address, reason } => {
                ReplicaError::InvalidMove { address, reason }
            }
            reason => ReplicaError::Rejected { reason },
        }
    }
}

impl From<ReplicaError> for crate::Error {
    fn from(err: ReplicaError) -> Self {
        crate::Error::Replica(err)
    }
}
