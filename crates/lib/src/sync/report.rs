//! Per-round results of applying remote changes.

use thiserror::Error;

use crate::address::Address;
use crate::change::{Change, ChangeId, ChangeKind, Role};

/// Why a single change was refused.
///
/// Rejections never abort a round; the remaining changes are still applied.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// No rule allows the acting role to perform this kind of change here.
    #[error("Permission denied: role '{role}' may not {kind}")]
    PermissionDenied { role: Role, kind: ChangeKind },

    /// The change skips sequence numbers from its origin. It is not recorded
    /// and will be resent by the next poll.
    #[error("Sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    /// The payload does not decode as the declared kind.
    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },

    /// The element the change refers to is not known. Remote changes in
    /// this state wait instead of being refused.
    #[error("Unknown element {address}")]
    UnknownTarget { address: Address },

    /// An element already exists at the address being added.
    #[error("Address {address} is already in use")]
    AddressCollision { address: Address },

    /// Elements cannot live at the empty address.
    #[error("Invalid element address {address:?}")]
    InvalidAddress { address: Address },

    /// The move would make an element its own ancestor.
    #[error("Invalid move of {address}: {reason}")]
    InvalidMove { address: Address, reason: String },
}

impl RejectionReason {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RejectionReason::PermissionDenied { .. })
    }

    /// Whether the change was recorded. Gapped changes are not and will be
    /// accepted once the missing ones arrive.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, RejectionReason::SequenceGap { .. })
    }
}

/// A change that was refused during a sync round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub id: ChangeId,
    pub kind: ChangeKind,
    pub reason: RejectionReason,
}

impl Rejection {
    pub(crate) fn new(change: &Change, reason: RejectionReason) -> Self {
        Self {
            id: change.id(),
            kind: change.kind,
            reason,
        }
    }
}

/// Outcome of one `apply_changes` round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Changes that took effect.
    pub applied: Vec<ChangeId>,
    /// Changes recorded without effect because a later write already won.
    pub superseded: Vec<ChangeId>,
    /// Changes already covered by the local frontier.
    pub duplicates: usize,
    pub rejections: Vec<Rejection>,
    /// Recorded changes, from this round or earlier ones, that still refer
    /// to an element this replica has not seen.
    pub waiting: Vec<ChangeId>,
}

impl ApplyReport {
    /// Number of changes refused for lack of permission.
    pub fn denied(&self) -> usize {
        self.rejections
            .iter()
            .filter(|r| r.reason.is_permission_denied())
            .count()
    }

    /// Number of changes refused for any other reason.
    pub fn invalid(&self) -> usize {
        self.rejections.len() - self.denied()
    }

    /// Whether nothing was refused and nothing is left waiting.
    pub fn is_clean(&self) -> bool {
        self.rejections.is_empty() && self.waiting.is_empty()
    }
}
