//! Error types for the synchronization module.

use thiserror::Error;

use super::ProtocolState;
use crate::change::ReplicaId;

/// Errors that can occur while exchanging changes with a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The peer has not been registered with this engine.
    #[error("Unknown peer: {0}")]
    UnknownPeer(ReplicaId),

    /// A replica cannot be its own peer.
    #[error("Replica {0} cannot sync with itself")]
    SelfPeer(ReplicaId),

    /// A protocol step was attempted out of order.
    #[error("Invalid protocol transition for peer {peer}: {from} -> {to}")]
    InvalidTransition {
        peer: ReplicaId,
        from: ProtocolState,
        to: ProtocolState,
    },

    /// A batch was aborted on purpose after applying some of its changes.
    /// Only raised by the fault hook used in tests.
    #[error("Injected fault after {applied} changes")]
    InjectedFault { applied: usize },
}

impl SyncError {
    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::UnknownPeer(_))
    }

    /// Check if this is a protocol ordering error.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidTransition { .. } | SyncError::SelfPeer(_)
        )
    }
}

impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
