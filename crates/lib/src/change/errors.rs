//! Error types for change encoding and decoding.

use thiserror::Error;

use super::ChangeKind;

/// Errors raised while encoding or decoding changes.
///
/// Framing-level failures (`Serialization`, `ProtocolMismatch`) abort a whole
/// incoming batch. Payload-level failures concern a single change and are
/// reported as a per-change rejection during sync.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ChangeError {
    /// The byte stream could not be parsed as a change or batch.
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    /// A batch was produced by an incompatible protocol version.
    #[error("Protocol version mismatch: expected {expected}, received {received}")]
    ProtocolMismatch { expected: u32, received: u32 },

    /// A change payload does not decode as its declared kind.
    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: ChangeKind, reason: String },

    /// A payload could not be encoded.
    #[error("Failed to encode {kind} payload: {reason}")]
    PayloadEncoding { kind: ChangeKind, reason: String },
}

impl ChangeError {
    /// Check if this error concerns framing and aborts a whole batch.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            ChangeError::Serialization { .. } | ChangeError::ProtocolMismatch { .. }
        )
    }

    /// Check if this error concerns a single change payload.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            ChangeError::MalformedPayload { .. } | ChangeError::PayloadEncoding { .. }
        )
    }
}

impl From<ChangeError> for crate::Error {
    fn from(err: ChangeError) -> Self {
        crate::Error::Change(err)
    }
}
