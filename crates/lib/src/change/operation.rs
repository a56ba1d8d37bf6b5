//! Kind-specific payloads carried inside a [`Change`](super::Change).
//!
//! Payloads are postcard-encoded. The kind is stored once on the change
//! itself, so each payload only holds the data that kind needs; a `Remove`
//! carries an empty payload.

use serde::{Deserialize, Serialize};

use super::{ChangeError, ChangeKind};
use crate::address::Address;
use crate::permission::PermissionRule;

/// Payload of an [`ChangeKind::Add`] change. The new element's address is
/// the change target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPayload {
    pub parent: Option<Address>,
    pub name: String,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetValuePayload {
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

/// Payload of a [`ChangeKind::Move`] change: the new parent, or `None` to
/// make the element a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub parent: Option<Address>,
}

/// A decoded change payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Add(AddPayload),
    Remove,
    Rename(RenamePayload),
    SetValue(SetValuePayload),
    Move(MovePayload),
    Grant(PermissionRule),
}

impl Operation {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Operation::Add(_) => ChangeKind::Add,
            Operation::Remove => ChangeKind::Remove,
            Operation::Rename(_) => ChangeKind::Rename,
            Operation::SetValue(_) => ChangeKind::SetValue,
            Operation::Move(_) => ChangeKind::Move,
            Operation::Grant(_) => ChangeKind::Grant,
        }
    }

    /// Encodes the payload bytes for this operation.
    pub fn encode(&self) -> Result<Vec<u8>, ChangeError> {
        let encoded = match self {
            Operation::Add(payload) => postcard::to_allocvec(payload),
            Operation::Remove => return Ok(Vec::new()),
            Operation::Rename(payload) => postcard::to_allocvec(payload),
            Operation::SetValue(payload) => postcard::to_allocvec(payload),
            Operation::Move(payload) => postcard::to_allocvec(payload),
            Operation::Grant(rule) => postcard::to_allocvec(rule),
        };
        encoded.map_err(|e| ChangeError::PayloadEncoding {
            kind: self.kind(),
            reason: e.to_string(),
        })
    }

    /// Decodes a payload for the given kind. Trailing bytes are rejected.
    pub fn decode(kind: ChangeKind, payload: &[u8]) -> Result<Self, ChangeError> {
        let malformed = |reason: String| ChangeError::MalformedPayload { kind, reason };
        Ok(match kind {
            ChangeKind::Add => Operation::Add(decode_exact(payload).map_err(malformed)?),
            ChangeKind::Remove => {
                if !payload.is_empty() {
                    return Err(malformed(format!(
                        "expected empty payload, found {} bytes",
                        payload.len()
                    )));
                }
                Operation::Remove
            }
            ChangeKind::Rename => Operation::Rename(decode_exact(payload).map_err(malformed)?),
            ChangeKind::SetValue => {
                Operation::SetValue(decode_exact(payload).map_err(malformed)?)
            }
            ChangeKind::Move => Operation::Move(decode_exact(payload).map_err(malformed)?),
            ChangeKind::Grant => Operation::Grant(decode_exact(payload).map_err(malformed)?),
        })
    }
}

fn decode_exact<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, String> {
    let (value, rest) = postcard::take_from_bytes::<T>(bytes).map_err(|e| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes", rest.len()));
    }
    Ok(value)
}
