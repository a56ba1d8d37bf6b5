//! Wire encoding of changes and change batches.
//!
//! Changes are encoded with postcard, which gives exactly the compact form
//! peers exchange: the origin id and sequence as varints, the kind as a
//! varint discriminant, and the address, payload and role as length-prefixed
//! byte strings.
//!
//! A batch is a protocol version followed by a length-prefixed sequence of
//! changes. The transport that moves these bytes is supplied by the caller.

use serde::{Deserialize, Serialize};

use super::{Change, ChangeError};

/// Version written at the head of every batch.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Serialize)]
struct BatchRef<'a> {
    version: u32,
    changes: &'a [Change],
}

#[derive(Deserialize)]
struct Batch {
    version: u32,
    changes: Vec<Change>,
}

fn serialization(err: postcard::Error) -> ChangeError {
    ChangeError::Serialization {
        reason: err.to_string(),
    }
}

/// Encodes a single change.
pub fn encode_change(change: &Change) -> Result<Vec<u8>, ChangeError> {
    postcard::to_allocvec(change).map_err(serialization)
}

/// Decodes a single change. The input must contain exactly one change.
pub fn decode_change(bytes: &[u8]) -> Result<Change, ChangeError> {
    let (change, rest) = postcard::take_from_bytes::<Change>(bytes).map_err(serialization)?;
    if !rest.is_empty() {
        return Err(ChangeError::Serialization {
            reason: format!("{} trailing bytes after change", rest.len()),
        });
    }
    Ok(change)
}

/// Encodes a batch of changes for transmission.
pub fn encode_batch(changes: &[Change]) -> Result<Vec<u8>, ChangeError> {
    postcard::to_allocvec(&BatchRef {
        version: PROTOCOL_VERSION,
        changes,
    })
    .map_err(serialization)
}

/// Decodes a batch produced by [`encode_batch`].
///
/// Any framing problem fails the whole batch; no partial result is returned.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Change>, ChangeError> {
    let (batch, rest) = postcard::take_from_bytes::<Batch>(bytes).map_err(serialization)?;
    if batch.version != PROTOCOL_VERSION {
        return Err(ChangeError::ProtocolMismatch {
            expected: PROTOCOL_VERSION,
            received: batch.version,
        });
    }
    if !rest.is_empty() {
        return Err(ChangeError::Serialization {
            reason: format!("{} trailing bytes after batch", rest.len()),
        });
    }
    Ok(batch.changes)
}
