//! Identifiers for replicas and the changes they author.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Identifies a replica. Zero is reserved so that address tags derived from
/// the id never end in a zero byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(NonZeroU64);

impl ReplicaId {
    /// Returns `None` for the reserved id `0`.
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    /// Generates a random replica id.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// LEB128 encoding of the id.
    ///
    /// The encoding is prefix-free and its final byte is non-zero for any
    /// non-zero id.
    pub fn tag(&self) -> Vec<u8> {
        let mut value = self.0.get();
        let mut out = Vec::with_capacity(10);
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicaId({:x})", self.0.get())
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0.get())
    }
}

/// Globally unique identity of a change: its origin replica and the
/// origin-local sequence number.
///
/// The derived ordering (origin first, then sequence) is the deterministic
/// total order used for polling, merging and conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId {
    pub origin: ReplicaId,
    pub sequence: u64,
}

impl ChangeId {
    pub fn new(origin: ReplicaId, sequence: u64) -> Self {
        Self { origin, sequence }
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.sequence)
    }
}
