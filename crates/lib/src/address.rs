//! Order-preserving position identifiers.
//!
//! An [`Address`] is a byte string compared lexicographically, where a proper
//! prefix sorts before every extension of it. New addresses can always be
//! generated strictly between two existing ones, so inserting an element never
//! renumbers its neighbours.
//!
//! ```
//! use sprig::address::{Address, between};
//!
//! let first = between(None, None).unwrap();
//! let second = between(Some(&first), None).unwrap();
//! let middle = between(Some(&first), Some(&second)).unwrap();
//!
//! assert!(first < middle && middle < second);
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::change::ReplicaId;

/// Digit emitted by `between(None, None)`.
const CANONICAL_FIRST: u8 = 0x80;

/// Exclusive upper bound of a digit when the upper side is unbounded.
const OPEN_UPPER: u16 = 256;

/// A position identifier in the replicated ordering.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(#[serde(with = "serde_bytes")] Vec<u8>);

impl Address {
    /// Wraps raw bytes as an address.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors raised by [`between`] and [`allocate`].
///
/// These never leave any state behind; only the failing call is aborted.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressOrderError {
    /// The lower bound is not strictly below the upper bound.
    #[error("address bounds out of order: {before} is not below {after}")]
    NotOrdered { before: String, after: String },

    /// The bounds are ordered but no address fits between them
    /// (`after` is `before` followed only by zero bytes).
    #[error("no address exists between {before} and {after}")]
    NoGap { before: String, after: String },
}

impl AddressOrderError {
    fn not_ordered(before: &Address, after: &Address) -> Self {
        Self::NotOrdered {
            before: before.to_string(),
            after: after.to_string(),
        }
    }

    fn no_gap(before: Option<&Address>, after: Option<&Address>) -> Self {
        let show = |a: Option<&Address>| a.map(Address::to_string).unwrap_or_else(|| "-".into());
        Self::NoGap {
            before: show(before),
            after: show(after),
        }
    }
}

impl From<AddressOrderError> for crate::Error {
    fn from(err: AddressOrderError) -> Self {
        crate::Error::Address(err)
    }
}

/// Compares two addresses in replication order.
pub fn compare(a: &Address, b: &Address) -> Ordering {
    a.0.cmp(&b.0)
}

/// Returns the shortest address strictly between `before` and `after`.
///
/// `None` stands for the open end on that side. The result never ends in a
/// zero byte and is never a prefix of `after`, which keeps it subdividable
/// and allows suffixes to be appended without leaving the gap.
///
/// The walk pads `before` with zero digits. At the first digit where the gap
/// to `after` is at least two the midpoint is emitted; where it is exactly one
/// the lower digit is kept and the upper side becomes unbounded.
pub fn between(
    before: Option<&Address>,
    after: Option<&Address>,
) -> Result<Address, AddressOrderError> {
    if let (Some(b), Some(a)) = (before, after)
        && b >= a
    {
        return Err(AddressOrderError::not_ordered(b, a));
    }
    if before.is_none() && after.is_none() {
        return Ok(Address(vec![CANONICAL_FIRST]));
    }

    let lower = before.map(Address::as_bytes).unwrap_or_default();
    let upper = after.map(Address::as_bytes);
    let mut bounded = upper.is_some();
    let mut out = Vec::with_capacity(lower.len() + 1);

    for i in 0.. {
        let lo = lower.get(i).copied().map_or(0, u16::from);
        let hi = if bounded {
            match upper.and_then(|u| u.get(i)) {
                Some(&digit) => u16::from(digit),
                None => return Err(AddressOrderError::no_gap(before, after)),
            }
        } else {
            OPEN_UPPER
        };

        // Equal prefixes and the ordering check above guarantee lo <= hi.
        match hi - lo {
            0 => out.push(lo as u8),
            1 => {
                out.push(lo as u8);
                bounded = false;
            }
            _ => {
                out.push(((lo + hi) / 2) as u8);
                break;
            }
        }
    }

    Ok(Address(out))
}

/// Generates an address between two bounds, tagged with the allocating
/// replica so concurrent inserts into the same gap stay distinct.
pub fn allocate(
    before: Option<&Address>,
    after: Option<&Address>,
    replica: ReplicaId,
) -> Result<Address, AddressOrderError> {
    let mut address = between(before, after)?;
    address.0.extend_from_slice(&replica.tag());
    Ok(address)
}
