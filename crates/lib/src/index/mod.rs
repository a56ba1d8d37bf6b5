//! Ordered, counted index keyed by [`Address`].
//!
//! [`OrderedIndex`] is a red-black tree whose nodes cache their subtree size,
//! giving O(log n) insert, remove, rank and positional lookup. The tree sits
//! behind an `Arc`: [`OrderedIndex::snapshot`] hands out a cheap immutable
//! view, and the next mutation copies the tree instead of disturbing the
//! view (copy-on-write).

mod tree;

use std::sync::Arc;

use thiserror::Error;

use crate::address::Address;

pub use tree::Iter;
use tree::Tree;

/// Values stored in an [`OrderedIndex`] expose the address they are ordered by.
///
/// The key of a stored value must never change while it is in the index.
pub trait Keyed {
    fn key(&self) -> &Address;
}

/// Errors raised by the index.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The tree's balance or size bookkeeping is broken. This is a
    /// programming defect, never an expected runtime condition.
    #[error("Tree invariant violated: {reason}")]
    TreeInvariantViolation { reason: String },
}

impl From<IndexError> for crate::Error {
    fn from(err: IndexError) -> Self {
        crate::Error::Index(err)
    }
}

/// A self-balancing ordered index with rank queries.
#[derive(Debug, Clone)]
pub struct OrderedIndex<V> {
    tree: Arc<Tree<V>>,
}

impl<V> Default for OrderedIndex<V> {
    fn default() -> Self {
        Self {
            tree: Arc::new(Tree::default()),
        }
    }
}

impl<V: Keyed + Clone> OrderedIndex<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree_mut(&mut self) -> &mut Tree<V> {
        Arc::make_mut(&mut self.tree)
    }

    /// Inserts a value under its key, returning the value it replaced.
    pub fn insert(&mut self, value: V) -> Option<V> {
        self.tree_mut().insert(value)
    }

    pub fn remove(&mut self, key: &Address) -> Option<V> {
        self.tree_mut().remove(key)
    }

    /// Mutable access to a stored value. The caller must not change its key.
    pub fn get_mut(&mut self, key: &Address) -> Option<&mut V> {
        // Avoid copying a shared tree when the key is absent.
        self.tree.get(key)?;
        self.tree_mut().get_mut(key)
    }

    /// Returns an immutable point-in-time view of the index.
    pub fn snapshot(&self) -> Snapshot<V> {
        Snapshot {
            tree: Arc::clone(&self.tree),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }

    pub fn contains(&self, key: &Address) -> bool {
        self.tree.get(key).is_some()
    }

    pub fn get(&self, key: &Address) -> Option<&V> {
        self.tree.get(key)
    }

    /// Value at zero-based ascending position `rank`.
    pub fn get_at(&self, rank: usize) -> Option<&V> {
        self.tree.get_at(rank)
    }

    /// Zero-based ascending position of `key`.
    pub fn rank_of(&self, key: &Address) -> Option<usize> {
        self.tree.rank_of(key)
    }

    /// Closest value strictly before `key`; `key` need not be present.
    pub fn before(&self, key: &Address) -> Option<&V> {
        self.tree.before(key)
    }

    /// Closest value strictly after `key`; `key` need not be present.
    pub fn after(&self, key: &Address) -> Option<&V> {
        self.tree.after(key)
    }

    pub fn first(&self) -> Option<&V> {
        self.tree.first()
    }

    pub fn last(&self) -> Option<&V> {
        self.tree.last()
    }

    pub fn iter(&self) -> Iter<'_, V> {
        self.tree.iter()
    }

    /// Verifies red-black balance, black height, cached sizes and key order.
    pub fn validate(&self) -> Result<(), IndexError> {
        self.tree.validate()
    }
}

/// A point-in-time view of an [`OrderedIndex`].
///
/// Later mutations of the index never show up here. Iteration is lazy and can
/// be restarted any number of times.
#[derive(Debug)]
pub struct Snapshot<V> {
    tree: Arc<Tree<V>>,
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
        }
    }
}

impl<V: Keyed> Snapshot<V> {
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }

    pub fn get(&self, key: &Address) -> Option<&V> {
        self.tree.get(key)
    }

    pub fn get_at(&self, rank: usize) -> Option<&V> {
        self.tree.get_at(rank)
    }

    pub fn rank_of(&self, key: &Address) -> Option<usize> {
        self.tree.rank_of(key)
    }

    pub fn iter(&self) -> Iter<'_, V> {
        self.tree.iter()
    }
}

impl<'a, V: Keyed> IntoIterator for &'a Snapshot<V> {
    type Item = &'a V;
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
