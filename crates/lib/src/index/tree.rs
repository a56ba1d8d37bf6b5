//! Arena-backed red-black tree with subtree sizes.
//!
//! Nodes live in a dense `Vec` and refer to each other by position. Parent
//! links let every fix-up run iteratively. Removing a node moves the last
//! arena slot into the hole so the arena stays dense.

use std::cmp::Ordering;

use super::{IndexError, Keyed};
use crate::address::Address;

type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct Node<V> {
    value: V,
    color: Color,
    /// Number of nodes in the subtree rooted here, including this one.
    size: usize,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Tree<V> {
    nodes: Vec<Node<V>>,
    root: Option<NodeId>,
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }
}

impl<V: Keyed> Tree<V> {
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    fn key(&self, id: NodeId) -> &Address {
        self.nodes[id].value.key()
    }

    fn size(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |i| self.nodes[i].size)
    }

    fn color(&self, id: Option<NodeId>) -> Color {
        id.map_or(Color::Black, |i| self.nodes[i].color)
    }

    fn set_color(&mut self, id: Option<NodeId>, color: Color) {
        if let Some(i) = id {
            self.nodes[i].color = color;
        }
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    fn left(&self, id: Option<NodeId>) -> Option<NodeId> {
        id.and_then(|i| self.nodes[i].left)
    }

    fn right(&self, id: Option<NodeId>) -> Option<NodeId> {
        id.and_then(|i| self.nodes[i].right)
    }

    fn refresh_size(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        let size = 1 + self.size(node.left) + self.size(node.right);
        self.nodes[id].size = size;
    }

    fn find(&self, key: &Address) -> Option<NodeId> {
        let mut cursor = self.root;
        while let Some(id) = cursor {
            cursor = match key.cmp(self.key(id)) {
                Ordering::Less => self.nodes[id].left,
                Ordering::Greater => self.nodes[id].right,
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    fn minimum(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.nodes[id].left {
            id = left;
        }
        id
    }

    fn maximum(&self, mut id: NodeId) -> NodeId {
        while let Some(right) = self.nodes[id].right {
            id = right;
        }
        id
    }

    fn next_node(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.nodes[id].right {
            return Some(self.minimum(right));
        }
        let mut child = id;
        let mut parent = self.parent(id);
        while let Some(p) = parent {
            if self.nodes[p].left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    /// Points `parent`'s link that referred to `old` at `new` instead.
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) if self.nodes[p].left == Some(old) => self.nodes[p].left = new,
            Some(p) => self.nodes[p].right = new,
        }
    }

    fn rotate_left(&mut self, x: NodeId) {
        let Some(y) = self.nodes[x].right else {
            return;
        };
        let inner = self.nodes[y].left;
        self.nodes[x].right = inner;
        if let Some(b) = inner {
            self.nodes[b].parent = Some(x);
        }
        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        self.replace_child(parent, x, Some(y));
        self.nodes[y].left = Some(x);
        self.nodes[x].parent = Some(y);
        self.refresh_size(x);
        self.refresh_size(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let Some(y) = self.nodes[x].left else {
            return;
        };
        let inner = self.nodes[y].right;
        self.nodes[x].left = inner;
        if let Some(b) = inner {
            self.nodes[b].parent = Some(x);
        }
        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        self.replace_child(parent, x, Some(y));
        self.nodes[y].right = Some(x);
        self.nodes[x].parent = Some(y);
        self.refresh_size(x);
        self.refresh_size(y);
    }

    /// Inserts `value`, replacing and returning any value with the same key.
    pub(crate) fn insert(&mut self, value: V) -> Option<V> {
        let mut parent = None;
        let mut went_left = false;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            parent = Some(id);
            match value.key().cmp(self.key(id)) {
                Ordering::Less => {
                    went_left = true;
                    cursor = self.nodes[id].left;
                }
                Ordering::Greater => {
                    went_left = false;
                    cursor = self.nodes[id].right;
                }
                Ordering::Equal => {
                    return Some(std::mem::replace(&mut self.nodes[id].value, value));
                }
            }
        }

        let id = self.nodes.len();
        self.nodes.push(Node {
            value,
            color: Color::Red,
            size: 1,
            parent,
            left: None,
            right: None,
        });
        match parent {
            None => self.root = Some(id),
            Some(p) if went_left => self.nodes[p].left = Some(id),
            Some(p) => self.nodes[p].right = Some(id),
        }

        let mut ancestor = parent;
        while let Some(a) = ancestor {
            self.nodes[a].size += 1;
            ancestor = self.parent(a);
        }

        self.insert_fixup(id);
        None
    }

    fn insert_fixup(&mut self, mut z: NodeId) {
        while let Some(p) = self.parent(z)
            && self.nodes[p].color == Color::Red
        {
            // A red node is never the root, so the grandparent exists.
            let Some(g) = self.parent(p) else {
                break;
            };
            if self.nodes[g].left == Some(p) {
                let uncle = self.nodes[g].right;
                if self.color(uncle) == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.set_color(uncle, Color::Black);
                    self.nodes[g].color = Color::Red;
                    z = g;
                    continue;
                }
                if self.nodes[p].right == Some(z) {
                    z = p;
                    self.rotate_left(z);
                }
                let Some(p) = self.parent(z) else {
                    break;
                };
                let Some(g) = self.parent(p) else {
                    break;
                };
                self.nodes[p].color = Color::Black;
                self.nodes[g].color = Color::Red;
                self.rotate_right(g);
            } else {
                let uncle = self.nodes[g].left;
                if self.color(uncle) == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.set_color(uncle, Color::Black);
                    self.nodes[g].color = Color::Red;
                    z = g;
                    continue;
                }
                if self.nodes[p].left == Some(z) {
                    z = p;
                    self.rotate_right(z);
                }
                let Some(p) = self.parent(z) else {
                    break;
                };
                let Some(g) = self.parent(p) else {
                    break;
                };
                self.nodes[p].color = Color::Black;
                self.nodes[g].color = Color::Red;
                self.rotate_left(g);
            }
        }
        self.set_color(self.root, Color::Black);
    }

    /// Replaces the subtree rooted at `old` with the one rooted at `new`.
    fn transplant(&mut self, old: NodeId, new: Option<NodeId>) {
        let parent = self.nodes[old].parent;
        self.replace_child(parent, old, new);
        if let Some(n) = new {
            self.nodes[n].parent = parent;
        }
    }

    /// Removes the value stored under `key`.
    pub(crate) fn remove(&mut self, key: &Address) -> Option<V> {
        let z = self.find(key)?;

        let mut removed_color = self.nodes[z].color;
        let x;
        let x_parent;
        match (self.nodes[z].left, self.nodes[z].right) {
            (None, right) => {
                x = right;
                x_parent = self.nodes[z].parent;
                self.transplant(z, right);
            }
            (left, None) => {
                x = left;
                x_parent = self.nodes[z].parent;
                self.transplant(z, left);
            }
            (Some(left), Some(right)) => {
                let y = self.minimum(right);
                removed_color = self.nodes[y].color;
                x = self.nodes[y].right;
                if self.nodes[y].parent == Some(z) {
                    x_parent = Some(y);
                } else {
                    x_parent = self.nodes[y].parent;
                    self.transplant(y, x);
                    self.nodes[y].right = Some(right);
                    self.nodes[right].parent = Some(y);
                }
                self.transplant(z, Some(y));
                self.nodes[y].left = Some(left);
                self.nodes[left].parent = Some(y);
                self.nodes[y].color = self.nodes[z].color;
            }
        }

        // Every subtree that lost a node lies on the path from x_parent up.
        let mut ancestor = x_parent;
        while let Some(a) = ancestor {
            self.refresh_size(a);
            ancestor = self.parent(a);
        }

        if removed_color == Color::Black {
            self.remove_fixup(x, x_parent);
        }

        Some(self.release(z))
    }

    fn remove_fixup(&mut self, mut x: Option<NodeId>, mut parent: Option<NodeId>) {
        while x != self.root && self.color(x) == Color::Black {
            let Some(p) = parent else {
                break;
            };
            if self.nodes[p].left == x {
                let mut w = self.nodes[p].right;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.nodes[p].color = Color::Red;
                    self.rotate_left(p);
                    w = self.nodes[p].right;
                }
                if self.color(self.left(w)) == Color::Black
                    && self.color(self.right(w)) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.color(self.right(w)) == Color::Black {
                        self.set_color(self.left(w), Color::Black);
                        self.set_color(w, Color::Red);
                        if let Some(w) = w {
                            self.rotate_right(w);
                        }
                        w = self.nodes[p].right;
                    }
                    let parent_color = self.nodes[p].color;
                    self.set_color(w, parent_color);
                    self.nodes[p].color = Color::Black;
                    self.set_color(self.right(w), Color::Black);
                    self.rotate_left(p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut w = self.nodes[p].left;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.nodes[p].color = Color::Red;
                    self.rotate_right(p);
                    w = self.nodes[p].left;
                }
                if self.color(self.right(w)) == Color::Black
                    && self.color(self.left(w)) == Color::Black
                {
                    self.set_color(w, Color::Red);
                    x = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.color(self.left(w)) == Color::Black {
                        self.set_color(self.right(w), Color::Black);
                        self.set_color(w, Color::Red);
                        if let Some(w) = w {
                            self.rotate_left(w);
                        }
                        w = self.nodes[p].left;
                    }
                    let parent_color = self.nodes[p].color;
                    self.set_color(w, parent_color);
                    self.nodes[p].color = Color::Black;
                    self.set_color(self.left(w), Color::Black);
                    self.rotate_right(p);
                    x = self.root;
                    parent = None;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Drops a detached node from the arena, moving the last slot into its
    /// place and re-pointing that node's neighbours.
    fn release(&mut self, id: NodeId) -> V {
        let last = self.nodes.len() - 1;
        if id != last {
            let moved = &self.nodes[last];
            let (parent, left, right) = (moved.parent, moved.left, moved.right);
            match parent {
                None => self.root = Some(id),
                Some(p) if self.nodes[p].left == Some(last) => self.nodes[p].left = Some(id),
                Some(p) => self.nodes[p].right = Some(id),
            }
            for child in [left, right].into_iter().flatten() {
                self.nodes[child].parent = Some(id);
            }
        }
        self.nodes.swap_remove(id).value
    }

    pub(crate) fn get(&self, key: &Address) -> Option<&V> {
        self.find(key).map(|id| &self.nodes[id].value)
    }

    pub(crate) fn get_mut(&mut self, key: &Address) -> Option<&mut V> {
        self.find(key).map(|id| &mut self.nodes[id].value)
    }

    pub(crate) fn get_at(&self, mut rank: usize) -> Option<&V> {
        let mut cursor = self.root;
        while let Some(id) = cursor {
            let left_size = self.size(self.nodes[id].left);
            match rank.cmp(&left_size) {
                Ordering::Less => cursor = self.nodes[id].left,
                Ordering::Equal => return Some(&self.nodes[id].value),
                Ordering::Greater => {
                    rank -= left_size + 1;
                    cursor = self.nodes[id].right;
                }
            }
        }
        None
    }

    pub(crate) fn rank_of(&self, key: &Address) -> Option<usize> {
        let mut rank = 0;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            let left_size = self.size(self.nodes[id].left);
            match key.cmp(self.key(id)) {
                Ordering::Less => cursor = self.nodes[id].left,
                Ordering::Equal => return Some(rank + left_size),
                Ordering::Greater => {
                    rank += left_size + 1;
                    cursor = self.nodes[id].right;
                }
            }
        }
        None
    }

    /// Greatest value whose key is strictly below `key`.
    pub(crate) fn before(&self, key: &Address) -> Option<&V> {
        let mut best = None;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            if self.key(id) < key {
                best = Some(id);
                cursor = self.nodes[id].right;
            } else {
                cursor = self.nodes[id].left;
            }
        }
        best.map(|id| &self.nodes[id].value)
    }

    /// Least value whose key is strictly above `key`.
    pub(crate) fn after(&self, key: &Address) -> Option<&V> {
        let mut best = None;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            if self.key(id) > key {
                best = Some(id);
                cursor = self.nodes[id].left;
            } else {
                cursor = self.nodes[id].right;
            }
        }
        best.map(|id| &self.nodes[id].value)
    }

    pub(crate) fn first(&self) -> Option<&V> {
        self.root.map(|r| &self.nodes[self.minimum(r)].value)
    }

    pub(crate) fn last(&self) -> Option<&V> {
        self.root.map(|r| &self.nodes[self.maximum(r)].value)
    }

    pub(crate) fn iter(&self) -> Iter<'_, V> {
        Iter {
            tree: self,
            next: self.root.map(|r| self.minimum(r)),
            remaining: self.len(),
        }
    }

    /// Checks every structural invariant. Runs iteratively.
    pub(crate) fn validate(&self) -> Result<(), IndexError> {
        let violation = |reason: String| Err(IndexError::TreeInvariantViolation { reason });

        match self.root {
            None if !self.nodes.is_empty() => {
                return violation(format!("no root but {} nodes", self.nodes.len()));
            }
            None => return Ok(()),
            Some(root) => {
                if self.nodes[root].parent.is_some() {
                    return violation("root has a parent".into());
                }
                if self.nodes[root].color != Color::Black {
                    return violation("root is red".into());
                }
            }
        }

        let mut black_height = None;
        for (id, node) in self.nodes.iter().enumerate() {
            let expected = 1 + self.size(node.left) + self.size(node.right);
            if node.size != expected {
                return violation(format!(
                    "size of {} is {} but children imply {expected}",
                    node.value.key(),
                    node.size
                ));
            }
            for child in [node.left, node.right].into_iter().flatten() {
                if self.nodes[child].parent != Some(id) {
                    return violation(format!("broken parent link below {}", node.value.key()));
                }
                if node.color == Color::Red && self.nodes[child].color == Color::Red {
                    return violation(format!("red node {} has a red child", node.value.key()));
                }
            }

            // Every missing child ends a root-to-leaf path; all such paths
            // must carry the same number of black nodes.
            if node.left.is_none() || node.right.is_none() {
                let mut blacks = 0;
                let mut cursor = Some(id);
                while let Some(c) = cursor {
                    if self.nodes[c].color == Color::Black {
                        blacks += 1;
                    }
                    cursor = self.nodes[c].parent;
                }
                match black_height {
                    None => black_height = Some(blacks),
                    Some(h) if h != blacks => {
                        return violation(format!(
                            "black height {blacks} at {} differs from {h}",
                            node.value.key()
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        let mut count = 0;
        let mut previous: Option<&Address> = None;
        for value in self.iter() {
            if let Some(prev) = previous
                && prev >= value.key()
            {
                return violation(format!("keys out of order at {}", value.key()));
            }
            previous = Some(value.key());
            count += 1;
        }
        if count != self.nodes.len() {
            return violation(format!(
                "{count} nodes reachable but {} stored",
                self.nodes.len()
            ));
        }
        Ok(())
    }
}

/// Ascending in-order iterator.
pub struct Iter<'a, V> {
    tree: &'a Tree<V>,
    next: Option<NodeId>,
    remaining: usize,
}

impl<'a, V: Keyed> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.next_node(id);
        self.remaining = self.remaining.saturating_sub(1);
        Some(&self.tree.nodes[id].value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V: Keyed> ExactSizeIterator for Iter<'_, V> {}
