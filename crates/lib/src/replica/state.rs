//! The state a replica holds and the rules for changing it.
//!
//! Local mutations and remote changes go through the same
//! [`ReplicaState::evaluate`] path: decode, authorize, then execute. Nothing
//! is modified unless the change is accepted.
//!
//! Removed elements are never dropped. They move, together with everything
//! below them, from the ordered index into a hidden set, so a change that
//! arrives late still finds its target and every arrival order ends in the
//! same state.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;

use super::errors::ReplicaError;
use crate::address::{self, Address, AddressOrderError};
use crate::change::{Change, ChangeKind, Operation, ReplicaId};
use crate::element::Element;
use crate::index::OrderedIndex;
use crate::log::{ChangeLog, Frontier};
use crate::observer::ReplicaEvent;
use crate::permission::{PermissionTable, Scope};
use crate::sync::RejectionReason;

/// Result of evaluating one change against the state.
#[derive(Debug)]
pub(crate) enum Outcome {
    Applied(Vec<ReplicaEvent>),
    Superseded,
    Rejected(RejectionReason),
}

/// A permission the author of a change must hold.
struct Requirement {
    kind: ChangeKind,
    owner: ReplicaId,
    scopes: Vec<Scope>,
}

/// Everything a replica knows: the visible elements in order, the hidden
/// ones, the change log and the permission rules.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    pub(crate) index: OrderedIndex<Element>,
    hidden: BTreeMap<Address, Element>,
    pub(crate) log: ChangeLog,
    pub(crate) permissions: PermissionTable,
}

impl ReplicaState {
    pub fn new(local: ReplicaId) -> Self {
        Self {
            index: OrderedIndex::new(),
            hidden: BTreeMap::new(),
            log: ChangeLog::new(local),
            permissions: PermissionTable::new(),
        }
    }

    pub fn local(&self) -> ReplicaId {
        self.log.local()
    }

    /// Visible elements in address order.
    pub fn index(&self) -> &OrderedIndex<Element> {
        &self.index
    }

    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    pub fn frontier(&self) -> &Frontier {
        self.log.frontier()
    }

    /// A visible element.
    pub fn get(&self, address: &Address) -> Option<&Element> {
        self.index.get(address)
    }

    /// Whether any element, visible or hidden, lives at `address`.
    pub fn knows(&self, address: &Address) -> bool {
        self.index.contains(address) || self.hidden.contains_key(address)
    }

    /// Elements that were removed or sit below a removed element.
    pub fn hidden(&self) -> impl Iterator<Item = &Element> {
        self.hidden.values()
    }

    /// Children of `parent` (or the roots, for `None`) in address order.
    ///
    /// Derived from the index on every call.
    pub fn children(&self, parent: Option<&Address>) -> Vec<&Element> {
        self.index
            .iter()
            .filter(|element| element.parent() == parent)
            .collect()
    }

    /// `address` and everything visible below it, parents before children.
    pub fn subtree(&self, address: &Address) -> Vec<Address> {
        if !self.index.contains(address) {
            return Vec::new();
        }
        self.descendants(address, self.index.iter())
    }

    /// Whether `ancestor` lies on the parent chain of `address`. Hidden
    /// elements count.
    pub fn is_ancestor(&self, ancestor: &Address, address: &Address) -> bool {
        let mut cursor = self.lookup(address).and_then(Element::parent);
        // Bounded by the element count in case of a malformed chain.
        for _ in 0..=self.known_len() {
            match cursor {
                None => return false,
                Some(current) if current == ancestor => return true,
                Some(current) => cursor = self.lookup(current).and_then(Element::parent),
            }
        }
        false
    }

    /// A fresh local address right after `key`, clear of every known
    /// element.
    pub(crate) fn address_after(&self, key: &Address) -> Result<Address, AddressOrderError> {
        let visible = self.index.after(key).map(Element::address);
        let hidden = self
            .hidden
            .range::<Address, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(address, _)| address);
        let next = [visible, hidden].into_iter().flatten().min();
        address::allocate(Some(key), next, self.local())
    }

    /// A fresh local address right before `key`, clear of every known
    /// element.
    pub(crate) fn address_before(&self, key: &Address) -> Result<Address, AddressOrderError> {
        let visible = self.index.before(key).map(Element::address);
        let hidden = self
            .hidden
            .range::<Address, _>(..key)
            .next_back()
            .map(|(address, _)| address);
        let previous = [visible, hidden].into_iter().flatten().max();
        address::allocate(previous, Some(key), self.local())
    }

    /// A fresh local address after every known element.
    pub(crate) fn address_at_end(&self) -> Result<Address, AddressOrderError> {
        let visible = self.index.last().map(Element::address);
        let hidden = self.hidden.keys().next_back();
        let last = [visible, hidden].into_iter().flatten().max();
        address::allocate(last, None, self.local())
    }

    /// Local mutations may only refer to elements that are visible.
    pub(crate) fn check_visible(
        &self,
        target: &Address,
        operation: &Operation,
    ) -> Result<(), ReplicaError> {
        let referenced: Vec<&Address> = match operation {
            Operation::Add(payload) => payload.parent.iter().collect(),
            Operation::Remove | Operation::Rename(_) | Operation::SetValue(_) => vec![target],
            Operation::Move(payload) => std::iter::once(target)
                .chain(payload.parent.as_ref())
                .collect(),
            Operation::Grant(rule) => match &rule.scope {
                Scope::Element(address) => vec![address],
                Scope::Origin(_) => Vec::new(),
            },
        };
        match referenced.into_iter().find(|a| !self.index.contains(a)) {
            Some(missing) => Err(ReplicaError::ElementNotFound {
                address: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Decodes, authorizes and executes `change`.
    pub(crate) fn evaluate(&mut self, change: &Change, enforce_permissions: bool) -> Outcome {
        let operation = match change.operation() {
            Ok(operation) => operation,
            Err(err) => {
                return Outcome::Rejected(RejectionReason::MalformedPayload {
                    reason: err.to_string(),
                });
            }
        };
        if enforce_permissions && let Err(reason) = self.authorize(change, &operation) {
            return Outcome::Rejected(reason);
        }
        self.execute(change, operation)
    }

    fn lookup(&self, address: &Address) -> Option<&Element> {
        self.index
            .get(address)
            .or_else(|| self.hidden.get(address))
    }

    fn lookup_mut(&mut self, address: &Address) -> Option<&mut Element> {
        if self.index.contains(address) {
            self.index.get_mut(address)
        } else {
            self.hidden.get_mut(address)
        }
    }

    fn known_len(&self) -> usize {
        self.index.len() + self.hidden.len()
    }

    /// `root` and everything below it among `elements`, parents first. Each
    /// address appears once.
    fn descendants<'a>(
        &'a self,
        root: &Address,
        elements: impl Iterator<Item = &'a Element>,
    ) -> Vec<Address> {
        let mut by_parent: HashMap<&Address, Vec<&Address>> = HashMap::new();
        for element in elements {
            if let Some(parent) = element.parent() {
                by_parent.entry(parent).or_default().push(element.address());
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next.clone());
            if let Some(children) = by_parent.get(next) {
                queue.extend(children.iter().copied());
            }
        }
        out
    }

    /// Moves every element below and including `root` between the index and
    /// the hidden set as its parent chain now dictates.
    ///
    /// Returns `Removed` events deepest first, then `Added` events parents
    /// first, each with the rank it has at that point.
    fn refresh_visibility(&mut self, root: &Address) -> Vec<ReplicaEvent> {
        let order = self.descendants(root, self.index.iter().chain(self.hidden.values()));

        let mut visible: HashMap<&Address, bool> = HashMap::new();
        let mut leaving = Vec::new();
        let mut arriving = Vec::new();
        for address in &order {
            let Some(element) = self.lookup(address) else {
                continue;
            };
            let parent_visible = match element.parent() {
                None => true,
                Some(parent) => visible
                    .get(parent)
                    .copied()
                    .unwrap_or_else(|| self.index.contains(parent)),
            };
            let now = parent_visible && !element.is_removed();
            visible.insert(address, now);
            match (self.index.contains(address), now) {
                (true, false) => leaving.push(address.clone()),
                (false, true) => arriving.push(address.clone()),
                _ => {}
            }
        }

        let mut events = Vec::new();
        for address in leaving.into_iter().rev() {
            if let Some(element) = self.index.remove(&address) {
                self.hidden.insert(address.clone(), element);
                events.push(ReplicaEvent::Removed { address });
            }
        }
        for address in arriving {
            if let Some(element) = self.hidden.remove(&address) {
                let parent = element.parent().cloned();
                self.index.insert(element);
                let rank = self.index.rank_of(&address).unwrap_or_default();
                events.push(ReplicaEvent::Added {
                    address,
                    parent,
                    rank,
                });
            }
        }
        events
    }

    fn requirement(
        &self,
        kind: ChangeKind,
        address: &Address,
    ) -> Result<Requirement, RejectionReason> {
        let element = self
            .lookup(address)
            .ok_or_else(|| RejectionReason::UnknownTarget {
                address: address.clone(),
            })?;
        Ok(Requirement {
            kind,
            owner: element.origin(),
            scopes: vec![
                Scope::Element(address.clone()),
                Scope::Origin(element.origin()),
            ],
        })
    }

    /// Checks that the author of `change` may perform `operation`.
    ///
    /// A replica may always act on elements it created; anything else needs
    /// an allowing rule.
    fn authorize(&self, change: &Change, operation: &Operation) -> Result<(), RejectionReason> {
        let requirements = match operation {
            // A new root belongs to its author.
            Operation::Add(payload) => match &payload.parent {
                None => Vec::new(),
                Some(parent) => vec![self.requirement(ChangeKind::Add, parent)?],
            },
            Operation::Remove | Operation::Rename(_) | Operation::SetValue(_) => {
                vec![self.requirement(change.kind, &change.target)?]
            }
            Operation::Move(payload) => {
                let mut requirements = vec![self.requirement(ChangeKind::Move, &change.target)?];
                if let Some(parent) = &payload.parent {
                    requirements.push(self.requirement(ChangeKind::Add, parent)?);
                }
                requirements
            }
            Operation::Grant(rule) => match &rule.scope {
                Scope::Origin(owner) => vec![Requirement {
                    kind: ChangeKind::Grant,
                    owner: *owner,
                    scopes: vec![Scope::Origin(*owner)],
                }],
                Scope::Element(address) => vec![self.requirement(ChangeKind::Grant, address)?],
            },
        };

        for requirement in requirements {
            if requirement.owner == change.origin {
                continue;
            }
            let decision =
                self.permissions
                    .check(&change.role, requirement.kind, &requirement.scopes);
            if !decision.is_allowed() {
                return Err(RejectionReason::PermissionDenied {
                    role: change.role.clone(),
                    kind: requirement.kind,
                });
            }
        }
        Ok(())
    }

    fn execute(&mut self, change: &Change, operation: Operation) -> Outcome {
        let id = change.id();
        let target = &change.target;
        let unknown = |address: &Address| {
            Outcome::Rejected(RejectionReason::UnknownTarget {
                address: address.clone(),
            })
        };

        match operation {
            Operation::Add(payload) => {
                if target.is_empty() {
                    return Outcome::Rejected(RejectionReason::InvalidAddress {
                        address: target.clone(),
                    });
                }
                if self.knows(target) {
                    return Outcome::Rejected(RejectionReason::AddressCollision {
                        address: target.clone(),
                    });
                }
                let visible = match &payload.parent {
                    None => true,
                    Some(parent) if self.index.contains(parent) => true,
                    Some(parent) if self.hidden.contains_key(parent) => false,
                    Some(parent) => return unknown(parent),
                };
                let element = Element::new(
                    target.clone(),
                    change.origin,
                    payload.parent.clone(),
                    payload.name,
                    payload.value,
                );
                if !visible {
                    self.hidden.insert(target.clone(), element);
                    return Outcome::Applied(Vec::new());
                }
                self.index.insert(element);
                let rank = self.index.rank_of(target).unwrap_or_default();
                Outcome::Applied(vec![ReplicaEvent::Added {
                    address: target.clone(),
                    parent: payload.parent,
                    rank,
                }])
            }
            Operation::Remove => {
                let Some(element) = self.lookup_mut(target) else {
                    return unknown(target);
                };
                if !element.tombstone(id) {
                    return Outcome::Applied(Vec::new());
                }
                Outcome::Applied(self.refresh_visibility(target))
            }
            Operation::Rename(payload) => {
                let Some(element) = self.lookup_mut(target) else {
                    return unknown(target);
                };
                if !element.rename(payload.name.clone(), id) {
                    return Outcome::Superseded;
                }
                if !self.index.contains(target) {
                    return Outcome::Applied(Vec::new());
                }
                Outcome::Applied(vec![ReplicaEvent::Renamed {
                    address: target.clone(),
                    name: payload.name,
                }])
            }
            Operation::SetValue(payload) => {
                let Some(element) = self.lookup_mut(target) else {
                    return unknown(target);
                };
                if !element.set_value(payload.value.clone(), id) {
                    return Outcome::Superseded;
                }
                if !self.index.contains(target) {
                    return Outcome::Applied(Vec::new());
                }
                Outcome::Applied(vec![ReplicaEvent::ValueSet {
                    address: target.clone(),
                    value: payload.value,
                }])
            }
            Operation::Move(payload) => {
                if !self.knows(target) {
                    return unknown(target);
                }
                if let Some(parent) = &payload.parent {
                    if !self.knows(parent) {
                        return unknown(parent);
                    }
                    if parent == target || self.is_ancestor(target, parent) {
                        return Outcome::Rejected(RejectionReason::InvalidMove {
                            address: target.clone(),
                            reason: format!("{parent} is inside the moved subtree"),
                        });
                    }
                }
                let was_visible = self.index.contains(target);
                let Some(element) = self.lookup_mut(target) else {
                    return unknown(target);
                };
                if !element.set_parent(payload.parent.clone(), id) {
                    return Outcome::Superseded;
                }
                let events = self.refresh_visibility(target);
                if events.is_empty() && was_visible {
                    return Outcome::Applied(vec![ReplicaEvent::Moved {
                        address: target.clone(),
                        parent: payload.parent,
                    }]);
                }
                Outcome::Applied(events)
            }
            Operation::Grant(rule) => {
                self.permissions.add(rule.clone(), id);
                Outcome::Applied(vec![ReplicaEvent::PermissionsChanged { rule }])
            }
        }
    }
}
