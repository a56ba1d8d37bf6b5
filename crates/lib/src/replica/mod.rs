//! A single replica of the replicated tree.
//!
//! [`Replica`] owns the current [`ReplicaState`] behind a writer-preferring
//! lock. Readers take a cheap `Arc` snapshot and never block writers for
//! longer than the clone of a pointer. Every local mutation is turned into a
//! [`Change`], checked against the permission table, applied, and appended
//! to the change log in one step; observers are notified once the write lock
//! has been released.

mod errors;
mod state;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;
use crate::address::Address;
use crate::change::{
    AddPayload, Change, ChangeId, ChangeKind, MovePayload, Operation, RenamePayload, ReplicaId,
    Role, SetValuePayload,
};
use crate::config::ReplicaConfig;
use crate::context::ReplicaContext;
use crate::element::Element;
use crate::index::Snapshot;
use crate::log::{EntryStatus, Frontier, Source};
use crate::observer::{Notification, ReplicaEvent, ReplicaObserver};
use crate::permission::{PermissionRule, RoleFilter, Scope};

pub use errors::ReplicaError;
pub(crate) use state::Outcome;
pub use state::ReplicaState;

/// One participant in replication.
#[derive(Debug)]
pub struct Replica {
    id: ReplicaId,
    context: Arc<ReplicaContext>,
    state: RwLock<Arc<ReplicaState>>,
}

impl Replica {
    /// Creates an empty replica, taking its id from the context's config.
    pub fn new(context: Arc<ReplicaContext>) -> Result<Self> {
        let id = context.config().resolve_replica_id()?;
        Ok(Self::with_id(id, context))
    }

    pub fn with_id(id: ReplicaId, context: Arc<ReplicaContext>) -> Self {
        tracing::debug!(replica = %id, "Created replica");
        Self {
            id,
            context,
            state: RwLock::new(Arc::new(ReplicaState::new(id))),
        }
    }

    /// Shorthand for a replica with its own context built from `config`.
    pub fn from_config(config: ReplicaConfig) -> Result<Self> {
        Self::new(Arc::new(ReplicaContext::new(config)))
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn context(&self) -> &Arc<ReplicaContext> {
        &self.context
    }

    pub fn config(&self) -> &ReplicaConfig {
        self.context.config()
    }

    /// Registers an observer for changes committed from now on.
    pub fn observe(&self, observer: Arc<dyn ReplicaObserver>) {
        self.context.observe(observer);
    }

    /// The committed state as of now. Later commits do not affect it.
    pub fn state(&self) -> Arc<ReplicaState> {
        Arc::clone(&self.state.read())
    }

    /// Ordered view of all elements as of now.
    pub fn snapshot(&self) -> Snapshot<Element> {
        self.state.read().index.snapshot()
    }

    pub fn frontier(&self) -> Frontier {
        self.state.read().frontier().clone()
    }

    pub fn get(&self, address: &Address) -> Option<Element> {
        self.state.read().get(address).cloned()
    }

    /// Children of `parent`, or the roots for `None`, in sibling order.
    pub fn children(&self, parent: Option<&Address>) -> Vec<Element> {
        let state = self.state();
        state.children(parent).into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at ascending position `rank` across the whole replica.
    pub fn element_at(&self, rank: usize) -> Option<Element> {
        self.state.read().index.get_at(rank).cloned()
    }

    pub fn rank_of(&self, address: &Address) -> Option<usize> {
        self.state.read().index.rank_of(address)
    }

    /// Creates a new root element after all existing elements.
    pub fn create_root(
        &self,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        role: &Role,
    ) -> Result<Address> {
        self.add_element(None, name.into(), value.into(), role)
    }

    /// Appends a child to `parent`, after its existing children.
    pub fn add_child(
        &self,
        parent: &Address,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        role: &Role,
    ) -> Result<Address> {
        self.add_element(Some(parent), name.into(), value.into(), role)
    }

    /// Inserts a child of `parent` directly after the sibling `anchor`, or
    /// as the first child when `anchor` is `None`. A `None` parent inserts a
    /// root.
    pub fn insert_child_after(
        &self,
        parent: Option<&Address>,
        anchor: Option<&Address>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        role: &Role,
    ) -> Result<Address> {
        let operation = add_operation(parent, name.into(), value.into());
        let change = self.submit_with(role, |state| {
            let address = match anchor {
                Some(anchor) => {
                    let sibling = state
                        .get(anchor)
                        .ok_or_else(|| ReplicaError::ElementNotFound {
                            address: anchor.clone(),
                        })?;
                    if sibling.parent() != parent {
                        return Err(ReplicaError::NotAChild {
                            anchor: anchor.clone(),
                            parent: parent.cloned(),
                        }
                        .into());
                    }
                    state.address_after(anchor)?
                }
                None => match state.children(parent).first() {
                    Some(first) => state.address_before(first.address())?,
                    None => first_child_address(state, parent)?,
                },
            };
            Ok((address, operation))
        })?;
        Ok(change.target)
    }

    pub fn rename(
        &self,
        address: &Address,
        name: impl Into<String>,
        role: &Role,
    ) -> Result<ChangeId> {
        let operation = Operation::Rename(RenamePayload { name: name.into() });
        Ok(self.submit(address.clone(), operation, role)?.id())
    }

    pub fn set_value(
        &self,
        address: &Address,
        value: impl Into<Vec<u8>>,
        role: &Role,
    ) -> Result<ChangeId> {
        let operation = Operation::SetValue(SetValuePayload {
            value: value.into(),
        });
        Ok(self.submit(address.clone(), operation, role)?.id())
    }

    /// Re-parents an element. Its address, and so its position among its
    /// new siblings, is unchanged.
    pub fn move_to(
        &self,
        address: &Address,
        parent: Option<&Address>,
        role: &Role,
    ) -> Result<ChangeId> {
        let operation = Operation::Move(MovePayload {
            parent: parent.cloned(),
        });
        Ok(self.submit(address.clone(), operation, role)?.id())
    }

    /// Removes an element together with its whole subtree.
    pub fn remove(&self, address: &Address, role: &Role) -> Result<ChangeId> {
        Ok(self.submit(address.clone(), Operation::Remove, role)?.id())
    }

    /// Allows `grantee` to perform `kind` on everything this replica created.
    ///
    /// The grant is logged as a change, so peers learn about it on the next
    /// sync.
    pub fn allow_for_all_local(
        &self,
        kind: ChangeKind,
        grantee: RoleFilter,
        role: &Role,
    ) -> Result<ChangeId> {
        let rule = PermissionRule::allow(grantee, kind, Scope::Origin(self.id));
        self.set_rule(rule, role)
    }

    /// Logs an arbitrary allow or deny rule.
    pub fn set_rule(&self, rule: PermissionRule, role: &Role) -> Result<ChangeId> {
        let target = match &rule.scope {
            Scope::Element(address) => address.clone(),
            Scope::Origin(_) => Address::default(),
        };
        Ok(self.submit(target, Operation::Grant(rule), role)?.id())
    }

    /// Runs `apply` against a private copy of the state and publishes the
    /// copy only if `apply` succeeds. On error the replica is left exactly
    /// as it was. Notifications returned by `apply` are delivered after the
    /// write lock is released.
    pub(crate) fn commit_batch<T>(
        &self,
        apply: impl FnOnce(&mut ReplicaState) -> Result<(T, Vec<Notification>)>,
    ) -> Result<T> {
        let (value, notifications) = {
            let mut guard = self.state.write();
            let mut working = ReplicaState::clone(&guard);
            let (value, notifications) = apply(&mut working)?;
            if self.config().validate_after_commit {
                working.index.validate()?;
            }
            *guard = Arc::new(working);
            (value, notifications)
        };
        self.context.notify(&notifications);
        Ok(value)
    }

    fn add_element(
        &self,
        parent: Option<&Address>,
        name: String,
        value: Vec<u8>,
        role: &Role,
    ) -> Result<Address> {
        let operation = add_operation(parent, name, value);
        let change = self.submit_with(role, |state| {
            let address = match state.children(parent).last() {
                Some(last) => state.address_after(last.address())?,
                None => first_child_address(state, parent)?,
            };
            Ok((address, operation))
        })?;
        Ok(change.target)
    }

    fn submit(&self, target: Address, operation: Operation, role: &Role) -> Result<Change> {
        self.submit_with(role, |_| Ok((target, operation)))
    }

    /// Authorizes, applies and logs one local operation.
    ///
    /// `build` picks the target under the write lock, so addresses it
    /// allocates cannot race with another local insert.
    fn submit_with(
        &self,
        role: &Role,
        build: impl FnOnce(&ReplicaState) -> Result<(Address, Operation)>,
    ) -> Result<Change> {
        let enforce = self.config().enforce_local_permissions;

        let (change, events) = {
            let mut guard = self.state.write();
            let (target, operation) = build(&guard)?;
            guard.check_visible(&target, &operation)?;
            let payload = operation.encode()?;
            let kind = operation.kind();

            let state = Arc::make_mut(&mut guard);
            let change = state.log.prepare_local(kind, target, payload, role.clone());
            let events = match state.evaluate(&change, enforce) {
                Outcome::Applied(events) => events,
                Outcome::Superseded => {
                    tracing::debug!(change = %change.id(), %kind, "Local change lost to a higher change id");
                    return Err(ReplicaError::Superseded {
                        address: change.target,
                        kind,
                    }
                    .into());
                }
                Outcome::Rejected(reason) => {
                    tracing::debug!(replica = %self.id, %kind, %reason, "Local change refused");
                    return Err(ReplicaError::from(reason).into());
                }
            };
            state.log.append_prepared(change.clone(), EntryStatus::Applied);
            (change, events)
        };

        tracing::debug!(change = %change.id(), kind = %change.kind, target = %change.target, "Committed local change");
        self.context
            .notify(&notifications(change.id(), Source::Local, events));
        Ok(change)
    }
}

fn add_operation(parent: Option<&Address>, name: String, value: Vec<u8>) -> Operation {
    Operation::Add(AddPayload {
        parent: parent.cloned(),
        name,
        value,
    })
}

/// Address for the only child of `parent`: right after the parent, or after
/// every known element for a new root.
fn first_child_address(state: &ReplicaState, parent: Option<&Address>) -> Result<Address> {
    match parent {
        Some(parent) => {
            if state.get(parent).is_none() {
                return Err(ReplicaError::ElementNotFound {
                    address: parent.clone(),
                }
                .into());
            }
            Ok(state.address_after(parent)?)
        }
        None => Ok(state.address_at_end()?),
    }
}

pub(crate) fn notifications(
    change: ChangeId,
    source: Source,
    events: Vec<ReplicaEvent>,
) -> Vec<Notification> {
    events
        .into_iter()
        .map(|event| Notification {
            change,
            source,
            event,
        })
        .collect()
}
