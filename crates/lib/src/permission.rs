//! Role-based permission rules.
//!
//! Rules form a flat list. A check considers the candidate scopes of the
//! target from most to least specific; the first scope with any matching rule
//! decides, and within it the most recently added matching rule wins. With no
//! matching rule the answer is deny.
//!
//! Rules are never edited in place. They arrive as
//! [`ChangeKind::Grant`] changes, so every grant or revocation is replicated
//! and auditable like any other mutation.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::change::{ChangeId, ChangeKind, ReplicaId, Role};

/// Which acting roles a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleFilter {
    /// Every role.
    Any,
    /// A single named role.
    Only(Role),
}

impl RoleFilter {
    pub fn matches(&self, role: &Role) -> bool {
        match self {
            RoleFilter::Any => true,
            RoleFilter::Only(only) => only == role,
        }
    }
}

/// What a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// A single element.
    Element(Address),
    /// Every element created by the given replica.
    Origin(ReplicaId),
}

impl Scope {
    /// Higher is more specific.
    pub fn specificity(&self) -> u8 {
        match self {
            Scope::Element(_) => 2,
            Scope::Origin(_) => 1,
        }
    }
}

/// A single allow or deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionRule {
    pub role: RoleFilter,
    pub kind: ChangeKind,
    pub scope: Scope,
    pub allow: bool,
}

impl PermissionRule {
    /// A rule allowing `kind` for `role` on `scope`.
    pub fn allow(role: RoleFilter, kind: ChangeKind, scope: Scope) -> Self {
        Self {
            role,
            kind,
            scope,
            allow: true,
        }
    }

    /// A rule denying `kind` for `role` on `scope`.
    pub fn deny(role: RoleFilter, kind: ChangeKind, scope: Scope) -> Self {
        Self {
            role,
            kind,
            scope,
            allow: false,
        }
    }

    fn matches(&self, role: &Role, kind: ChangeKind, scope: &Scope) -> bool {
        self.kind == kind && &self.scope == scope && self.role.matches(role)
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// A rule together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRule {
    pub rule: PermissionRule,
    /// The grant change that introduced the rule.
    pub source: ChangeId,
    /// Local insertion counter; higher is more recent.
    added: u64,
}

/// The set of permission rules known to a replica.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    rules: Vec<RecordedRule>,
    next: u64,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rule introduced by the given grant change.
    pub fn add(&mut self, rule: PermissionRule, source: ChangeId) {
        self.next += 1;
        tracing::debug!(
            kind = %rule.kind,
            allow = rule.allow,
            source = %source,
            "Recorded permission rule"
        );
        self.rules.push(RecordedRule {
            rule,
            source,
            added: self.next,
        });
    }

    /// Checks whether `role` may perform `kind` on a target described by
    /// `scopes`.
    ///
    /// `scopes` lists every scope the target falls under, in any order.
    pub fn check(&self, role: &Role, kind: ChangeKind, scopes: &[Scope]) -> Decision {
        let mut candidates: Vec<&Scope> = scopes.iter().collect();
        candidates.sort_by_key(|scope| std::cmp::Reverse(scope.specificity()));

        for scope in candidates {
            let winner = self
                .rules
                .iter()
                .filter(|recorded| recorded.rule.matches(role, kind, scope))
                .max_by_key(|recorded| recorded.added);
            if let Some(recorded) = winner {
                return if recorded.rule.allow {
                    Decision::Allow
                } else {
                    Decision::Deny
                };
            }
        }
        Decision::Deny
    }

    /// Rules in the order they were added.
    pub fn rules(&self) -> impl Iterator<Item = &RecordedRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
