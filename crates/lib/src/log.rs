//! Append-only change log and replication frontier.
//!
//! Every change a replica knows about, whether authored locally or received
//! from a peer, is kept in its [`ChangeLog`] under its [`ChangeId`]. The
//! [`Frontier`] records, per origin, the highest contiguous sequence number
//! already recorded; it tells a peer exactly which changes it still needs.
//! A recorded change may still be waiting for an element it refers to.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;
use crate::change::{Change, ChangeId, ChangeKind, ReplicaId, Role};

/// Errors raised by the change log.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// A change was recorded out of sequence for its origin.
    #[error("Sequence gap from {origin}: expected {expected}, received {received}")]
    SequenceGap {
        origin: ReplicaId,
        expected: u64,
        received: u64,
    },

    /// The requested changes were compacted away and cannot be served.
    #[error("Changes from {origin} up to {compacted} were compacted; peer has only {requested}")]
    Compacted {
        origin: ReplicaId,
        compacted: u64,
        requested: u64,
    },
}

impl From<LogError> for crate::Error {
    fn from(err: LogError) -> Self {
        crate::Error::Log(err)
    }
}

/// Highest contiguous sequence number known per origin replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier(BTreeMap<ReplicaId, u64>);

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest contiguous sequence from `origin`; 0 when nothing is known.
    pub fn get(&self, origin: ReplicaId) -> u64 {
        self.0.get(&origin).copied().unwrap_or(0)
    }

    /// Whether the change is already incorporated.
    pub fn covers(&self, id: &ChangeId) -> bool {
        id.sequence <= self.get(id.origin)
    }

    /// Advances the frontier past `id` if it is the next expected sequence.
    /// Returns whether it moved.
    pub fn advance(&mut self, id: &ChangeId) -> bool {
        if id.sequence != self.get(id.origin) + 1 {
            return false;
        }
        self.0.insert(id.origin, id.sequence);
        true
    }

    /// Raises the entry for `origin` to `sequence` if it is higher.
    pub fn raise(&mut self, origin: ReplicaId, sequence: u64) {
        if sequence == 0 {
            return;
        }
        let entry = self.0.entry(origin).or_insert(0);
        *entry = (*entry).max(sequence);
    }

    /// Pointwise minimum of two frontiers: what both have seen.
    pub fn meet(&self, other: &Frontier) -> Frontier {
        Frontier(
            self.0
                .iter()
                .filter_map(|(origin, &seq)| {
                    let shared = seq.min(other.get(*origin));
                    (shared > 0).then_some((*origin, shared))
                })
                .collect(),
        )
    }

    /// Whether every change covered by `other` is covered here too.
    pub fn dominates(&self, other: &Frontier) -> bool {
        other.0.iter().all(|(origin, &seq)| self.get(*origin) >= seq)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReplicaId, u64)> + '_ {
        self.0.iter().map(|(origin, seq)| (*origin, *seq))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where a logged change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Local,
    Remote,
}

/// What applying a logged change did to the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// The change took effect.
    Applied,
    /// The change was valid but lost to a later write on the same field.
    Superseded,
    /// The change was refused; it is kept so sequences stay gapless for
    /// replicas that receive it through us.
    Rejected(String),
    /// The change refers to an element this replica has not seen yet. It is
    /// retried whenever a batch is applied.
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub change: Change,
    pub source: Source,
    pub status: EntryStatus,
    /// Order in which this replica recorded the change. A change is always
    /// recorded after the changes it was built on.
    pub position: u64,
}

/// Append-only record of every change known to a replica.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    local: ReplicaId,
    entries: BTreeMap<ChangeId, LogEntry>,
    waiting: BTreeSet<ChangeId>,
    recorded: u64,
    frontier: Frontier,
    /// Everything at or below this was dropped by compaction.
    compacted: Frontier,
}

impl ChangeLog {
    pub fn new(local: ReplicaId) -> Self {
        Self {
            local,
            entries: BTreeMap::new(),
            waiting: BTreeSet::new(),
            recorded: 0,
            frontier: Frontier::new(),
            compacted: Frontier::new(),
        }
    }

    pub fn local(&self) -> ReplicaId {
        self.local
    }

    /// Sequence number the next local change will receive.
    pub fn next_sequence(&self) -> u64 {
        self.frontier.get(self.local) + 1
    }

    /// Builds the next local change without recording it.
    pub fn prepare_local(
        &self,
        kind: ChangeKind,
        target: Address,
        payload: Vec<u8>,
        role: Role,
    ) -> Change {
        Change {
            origin: self.local,
            sequence: self.next_sequence(),
            kind,
            target,
            payload,
            role,
        }
    }

    /// Builds and records the next local change.
    pub fn append_local(
        &mut self,
        kind: ChangeKind,
        target: Address,
        payload: Vec<u8>,
        role: Role,
    ) -> Change {
        let change = self.prepare_local(kind, target, payload, role);
        self.append_prepared(change.clone(), EntryStatus::Applied);
        change
    }

    /// Records a locally authored change whose effect was already decided.
    pub(crate) fn append_prepared(&mut self, change: Change, status: EntryStatus) {
        debug_assert_eq!(change.origin, self.local);
        debug_assert_eq!(change.sequence, self.next_sequence());
        self.frontier.advance(&change.id());
        let position = self.next_position();
        self.entries.insert(
            change.id(),
            LogEntry {
                change,
                source: Source::Local,
                status,
                position,
            },
        );
    }

    /// Records a change received from a peer and advances the frontier.
    pub fn record_remote(&mut self, change: Change, status: EntryStatus) -> Result<(), LogError> {
        let id = change.id();
        if !self.frontier.advance(&id) {
            return Err(LogError::SequenceGap {
                origin: id.origin,
                expected: self.frontier.get(id.origin) + 1,
                received: id.sequence,
            });
        }
        if status == EntryStatus::Waiting {
            self.waiting.insert(id);
        }
        let position = self.next_position();
        self.entries.insert(
            id,
            LogEntry {
                change,
                source: Source::Remote,
                status,
                position,
            },
        );
        Ok(())
    }

    /// Changes still waiting for an element, in `(origin, sequence)` order.
    pub fn waiting(&self) -> impl Iterator<Item = &Change> {
        self.waiting
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| &entry.change)
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Replaces the status of a waiting change once it could be evaluated.
    pub(crate) fn settle(&mut self, id: &ChangeId, status: EntryStatus) {
        if status == EntryStatus::Waiting {
            return;
        }
        self.waiting.remove(id);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.status = status;
        }
    }

    /// At most `limit` changes not covered by `frontier`, ordered by
    /// `(origin, sequence)`.
    ///
    /// The changes recorded earliest are picked, so a batch never carries a
    /// change without the changes it was built on. Per origin the result is
    /// still a gapless run.
    pub fn poll_limited(
        &self,
        frontier: &Frontier,
        limit: usize,
    ) -> Result<Vec<Change>, LogError> {
        let mut changes = self.poll_since(frontier)?;
        if changes.len() > limit {
            changes.sort_by_key(|change| self.entries.get(&change.id()).map(|e| e.position));
            changes.truncate(limit);
            changes.sort_by_key(Change::id);
        }
        Ok(changes)
    }

    /// All changes not covered by `frontier`, ordered by `(origin, sequence)`.
    pub fn poll_since(&self, frontier: &Frontier) -> Result<Vec<Change>, LogError> {
        let mut out = Vec::new();
        for (origin, known) in self.frontier.iter() {
            let seen = frontier.get(origin);
            if seen >= known {
                continue;
            }
            let compacted = self.compacted.get(origin);
            if seen < compacted {
                return Err(LogError::Compacted {
                    origin,
                    compacted,
                    requested: seen,
                });
            }
            let from = ChangeId::new(origin, seen + 1);
            let to = ChangeId::new(origin, known);
            out.extend(
                self.entries
                    .range(from..=to)
                    .map(|(_, entry)| entry.change.clone()),
            );
        }
        Ok(out)
    }

    /// Drops every entry covered by `agreed`, which must be a frontier all
    /// known peers have confirmed. Waiting entries are kept. Returns how many
    /// entries were dropped.
    pub fn compact(&mut self, agreed: &Frontier) -> usize {
        let before = self.entries.len();
        let waiting = &self.waiting;
        self.entries
            .retain(|id, _| !agreed.covers(id) || waiting.contains(id));
        for (origin, seq) in agreed.iter() {
            self.compacted.raise(origin, seq.min(self.frontier.get(origin)));
        }
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = self.entries.len(), "Compacted change log");
        }
        dropped
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    fn next_position(&mut self) -> u64 {
        self.recorded += 1;
        self.recorded
    }

    pub fn get(&self, id: &ChangeId) -> Option<&LogEntry> {
        self.entries.get(id)
    }

    /// Entries in `(origin, sequence)` order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
