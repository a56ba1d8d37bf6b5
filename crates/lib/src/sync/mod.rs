//! Pairwise change exchange between replicas.
//!
//! A [`SyncEngine`] wraps one [`Replica`] and speaks the change protocol on
//! its behalf: it serves the changes a peer has not seen yet, applies
//! batches received from peers, and remembers what each peer has
//! confirmed so the change log can be compacted. Moving the encoded bytes
//! between processes is left to the caller.
//!
//! Every applied batch is a single commit: it runs against a private copy of
//! the replica state and is published only when the whole batch went
//! through. Refused changes do not abort the batch; they are listed in the
//! returned [`ApplyReport`].

mod error;
mod peer;
mod report;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::change::{Change, ReplicaId, codec};
use crate::log::{EntryStatus, Frontier, Source};
use crate::observer::Notification;
use crate::replica::{Outcome, Replica, ReplicaState, notifications};

pub use error::SyncError;
pub use peer::{PeerSession, ProtocolState};
pub use report::{ApplyReport, Rejection, RejectionReason};

/// Running totals across all rounds of an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub rounds: u64,
    pub applied: u64,
    pub superseded: u64,
    pub duplicates: u64,
    pub denied: u64,
    pub invalid: u64,
    pub rollbacks: u64,
}

impl SyncStats {
    fn record(&mut self, report: &ApplyReport) {
        self.rounds += 1;
        self.applied += report.applied.len() as u64;
        self.superseded += report.superseded.len() as u64;
        self.duplicates += report.duplicates as u64;
        self.denied += report.denied() as u64;
        self.invalid += report.invalid() as u64;
    }
}

/// Sync protocol endpoint for a single replica.
#[derive(Debug)]
pub struct SyncEngine {
    replica: Arc<Replica>,
    peers: Mutex<HashMap<ReplicaId, PeerSession>>,
    stats: Mutex<SyncStats>,
    #[cfg(any(test, feature = "testing"))]
    fail_after: Mutex<Option<usize>>,
}

impl SyncEngine {
    pub fn new(replica: Arc<Replica>) -> Self {
        Self {
            replica,
            peers: Mutex::new(HashMap::new()),
            stats: Mutex::new(SyncStats::default()),
            #[cfg(any(test, feature = "testing"))]
            fail_after: Mutex::new(None),
        }
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    pub fn id(&self) -> ReplicaId {
        self.replica.id()
    }

    pub fn stats(&self) -> SyncStats {
        *self.stats.lock()
    }

    /// Starts tracking `peer`. Returns `false` if it was already known.
    pub fn add_peer(&self, peer: ReplicaId) -> Result<bool> {
        if peer == self.id() {
            return Err(SyncError::SelfPeer(peer).into());
        }
        let mut peers = self.peers.lock();
        if peers.contains_key(&peer) {
            return Ok(false);
        }
        tracing::debug!(replica = %self.id(), %peer, "Added peer");
        peers.insert(peer, PeerSession::new(peer));
        Ok(true)
    }

    pub fn peers(&self) -> Vec<ReplicaId> {
        let mut peers: Vec<_> = self.peers.lock().keys().copied().collect();
        peers.sort();
        peers
    }

    pub fn peer_session(&self, peer: ReplicaId) -> Option<PeerSession> {
        self.peers.lock().get(&peer).cloned()
    }

    /// Changes not covered by `peer_frontier`, in `(origin, sequence)` order,
    /// capped at the configured batch size.
    ///
    /// Holds only a read lock for the duration of the call.
    pub fn poll_changes(&self, peer_frontier: &Frontier) -> Result<Vec<Change>> {
        let state = self.replica.state();
        let changes = match self.replica.config().max_batch_size {
            Some(max) => state.log().poll_limited(peer_frontier, max)?,
            None => state.log().poll_since(peer_frontier)?,
        };
        Ok(changes)
    }

    /// Applies a batch of remote changes as one commit.
    ///
    /// Changes are applied in `(origin, sequence)` order. Changes already
    /// covered by the local frontier are counted as duplicates. Changes
    /// refused for lack of permission or because they are invalid are
    /// recorded and reported, and the batch continues. A change that refers
    /// to an element not seen yet is recorded as waiting; waiting changes
    /// are retried until a pass makes no progress. An `Err` means nothing
    /// from this batch was kept.
    pub fn apply_changes(&self, mut changes: Vec<Change>) -> Result<ApplyReport> {
        changes.sort_by_key(Change::id);
        let total = changes.len();

        let result = self.replica.commit_batch(|state| {
            let mut report = ApplyReport::default();
            let mut notes = Vec::new();

            for (position, change) in changes.into_iter().enumerate() {
                self.check_fault(position)?;

                let id = change.id();
                if state.frontier().covers(&id) {
                    report.duplicates += 1;
                    continue;
                }
                let expected = state.frontier().get(id.origin) + 1;
                if id.sequence != expected {
                    let reason = RejectionReason::SequenceGap {
                        expected,
                        received: id.sequence,
                    };
                    report.rejections.push(Rejection::new(&change, reason));
                    continue;
                }

                let status = evaluate_remote(state, &change, &mut report, &mut notes);
                state.log.record_remote(change, status)?;
            }

            retry_waiting(state, &mut report, &mut notes);
            report.waiting = state.log.waiting().map(Change::id).collect();
            Ok((report, notes))
        });

        match result {
            Ok(report) => {
                self.stats.lock().record(&report);
                tracing::info!(
                    replica = %self.id(),
                    total,
                    applied = report.applied.len(),
                    duplicates = report.duplicates,
                    denied = report.denied(),
                    invalid = report.invalid(),
                    waiting = report.waiting.len(),
                    "Applied change batch"
                );
                Ok(report)
            }
            Err(err) => {
                self.stats.lock().rollbacks += 1;
                tracing::warn!(replica = %self.id(), total, error = %err, "Rolled back change batch");
                Err(err)
            }
        }
    }

    /// Decodes a framed batch and applies it. A framing error rejects the
    /// whole batch before any change is looked at.
    pub fn apply_encoded(&self, bytes: &[u8]) -> Result<ApplyReport> {
        let changes = codec::decode_batch(bytes)?;
        self.apply_changes(changes)
    }

    /// Runs the outbound half of a round: polls the changes `peer` has not
    /// confirmed and encodes them for the transport.
    pub fn prepare_batch(&self, peer: ReplicaId) -> Result<Vec<u8>> {
        let confirmed = self.step(peer, ProtocolState::Polling)?.confirmed().clone();
        let encoded = self
            .poll_changes(&confirmed)
            .and_then(|changes| {
                self.step(peer, ProtocolState::Encoding)?;
                tracing::debug!(replica = %self.id(), %peer, changes = changes.len(), "Encoding batch");
                Ok(codec::encode_batch(&changes)?)
            });
        match encoded {
            Ok(bytes) => {
                self.step(peer, ProtocolState::Idle)?;
                Ok(bytes)
            }
            Err(err) => {
                self.reset(peer);
                Err(err)
            }
        }
    }

    /// Runs the inbound half of a round: applies a batch `peer` sent.
    pub fn receive(&self, peer: ReplicaId, bytes: &[u8]) -> Result<ApplyReport> {
        self.step(peer, ProtocolState::Applying)?;
        match self.apply_encoded(bytes) {
            Ok(report) => {
                self.step(peer, ProtocolState::Idle)?;
                Ok(report)
            }
            Err(err) => {
                self.reset(peer);
                Err(err)
            }
        }
    }

    /// Records that `peer` holds every change in `frontier`, compacting the
    /// log afterwards when configured to.
    pub fn acknowledge(&self, peer: ReplicaId, frontier: &Frontier) -> Result<()> {
        {
            let mut peers = self.peers.lock();
            let session = peers.get_mut(&peer).ok_or(SyncError::UnknownPeer(peer))?;
            session.acknowledge(frontier);
        }
        if self.replica.config().auto_compact {
            self.compact_confirmed()?;
        }
        Ok(())
    }

    /// Drops log entries every known peer has confirmed. Returns how many
    /// entries were dropped.
    pub fn compact_confirmed(&self) -> Result<usize> {
        let agreed = {
            let peers = self.peers.lock();
            let mut confirmed = peers.values().map(PeerSession::confirmed);
            let Some(first) = confirmed.next() else {
                return Ok(0);
            };
            confirmed.fold(first.clone(), |agreed, next| agreed.meet(next))
        };
        if agreed.is_empty() {
            return Ok(0);
        }
        self.replica
            .commit_batch(|state| Ok((state.log.compact(&agreed), Vec::new())))
    }

    /// One full exchange with an engine in the same process: sends what
    /// `peer` is missing and records its new frontier. Both sides register
    /// each other if needed.
    pub fn sync_to(&self, peer: &SyncEngine) -> Result<ApplyReport> {
        self.add_peer(peer.id())?;
        peer.add_peer(self.id())?;
        let batch = self.prepare_batch(peer.id())?;
        let report = peer.receive(self.id(), &batch)?;
        self.acknowledge(peer.id(), &peer.replica.frontier())?;
        Ok(report)
    }

    /// Makes the next batch fail after applying `applied` changes.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_after(&self, applied: Option<usize>) {
        *self.fail_after.lock() = applied;
    }

    #[cfg(any(test, feature = "testing"))]
    fn check_fault(&self, position: usize) -> Result<()> {
        if *self.fail_after.lock() == Some(position) {
            return Err(SyncError::InjectedFault { applied: position }.into());
        }
        Ok(())
    }

    #[cfg(not(any(test, feature = "testing")))]
    fn check_fault(&self, _position: usize) -> Result<()> {
        Ok(())
    }

    fn step(&self, peer: ReplicaId, next: ProtocolState) -> Result<PeerSession> {
        let mut peers = self.peers.lock();
        let session = peers.get_mut(&peer).ok_or(SyncError::UnknownPeer(peer))?;
        session.transition(next)?;
        Ok(session.clone())
    }

    fn reset(&self, peer: ReplicaId) {
        if let Some(session) = self.peers.lock().get_mut(&peer) {
            session.reset();
        }
    }
}

/// Evaluates one remote change with permissions enforced and files the
/// outcome in `report`. Returns the status to log it with.
fn evaluate_remote(
    state: &mut ReplicaState,
    change: &Change,
    report: &mut ApplyReport,
    notes: &mut Vec<Notification>,
) -> EntryStatus {
    let id = change.id();
    match state.evaluate(change, true) {
        Outcome::Applied(events) => {
            notes.extend(notifications(id, Source::Remote, events));
            report.applied.push(id);
            EntryStatus::Applied
        }
        Outcome::Superseded => {
            report.superseded.push(id);
            EntryStatus::Superseded
        }
        Outcome::Rejected(RejectionReason::UnknownTarget { address }) => {
            tracing::debug!(change = %id, kind = %change.kind, %address, "Change waits for an unseen element");
            EntryStatus::Waiting
        }
        Outcome::Rejected(reason) => {
            tracing::debug!(change = %id, kind = %change.kind, %reason, "Refused remote change");
            let status = EntryStatus::Rejected(reason.to_string());
            report.rejections.push(Rejection::new(change, reason));
            status
        }
    }
}

/// Re-evaluates waiting changes until a full pass settles none of them.
fn retry_waiting(
    state: &mut ReplicaState,
    report: &mut ApplyReport,
    notes: &mut Vec<Notification>,
) {
    loop {
        let waiting: Vec<Change> = state.log.waiting().cloned().collect();
        let mut settled = 0;
        for change in waiting {
            let status = evaluate_remote(state, &change, report, notes);
            if status != EntryStatus::Waiting {
                state.log.settle(&change.id(), status);
                settled += 1;
            }
        }
        if settled == 0 {
            break;
        }
    }
}
