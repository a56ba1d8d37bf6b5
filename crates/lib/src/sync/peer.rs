//! Per-peer protocol bookkeeping.

use std::fmt;

use super::SyncError;
use crate::change::ReplicaId;
use crate::log::Frontier;

/// Where a replica is in a sync round with one peer.
///
/// Outbound rounds run `Idle -> Polling -> Encoding -> Idle`; the encoded
/// batch then travels over a transport this crate does not own. Inbound
/// rounds run `Idle -> Applying -> Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    #[default]
    Idle,
    Polling,
    Encoding,
    Applying,
}

impl ProtocolState {
    pub fn can_transition_to(self, next: ProtocolState) -> bool {
        use ProtocolState::*;
        matches!(
            (self, next),
            (Idle, Polling) | (Polling, Encoding) | (Polling, Idle) | (Encoding, Idle)
                | (Idle, Applying)
                | (Applying, Idle)
        )
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Idle => "idle",
            ProtocolState::Polling => "polling",
            ProtocolState::Encoding => "encoding",
            ProtocolState::Applying => "applying",
        };
        f.write_str(name)
    }
}

/// What this replica knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    peer: ReplicaId,
    state: ProtocolState,
    /// Changes the peer has confirmed holding.
    confirmed: Frontier,
    rounds: u64,
}

impl PeerSession {
    pub fn new(peer: ReplicaId) -> Self {
        Self {
            peer,
            state: ProtocolState::Idle,
            confirmed: Frontier::new(),
            rounds: 0,
        }
    }

    pub fn peer(&self) -> ReplicaId {
        self.peer
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn confirmed(&self) -> &Frontier {
        &self.confirmed
    }

    /// Completed rounds in either direction.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub(crate) fn transition(&mut self, next: ProtocolState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                peer: self.peer,
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(peer = %self.peer, from = %self.state, to = %next, "Protocol transition");
        if next == ProtocolState::Idle {
            self.rounds += 1;
        }
        self.state = next;
        Ok(())
    }

    /// Returns to `Idle` after a failed step without counting a round.
    pub(crate) fn reset(&mut self) {
        self.state = ProtocolState::Idle;
    }

    /// Records that the peer holds everything in `frontier`. Confirmations
    /// only ever grow.
    pub(crate) fn acknowledge(&mut self, frontier: &Frontier) {
        for (origin, sequence) in frontier.iter() {
            self.confirmed.raise(origin, sequence);
        }
    }
}
