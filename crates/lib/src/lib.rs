//!
//! Sprig: replicated ordered trees.
//!
//! Independent replicas each hold an ordered, tree-shaped collection of named
//! elements and converge by exchanging permission-checked changes pairwise.
//! There is no coordinator, and inserting an element never renumbers the
//! ones around it.
//!
//! ## Core Concepts
//!
//! * **Addresses (`address::Address`)**: Byte strings ordered lexicographically. A fresh address can always be generated between any two neighbours, so positions never need rewriting.
//! * **Ordered index (`index::OrderedIndex`)**: A counted red-black tree over addresses with O(log n) rank queries and copy-on-write snapshots.
//! * **Changes (`change::Change`)**: The immutable unit of replication, identified by `(origin, sequence)` and shipped in a compact postcard wire form.
//! * **Change log (`log::ChangeLog`)**: Every change a replica knows, plus the frontier that tells a peer what it is missing.
//! * **Permissions (`permission::PermissionTable`)**: Per-role allow/deny rules, themselves replicated as changes.
//! * **Replicas (`replica::Replica`)**: The local mutation API over the committed state.
//! * **Sync (`sync::SyncEngine`)**: Polling and applying change batches between peers, one atomic commit per batch.

pub mod address;
pub mod change;
pub mod config;
pub mod context;
pub mod element;
pub mod index;
pub mod log;
pub mod observer;
pub mod permission;
pub mod replica;
pub mod sync;

pub use address::Address;
pub use change::{Change, ChangeId, ChangeKind, ReplicaId, Role};
pub use config::ReplicaConfig;
pub use context::ReplicaContext;
pub use element::Element;
pub use replica::Replica;
pub use sync::SyncEngine;

/// Result type used throughout the Sprig library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Sprig library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid bounds passed to address generation
    #[error(transparent)]
    Address(address::AddressOrderError),

    /// Broken index bookkeeping
    #[error(transparent)]
    Index(index::IndexError),

    /// Wire encoding and payload errors from the change module
    #[error(transparent)]
    Change(change::ChangeError),

    /// Change log errors
    #[error(transparent)]
    Log(log::LogError),

    /// Refused local mutations
    #[error(transparent)]
    Replica(replica::ReplicaError),

    /// Sync protocol errors
    #[error(transparent)]
    Sync(sync::SyncError),

    /// Configuration loading errors
    #[error(transparent)]
    Config(config::ConfigError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Address(_) => "address",
            Error::Index(_) => "index",
            Error::Change(_) => "change",
            Error::Log(_) => "log",
            Error::Replica(_) => "replica",
            Error::Sync(_) => "sync",
            Error::Config(_) => "config",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Replica(replica_err) => replica_err.is_not_found(),
            Error::Sync(sync_err) => sync_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates permission was denied.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Replica(replica_err) => replica_err.is_permission_denied(),
            _ => false,
        }
    }

    /// Check if a local change was refused because a write with a higher
    /// change id already holds the field.
    pub fn is_superseded(&self) -> bool {
        match self {
            Error::Replica(replica_err) => replica_err.is_superseded(),
            _ => false,
        }
    }

    /// Check if this error is a wire framing or payload error.
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::Change(_))
    }

    /// Check if this error indicates a data integrity issue.
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, Error::Index(_))
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Config(config_err) => config_err.is_io_error(),
            _ => false,
        }
    }

    /// Check if the peer asked for changes this replica already compacted.
    pub fn is_compacted(&self) -> bool {
        matches!(self, Error::Log(log::LogError::Compacted { .. }))
    }
}
