use std::sync::{Arc, Mutex};

use sprig::{
    Address, Replica, ReplicaConfig, ReplicaId, Role, SyncEngine,
    observer::{Notification, ReplicaEvent},
    sync::ApplyReport,
};

pub fn replica_id(id: u64) -> ReplicaId {
    ReplicaId::new(id).expect("test replica ids are non-zero")
}

/// A sync engine over a fresh replica with a fixed id.
pub fn engine(id: u64) -> SyncEngine {
    engine_with(ReplicaConfig::default().with_replica_id(replica_id(id)))
}

pub fn engine_with(config: ReplicaConfig) -> SyncEngine {
    let replica = Replica::from_config(config).expect("Failed to create replica");
    SyncEngine::new(Arc::new(replica))
}

/// A replica that does not check its own mutations, so refused changes
/// still reach the peer and are rejected there.
pub fn unchecked_engine(id: u64) -> SyncEngine {
    engine_with(
        ReplicaConfig::default()
            .with_replica_id(replica_id(id))
            .with_local_permissions(false),
    )
}

pub fn owner() -> Role {
    Role::new("owner")
}

pub fn guest() -> Role {
    Role::new("guest")
}

/// Collects every event an observer sees.
pub fn record_events(engine: &SyncEngine) -> Arc<Mutex<Vec<ReplicaEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine
        .replica()
        .observe(Arc::new(move |notification: &Notification| {
            sink.lock().unwrap().push(notification.event.clone());
        }));
    seen
}

/// Syncs both ways, `a` first.
pub fn sync_both(a: &SyncEngine, b: &SyncEngine) -> (ApplyReport, ApplyReport) {
    let to_b = a.sync_to(b).expect("sync a -> b failed");
    let to_a = b.sync_to(a).expect("sync b -> a failed");
    (to_b, to_a)
}

/// `(name, value, parent)` of every element in address order.
pub fn contents(engine: &SyncEngine) -> Vec<(String, Vec<u8>, Option<Address>)> {
    engine
        .replica()
        .snapshot()
        .iter()
        .map(|e| (e.name().to_string(), e.value().to_vec(), e.parent().cloned()))
        .collect()
}
