use std::sync::{Arc, Mutex};

use sprig::ChangeKind;
use sprig::log::Source;
use sprig::observer::{Notification, ReplicaEvent};
use sprig::permission::RoleFilter;

use crate::helpers::{contents, engine, guest, owner, record_events, sync_both};

/// Two replicas sharing A's root, with everything on A open to every role.
fn shared_pair() -> (sprig::SyncEngine, sprig::SyncEngine, sprig::Address) {
    let a = engine(1);
    let b = engine(2);
    let root = a.replica().create_root("test", b"".to_vec(), &owner()).unwrap();
    for kind in ChangeKind::ALL {
        a.replica()
            .allow_for_all_local(kind, RoleFilter::Any, &owner())
            .unwrap();
    }
    a.sync_to(&b).unwrap();
    (a, b, root)
}

#[test]
fn deleted_child_is_not_resurrected() {
    let (a, b, root) = shared_pair();
    let child = b.replica().add_child(&root, "test4", b"".to_vec(), &guest()).unwrap();
    b.sync_to(&a).unwrap();
    assert!(a.replica().get(&child).is_some());

    b.replica().remove(&child, &guest()).unwrap();
    b.sync_to(&a).unwrap();
    assert!(a.replica().get(&child).is_none());

    a.replica().rename(&root, "test5", &owner()).unwrap();
    a.sync_to(&b).unwrap();
    assert_eq!(b.replica().get(&root).unwrap().name(), "test5");
    assert!(b.replica().get(&child).is_none());
    assert!(b.replica().children(Some(&root)).is_empty());

    sync_both(&a, &b);
    assert!(a.replica().children(Some(&root)).is_empty());
    assert_eq!(contents(&a), contents(&b));
}

#[test]
fn concurrent_renames_resolve_by_change_order() {
    let (a, b, root) = shared_pair();

    // Both edit before hearing from each other.
    a.replica().rename(&root, "from-a", &owner()).unwrap();
    a.replica().rename(&root, "from-a-again", &owner()).unwrap();
    b.replica().rename(&root, "from-b", &guest()).unwrap();

    let (to_b, to_a) = sync_both(&a, &b);
    // B's change orders after every change from A, whatever the sequences.
    assert_eq!(to_b.superseded.len(), 2);
    assert_eq!(to_a.applied.len(), 1);
    assert_eq!(a.replica().get(&root).unwrap().name(), "from-b");
    assert_eq!(b.replica().get(&root).unwrap().name(), "from-b");
}

#[test]
fn concurrent_inserts_into_the_same_gap_both_survive() {
    let (a, b, root) = shared_pair();
    let first = a.replica().add_child(&root, "first", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&b).unwrap();

    let from_a = a.replica().add_child(&root, "a", b"".to_vec(), &owner()).unwrap();
    let from_b = b.replica().add_child(&root, "b", b"".to_vec(), &guest()).unwrap();
    assert_ne!(from_a, from_b);

    sync_both(&a, &b);
    let names = |e: &sprig::SyncEngine| -> Vec<String> {
        e.replica()
            .children(Some(&root))
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    };
    assert_eq!(names(&a), names(&b));
    assert_eq!(names(&a).len(), 3);
    assert_eq!(names(&a)[0], "first");
    assert!(first < from_a && first < from_b);
    assert_eq!(contents(&a), contents(&b));
}

/// `(address, name)` of every hidden element in address order.
fn hidden(engine: &sprig::SyncEngine) -> Vec<(sprig::Address, String)> {
    engine
        .replica()
        .state()
        .hidden()
        .map(|e| (e.address().clone(), e.name().to_string()))
        .collect()
}

#[test]
fn edit_of_a_concurrently_removed_element_stays_hidden() {
    let (a, b, root) = shared_pair();
    let child = a.replica().add_child(&root, "child", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&b).unwrap();

    a.replica().remove(&child, &owner()).unwrap();
    b.replica().rename(&child, "edited", &guest()).unwrap();

    let (to_b, to_a) = sync_both(&a, &b);
    assert!(to_b.is_clean());
    assert!(to_a.is_clean());
    assert_eq!(to_a.applied.len(), 1);
    assert!(a.replica().get(&child).is_none());
    assert!(b.replica().get(&child).is_none());
    assert_eq!(hidden(&a), vec![(child, "edited".to_string())]);
    assert_eq!(hidden(&a), hidden(&b));
    assert_eq!(contents(&a), contents(&b));
    assert_eq!(a.replica().frontier(), b.replica().frontier());
}

#[test]
fn move_out_of_a_concurrently_removed_parent_keeps_the_element() {
    let (a, b, root) = shared_pair();
    let parent = a.replica().add_child(&root, "parent", b"".to_vec(), &owner()).unwrap();
    let child = a.replica().add_child(&parent, "child", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&b).unwrap();

    a.replica().remove(&parent, &owner()).unwrap();
    assert!(a.replica().get(&child).is_none());
    b.replica().move_to(&child, None, &guest()).unwrap();

    let events = record_events(&a);
    let (to_b, to_a) = sync_both(&a, &b);
    assert!(to_b.is_clean());
    assert!(to_a.is_clean());

    for side in [&a, &b] {
        assert!(side.replica().get(&parent).is_none());
        assert_eq!(side.replica().get(&child).unwrap().parent(), None);
    }
    assert_eq!(contents(&a), contents(&b));
    assert_eq!(hidden(&a), hidden(&b));
    // The child comes back into view on A.
    assert!(matches!(
        events.lock().unwrap().as_slice(),
        [ReplicaEvent::Added { address, parent: None, .. }] if address == &child
    ));
    a.replica().state().index().validate().unwrap();
}

#[test]
fn move_into_a_concurrently_removed_parent_hides_the_element() {
    let (a, b, root) = shared_pair();
    let doomed = a.replica().add_child(&root, "doomed", b"".to_vec(), &owner()).unwrap();
    let leaf = a.replica().add_child(&root, "leaf", b"".to_vec(), &owner()).unwrap();
    a.replica().add_child(&leaf, "under-leaf", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&b).unwrap();

    a.replica().remove(&doomed, &owner()).unwrap();
    b.replica().move_to(&leaf, Some(&doomed), &guest()).unwrap();

    let (to_b, to_a) = sync_both(&a, &b);
    assert!(to_b.is_clean());
    assert!(to_a.is_clean());

    for side in [&a, &b] {
        assert!(side.replica().get(&leaf).is_none());
        assert_eq!(side.replica().children(Some(&root)).len(), 0);
        assert_eq!(side.replica().len(), 1);
    }
    assert_eq!(hidden(&a).len(), 3);
    assert_eq!(hidden(&a), hidden(&b));
}

#[test]
fn relayed_child_waits_for_its_parent() {
    let a = engine(1);
    let b = engine(2);
    let c = engine(3);

    let root = c.replica().create_root("from-c", b"".to_vec(), &owner()).unwrap();
    c.replica()
        .allow_for_all_local(ChangeKind::Add, RoleFilter::Any, &owner())
        .unwrap();
    c.sync_to(&b).unwrap();
    let child = b.replica().add_child(&root, "from-b", b"".to_vec(), &guest()).unwrap();

    // A hears of C's root only through B, and B's own change orders first.
    let report = b.sync_to(&a).unwrap();
    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(report.applied.len(), 3);
    assert_eq!(a.replica().get(&child).unwrap().parent(), Some(&root));

    sync_both(&a, &c);
    sync_both(&b, &c);
    assert_eq!(contents(&a), contents(&b));
    assert_eq!(contents(&a), contents(&c));
    assert_eq!(a.replica().frontier(), c.replica().frontier());
}

#[test]
fn moves_converge() {
    let (a, b, root) = shared_pair();
    let left = a.replica().add_child(&root, "left", b"".to_vec(), &owner()).unwrap();
    let right = a.replica().add_child(&root, "right", b"".to_vec(), &owner()).unwrap();
    let leaf = a.replica().add_child(&left, "leaf", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&b).unwrap();

    a.replica().move_to(&leaf, Some(&right), &owner()).unwrap();
    b.replica().move_to(&leaf, None, &guest()).unwrap();
    sync_both(&a, &b);

    // B's move carries the higher change id.
    assert_eq!(a.replica().get(&leaf).unwrap().parent(), None);
    assert_eq!(contents(&a), contents(&b));
    a.replica().state().index().validate().unwrap();
}

#[test]
fn observers_see_remote_changes_after_commit() {
    let (a, b, root) = shared_pair();
    let seen: Arc<Mutex<Vec<Notification>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let replica = Arc::clone(a.replica());
    a.replica().observe(Arc::new(move |n: &Notification| {
        // Committed state is visible from inside the callback.
        if let ReplicaEvent::Added { address, .. } = &n.event {
            assert!(replica.get(address).is_some());
        }
        sink.lock().unwrap().push(n.clone());
    }));

    let child = b.replica().add_child(&root, "child", b"".to_vec(), &guest()).unwrap();
    b.replica().set_value(&child, b"v".to_vec(), &guest()).unwrap();
    b.sync_to(&a).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|n| n.source == Source::Remote && n.change.origin == b.id()));
    assert!(matches!(
        &seen[0].event,
        ReplicaEvent::Added { address, parent: Some(p), rank: 1 } if address == &child && p == &root
    ));
    assert!(matches!(&seen[1].event, ReplicaEvent::ValueSet { value, .. } if value == b"v"));
}

#[test]
fn three_replicas_converge_through_a_relay() {
    let (a, b, root) = shared_pair();
    let c = engine(3);
    a.sync_to(&c).unwrap();

    b.replica().add_child(&root, "from-b", b"".to_vec(), &guest()).unwrap();
    c.replica().rename(&root, "from-c", &guest()).unwrap();

    // B and C never talk directly.
    sync_both(&b, &a);
    sync_both(&c, &a);
    sync_both(&b, &a);

    assert_eq!(contents(&a), contents(&b));
    assert_eq!(contents(&a), contents(&c));
    assert_eq!(a.replica().get(&root).unwrap().name(), "from-c");
}
