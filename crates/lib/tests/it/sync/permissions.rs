use sprig::{ChangeKind, Role};
use sprig::log::EntryStatus;
use sprig::permission::{PermissionRule, RoleFilter, Scope};
use sprig::sync::RejectionReason;

use crate::helpers::{engine, guest, owner, sync_both, unchecked_engine};

const SHARED_KINDS: [ChangeKind; 4] = [
    ChangeKind::Add,
    ChangeKind::Rename,
    ChangeKind::SetValue,
    ChangeKind::Remove,
];

#[test]
fn permission_gating_and_ownership() {
    let a = engine(1);
    let b = engine(2);

    let root = a.replica().create_root("test", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&b).unwrap();
    assert_eq!(b.replica().get(&root).unwrap().name(), "test");

    // Before any grant, B may not touch A's root.
    assert!(b.replica().rename(&root, "x", &guest()).unwrap_err().is_permission_denied());
    assert!(b.replica().set_value(&root, b"x".to_vec(), &guest()).unwrap_err().is_permission_denied());
    assert!(b.replica().add_child(&root, "x", b"".to_vec(), &guest()).unwrap_err().is_permission_denied());
    assert!(b.replica().remove(&root, &guest()).unwrap_err().is_permission_denied());

    for kind in SHARED_KINDS {
        a.replica()
            .allow_for_all_local(kind, RoleFilter::Any, &owner())
            .unwrap();
    }
    a.sync_to(&b).unwrap();

    b.replica().rename(&root, "test2", &guest()).unwrap();
    b.replica().set_value(&root, b"test3".to_vec(), &guest()).unwrap();
    let child = b.replica().add_child(&root, "test4", b"".to_vec(), &guest()).unwrap();
    let report = b.sync_to(&a).unwrap();
    assert!(report.is_clean(), "unexpected rejections: {:?}", report.rejections);

    let seen = a.replica().get(&root).unwrap();
    assert_eq!(seen.name(), "test2");
    assert_eq!(seen.value_str(), Some("test3"));
    let children = a.replica().children(Some(&root));
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), "test4");
    assert_eq!(children[0].origin(), b.id());

    // The child belongs to B: A's blanket grant covers only what A created.
    let err = a.replica().rename(&child, "mine", &owner()).unwrap_err();
    assert!(err.is_permission_denied());
    let err = a.replica().remove(&child, &owner()).unwrap_err();
    assert!(err.is_permission_denied());
    // A still owns its root, but B's rename carries the higher change id,
    // so A's later rename has no effect and is refused without being logged.
    let before = a.replica().frontier();
    let err = a.replica().rename(&root, "still-mine", &owner()).unwrap_err();
    assert!(err.is_superseded());
    assert_eq!(a.replica().get(&root).unwrap().name(), "test2");
    assert_eq!(a.replica().frontier(), before);
    a.replica().add_child(&root, "from-a", b"".to_vec(), &owner()).unwrap();
    assert_eq!(a.replica().children(Some(&root)).len(), 2);
}

#[test]
fn receiver_enforces_rules_the_sender_skipped() {
    let a = engine(1);
    let rogue = unchecked_engine(3);

    let root = a.replica().create_root("test", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&rogue).unwrap();

    rogue.replica().rename(&root, "x", &guest()).unwrap();
    rogue.replica().set_value(&root, b"x".to_vec(), &guest()).unwrap();
    rogue.replica().add_child(&root, "x", b"".to_vec(), &guest()).unwrap();
    rogue.replica().remove(&root, &guest()).unwrap();
    assert!(rogue.replica().is_empty());

    let report = rogue.sync_to(&a).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.denied(), 4);
    assert!(report
        .rejections
        .iter()
        .all(|r| matches!(r.reason, RejectionReason::PermissionDenied { .. })));

    let kept = a.replica().get(&root).unwrap();
    assert_eq!(kept.name(), "test");
    assert!(kept.value().is_empty());
    assert!(a.replica().children(Some(&root)).is_empty());
    assert_eq!(a.stats().denied, 4);

    // Refused changes are logged and count as received.
    let state = a.replica().state();
    let refused = state
        .log()
        .entries()
        .filter(|e| matches!(e.status, EntryStatus::Rejected(_)))
        .count();
    assert_eq!(refused, 4);
    assert_eq!(a.replica().frontier().get(rogue.id()), 4);
}

#[test]
fn refused_changes_relay_without_gaps() {
    let a = engine(1);
    let rogue = unchecked_engine(3);
    let d = engine(4);

    let root = a.replica().create_root("test", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&rogue).unwrap();
    rogue.replica().rename(&root, "x", &guest()).unwrap();
    rogue.sync_to(&a).unwrap();

    // D hears about the refused rename only through A, and refuses it too.
    let report = a.sync_to(&d).unwrap();
    assert_eq!(report.denied(), 1);
    assert_eq!(d.replica().get(&root).unwrap().name(), "test");

    // The rogue's next, legitimate change is not stuck behind a gap.
    let own = rogue.replica().create_root("own", b"".to_vec(), &owner()).unwrap();
    rogue.sync_to(&a).unwrap();
    let report = a.sync_to(&d).unwrap();
    assert!(report.is_clean());
    assert_eq!(d.replica().get(&own).unwrap().name(), "own");
}

#[test]
fn element_rule_overrides_origin_grant() {
    let a = engine(1);
    let b = engine(2);

    let open = a.replica().create_root("open", b"".to_vec(), &owner()).unwrap();
    let locked = a.replica().create_root("locked", b"".to_vec(), &owner()).unwrap();
    a.replica()
        .allow_for_all_local(ChangeKind::Rename, RoleFilter::Any, &owner())
        .unwrap();
    a.replica()
        .set_rule(
            PermissionRule::deny(
                RoleFilter::Only(guest()),
                ChangeKind::Rename,
                Scope::Element(locked.clone()),
            ),
            &owner(),
        )
        .unwrap();
    a.sync_to(&b).unwrap();

    b.replica().rename(&open, "renamed", &guest()).unwrap();
    let err = b.replica().rename(&locked, "renamed", &guest()).unwrap_err();
    assert!(err.is_permission_denied());
    // The deny only names the guest role.
    b.replica().rename(&locked, "by-editor", &Role::new("editor")).unwrap();

    sync_both(&b, &a);
    assert_eq!(a.replica().get(&open).unwrap().name(), "renamed");
    assert_eq!(a.replica().get(&locked).unwrap().name(), "by-editor");
}

#[test]
fn later_grant_revokes_earlier_one() {
    let a = engine(1);
    let b = engine(2);
    let root = a.replica().create_root("root", b"".to_vec(), &owner()).unwrap();

    a.replica()
        .allow_for_all_local(ChangeKind::SetValue, RoleFilter::Any, &owner())
        .unwrap();
    a.sync_to(&b).unwrap();
    b.replica().set_value(&root, b"one".to_vec(), &guest()).unwrap();
    b.sync_to(&a).unwrap();
    assert_eq!(a.replica().get(&root).unwrap().value(), b"one");

    a.replica()
        .set_rule(
            PermissionRule::deny(RoleFilter::Any, ChangeKind::SetValue, Scope::Origin(a.id())),
            &owner(),
        )
        .unwrap();
    a.sync_to(&b).unwrap();
    let err = b.replica().set_value(&root, b"two".to_vec(), &guest()).unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(b.replica().get(&root).unwrap().value(), b"one");
}

#[test]
fn grants_on_foreign_scope_are_refused() {
    let a = engine(1);
    let rogue = unchecked_engine(3);
    let root = a.replica().create_root("root", b"".to_vec(), &owner()).unwrap();
    a.sync_to(&rogue).unwrap();

    // The rogue tries to open A's elements to everyone.
    rogue
        .replica()
        .set_rule(
            PermissionRule::allow(RoleFilter::Any, ChangeKind::Remove, Scope::Origin(a.id())),
            &guest(),
        )
        .unwrap();
    rogue.replica().remove(&root, &guest()).unwrap();

    let report = rogue.sync_to(&a).unwrap();
    assert_eq!(report.denied(), 2);
    assert!(a.replica().get(&root).is_some());
    assert!(a.replica().state().permissions().is_empty());
}
