//! End-to-end scenarios exercising the public API as an external
//! consumer would, one test per documented behavior.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use proptree_core::{Courier, CourierConfig, EventKind, LinkMode, Payload, SubscribeOptions, Trampoline, TreeConfig};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn destroy_tracker_sees_set_void_then_destroyed_for_existing_node() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let root = tree.global_root();
    let x = tree.create(root, Some("x")).expect("create x");
    let y = tree.create(x, Some("y")).expect("create y");
    tree.set_int(y, 1);

    let events: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let trampoline = Trampoline::Generic(Arc::new({
        let events = events.clone();
        move |event, _payload| lock(&events).push(event)
    }));
    let opts = SubscribeOptions::new(["x", "y"], trampoline)
        .direct_update()
        .no_initial_update()
        .track_destroy();
    let sid = tree.subscribe(opts);
    assert!(sid.is_some());

    tree.destroy(y);
    assert_eq!(*lock(&events), vec![EventKind::SetVoid, EventKind::Destroyed]);
}

#[test]
fn link_unlink_round_trip_restores_routing_without_spurious_notifications() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let root = tree.global_root();
    let src = tree.create(root, Some("src")).expect("create src");
    let dst = tree.create(root, Some("dst")).expect("create dst");
    tree.set_int(src, 1);
    tree.set_int(dst, 2);

    let values: Arc<Mutex<Vec<Option<i64>>>> = Arc::new(Mutex::new(Vec::new()));
    let trampoline = Trampoline::Int(Arc::new({
        let values = values.clone();
        move |_event, v| lock(&values).push(v)
    }));
    let opts = SubscribeOptions::new(["dst"], trampoline)
        .direct_update()
        .no_initial_update();
    tree.subscribe(opts);

    tree.link(src, dst, LinkMode::Soft);
    assert_eq!(*lock(&values), vec![Some(1)]);

    tree.unlink(dst);
    assert_eq!(*lock(&values), vec![Some(1), Some(2)]);
}

#[test]
fn directory_snapshot_reports_children_in_insertion_order() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let root = tree.global_root();
    let b = tree.create(root, Some("b")).expect("create b");
    let c = tree.create(root, Some("c")).expect("create c");
    let d = tree.create(root, Some("d")).expect("create d");

    let children: Arc<Mutex<Vec<proptree_core::NodeId>>> = Arc::new(Mutex::new(Vec::new()));
    let trampoline = Trampoline::Generic(Arc::new({
        let children = children.clone();
        move |event, payload| {
            if event == EventKind::AddChildVectorDirect {
                if let Payload::AddChildVectorDirect(snaps) = payload {
                    lock(&children).extend(snaps.iter().map(|s| s.id));
                }
            }
        }
    }));
    let opts = SubscribeOptions::new("", trampoline).direct_update();
    tree.subscribe(opts);

    assert_eq!(*lock(&children), vec![b, c, d]);
}

#[test]
fn moving_a_child_emits_move_child_and_reorders_directory() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let root = tree.global_root();
    let b = tree.create(root, Some("b")).expect("create b");
    let c = tree.create(root, Some("c")).expect("create c");

    let events: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let trampoline = Trampoline::Generic(Arc::new({
        let events = events.clone();
        move |event, _payload| lock(&events).push(event)
    }));
    let opts = SubscribeOptions::new("", trampoline)
        .direct_update()
        .no_initial_update();
    tree.subscribe(opts);

    tree.move_child(c, Some(b));
    assert_eq!(*lock(&events), vec![EventKind::MoveChild]);
}

#[test]
fn direct_update_bypasses_a_supplied_courier() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let courier = Courier::create_waitable(&tree, CourierConfig::default());
    let root = tree.global_root();
    let a = tree.create(root, Some("a")).expect("create a");

    let values: Arc<Mutex<Vec<Option<i64>>>> = Arc::new(Mutex::new(Vec::new()));
    let trampoline = Trampoline::Int(Arc::new({
        let values = values.clone();
        move |_event, v| lock(&values).push(v)
    }));
    let opts = SubscribeOptions::new(["a"], trampoline)
        .courier(courier.clone())
        .direct_update()
        .no_initial_update();
    tree.subscribe(opts);

    tree.set_int(a, 11);

    // Delivered synchronously, despite a courier being attached: nothing
    // was ever enqueued for `poll` to drain.
    assert_eq!(*lock(&values), vec![Some(11)]);
    assert!(!courier.check());
}

#[test]
fn track_destroy_expedited_preempts_an_already_queued_normal_record() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let courier = Courier::create_waitable(&tree, CourierConfig::default());
    let root = tree.global_root();
    let a = tree.create(root, Some("a")).expect("create a");

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let normal_trampoline = Trampoline::Generic(Arc::new({
        let order = order.clone();
        move |_event, _payload| lock(&order).push("normal")
    }));
    let opts = SubscribeOptions::new(["a"], normal_trampoline)
        .courier(courier.clone())
        .no_initial_update();
    tree.subscribe(opts);

    // Enqueues a normal-priority record ahead of anything else.
    tree.set_int(a, 1);

    let destroy_trampoline = Trampoline::Generic(Arc::new({
        let order = order.clone();
        move |_event, _payload| lock(&order).push("destroyed")
    }));
    let opts = SubscribeOptions::new(["x", "y"], destroy_trampoline)
        .courier(courier.clone())
        .no_initial_update()
        .track_destroy_expedited();
    // `y` does not exist: this fires an immediate `Destroyed` record. It
    // carries `TRACK_DESTROY_EXP` but not `EXPEDITE`, and must still land
    // on the expedited queue.
    let sid = tree.subscribe(opts);
    assert!(sid.is_none());

    // One wakeup drains the whole expedited queue before the first normal
    // record, even though the normal record was enqueued first.
    courier.poll();
    assert_eq!(*lock(&order), vec!["destroyed", "normal"]);
}

#[test]
fn singleton_subscription_collision_is_refused() {
    let tree = proptree_core::Tree::new(TreeConfig::default());
    let root = tree.global_root();
    let a = tree.create(root, Some("a")).expect("create a");
    tree.set_int(a, 1);

    let make_opts = || {
        SubscribeOptions::new(["a"], Trampoline::Int(Arc::new(|_e, _v| {})))
            .direct_update()
            .singleton(42)
    };
    let first = tree.subscribe(make_opts());
    assert!(first.is_some());
    let second = tree.subscribe(make_opts());
    assert!(second.is_none());
}
