//! Property-based checks for the quantified invariants and laws that a
//! handful of example-based tests can't cover on their own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use proptest::prelude::*;
use proptree_core::{ChildSnapshot, EventKind, Payload, SubscribeOptions, Trampoline, TreeConfig};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

proptest! {
    /// Law: a second identical `set_int` never emits a second notification,
    /// no matter how long the run of repeated values is.
    #[test]
    fn idempotent_int_run_emits_one_notification_per_distinct_value(
        values in prop::collection::vec(-1000i64..1000, 1..40)
    ) {
        let tree = proptree_core::Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let a = tree.create(root, Some("a")).expect("create a");

        let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let trampoline = Trampoline::Int(Arc::new({
            let seen = seen.clone();
            move |_event, v| if let Some(v) = v { lock(&seen).push(v) }
        }));
        let opts = SubscribeOptions::new(["a"], trampoline)
            .direct_update()
            .no_initial_update();
        tree.subscribe(opts);

        let mut expected = Vec::new();
        let mut last: Option<i64> = None;
        for v in &values {
            tree.set_int(a, *v);
            if last != Some(*v) {
                expected.push(*v);
            }
            last = Some(*v);
        }

        prop_assert_eq!(lock(&seen).clone(), expected);
    }

    /// Invariant 5: a directory's `selected` child, observed through the
    /// `ADD_CHILD` snapshot flag, is always either absent or one of the
    /// directory's own children — and matches whichever child was most
    /// recently selected.
    #[test]
    fn selection_always_names_a_live_child_or_nothing(
        picks in prop::collection::vec(0usize..4, 1..20)
    ) {
        let tree = proptree_core::Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let names = ["b", "c", "d", "e"];
        let children: Vec<_> = names
            .iter()
            .map(|n| tree.create(root, Some(n)).expect("create child"))
            .collect();

        let mut expected_selected: Option<proptree_core::NodeId> = None;
        for pick in &picks {
            let target = children[*pick % children.len()];
            tree.select(target, None);
            expected_selected = Some(target);
        }

        let snaps: Arc<Mutex<Vec<ChildSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let trampoline = Trampoline::Generic(Arc::new({
            let snaps = snaps.clone();
            move |event, payload| {
                if event == EventKind::AddChild {
                    if let Payload::AddChild { child, .. } = payload {
                        lock(&snaps).push(child.clone());
                    }
                }
            }
        }));
        let opts = SubscribeOptions::new("", trampoline).direct_update();
        tree.subscribe(opts);

        let snaps = lock(&snaps);
        let selected: Vec<_> = snaps.iter().filter(|s| s.selected).map(|s| s.id).collect();
        prop_assert!(selected.len() <= 1);
        if let Some(expected) = expected_selected {
            prop_assert_eq!(selected, vec![expected]);
        } else {
            prop_assert!(selected.is_empty());
        }
    }

    /// Law: materializing a scalar at a previously-void path emits exactly
    /// one `SET_DIR` per newly created ancestor, in root-to-leaf order.
    #[test]
    fn lazy_materialization_emits_one_set_dir_per_new_ancestor(depth in 1usize..6) {
        let tree = proptree_core::Tree::new(TreeConfig::default());
        let root = tree.global_root();
        let segments: Vec<String> = (0..depth).map(|i| format!("seg{i}")).collect();
        let dotted = segments.join(".");

        let leaf = tree.find(root, dotted.as_str()).expect("find leaf");
        tree.set_int(leaf, 1);

        prop_assert_eq!(tree.get_by_name(root, dotted.as_str()), Some(leaf));

        let mut cur = root;
        for seg in &segments[..segments.len() - 1] {
            let next = tree.get_by_name(cur, seg.as_str()).expect("ancestor materialized");
            cur = next;
        }
    }
}
