use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use proptree_core::{Courier, CourierConfig, SubscribeOptions, Trampoline, Tree, TreeConfig};

/// Builds a tree with `count` int-valued leaves under the root, each with
/// one subscription routed through a shared waitable courier.
fn build_tree(count: usize) -> (Arc<Tree>, Arc<Courier>, Vec<proptree_core::NodeId>) {
    let tree = Tree::new(TreeConfig::default());
    let courier = Courier::create_waitable(&tree, CourierConfig::default());
    let root = tree.global_root();
    let mut leaves = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("leaf{i}");
        let leaf = tree.create(root, Some(name.as_str())).expect("create leaf");
        let opts = SubscribeOptions::new(name.as_str(), Trampoline::Int(Arc::new(|_e, _v| {})))
            .courier(courier.clone())
            .no_initial_update();
        tree.subscribe(opts);
        leaves.push(leaf);
    }
    (tree, courier, leaves)
}

fn bench_courier_enqueue_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("courier enqueue+drain");

    for size in [1usize, 10, 100, 1000] {
        let (tree, courier, leaves) = build_tree(size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for (i, &leaf) in leaves.iter().enumerate() {
                    tree.set_int(leaf, i as i64);
                }
                while courier.poll() {}
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_courier_enqueue_and_drain);
criterion_main!(benches);
