//! Snapshot isolation across write generations: blocks reachable from an
//! older root are never mutated, clone traffic is exactly one block per
//! path level, and released snapshots give their blocks back.

use pactree::{
    check_tree, release_tree, BlockId, BlockStore, ContainerId, LeafListProvider, LeafNodeMut,
    MemStore, Node, Severity, Tree,
};

const CTR: ContainerId = ContainerId(1);

/// Formats `leaf_count` leaves of `per_leaf` consecutive unit-weight
/// entries each.
fn make_leaves(store: &mut MemStore, leaf_count: usize, per_leaf: usize) -> Vec<BlockId> {
    let mut out = Vec::with_capacity(leaf_count);
    let mut payload = 0u64;
    for _ in 0..leaf_count {
        let id = store.create_block().unwrap();
        let block = store.block_mut(id).unwrap();
        let mut leaf = LeafNodeMut::init(block, 32).unwrap();
        for at in 0..per_leaf {
            leaf.insert_entry(at, payload, 1).unwrap();
            payload += 1;
        }
        out.push(id);
    }
    out
}

/// Builds a three-level tree (leaf, branch, root) in generation 1.
fn build_three_level(store: &mut MemStore) -> BlockId {
    // 300 leaves exceed one branch node's fanout, forcing two branch
    // levels above the leaves.
    let leaves = make_leaves(store, 300, 10);
    {
        let mut tree = Tree::create(store, CTR, 32).unwrap();
        tree.bulk_load(&mut LeafListProvider::new(leaves)).unwrap();
        assert_eq!(tree.len().unwrap(), 3000);
    }
    let root = store.get_root(CTR).unwrap().unwrap();
    let node = Node::from_block(store.block(root).unwrap()).unwrap();
    assert_eq!(node.level().unwrap(), 2, "scenario needs a three-level tree");
    root
}

fn assert_clean(store: &MemStore, root: BlockId) {
    let mut findings = Vec::new();
    let mut consumer = |severity: Severity, message: &str| {
        findings.push(format!("{severity:?}: {message}"));
    };
    assert_eq!(check_tree(store, root, &mut consumer).unwrap(), 0, "{findings:?}");
}

fn count_reachable(store: &MemStore, root: BlockId) -> usize {
    let mut total = 1;
    if let Node::Branch(branch) = Node::from_block(store.block(root).unwrap()).unwrap() {
        for i in 0..branch.child_count().unwrap() {
            total += count_reachable(store, branch.child_id(i).unwrap());
        }
    }
    total
}

#[test]
fn mutation_clones_one_block_per_level() {
    let mut store = MemStore::new();
    let old_root = build_three_level(&mut store);

    // Hold the snapshot: one extra reference on its root.
    store.ref_block(old_root).unwrap();
    store.begin_generation();

    let stats = store.stats();
    stats.reset();

    {
        let mut tree = Tree::open(&mut store, CTR).unwrap();
        tree.insert(0, 999_999, 7).unwrap();
        assert_eq!(tree.len().unwrap(), 3001);
    }

    let s = stats.get();
    assert_eq!(s.cloned, 3, "one clone per path level");
    assert_eq!(s.unrefs, 3, "one displaced block per path level");
    assert_eq!(s.created, 0, "no split, no fresh blocks");
    assert_eq!(s.removed, 0, "the snapshot keeps every old block alive");

    // The same path is mutable now; further writes clone nothing.
    {
        let mut tree = Tree::open(&mut store, CTR).unwrap();
        tree.insert(1, 999_998, 1).unwrap();
    }
    assert_eq!(stats.get().cloned, 3);
}

#[test]
fn old_root_stays_byte_identical() {
    let mut store = MemStore::new();
    let old_root = build_three_level(&mut store);
    store.ref_block(old_root).unwrap();
    let old_bytes = store.block(old_root).unwrap().to_vec();

    store.begin_generation();
    {
        let mut tree = Tree::open(&mut store, CTR).unwrap();
        for i in 0..50 {
            tree.insert(i * 3, 500_000 + i, 2).unwrap();
        }
        tree.remove(10).unwrap();
    }

    assert_eq!(store.block(old_root).unwrap(), &old_bytes[..]);

    // Both generations are fully consistent trees.
    assert_clean(&store, old_root);
    let new_root = store.get_root(CTR).unwrap().unwrap();
    assert_ne!(new_root, old_root);
    assert_clean(&store, new_root);

    // The snapshot still reads its own entry count.
    let acc = Node::from_block(store.block(old_root).unwrap())
        .unwrap()
        .accumulate()
        .unwrap();
    assert_eq!(acc.count(), 3000);
    let new_acc = Node::from_block(store.block(new_root).unwrap())
        .unwrap()
        .accumulate()
        .unwrap();
    assert_eq!(new_acc.count(), 3049);
}

#[test]
fn releasing_the_snapshot_reclaims_its_blocks() {
    let mut store = MemStore::new();
    let old_root = build_three_level(&mut store);
    store.ref_block(old_root).unwrap();
    store.begin_generation();

    {
        let mut tree = Tree::open(&mut store, CTR).unwrap();
        tree.insert(1500, 42, 1).unwrap();
    }

    let new_root = store.get_root(CTR).unwrap().unwrap();
    // Displaced path blocks (leaf, branch, root) survive under the
    // snapshot reference.
    assert_eq!(
        store.block_count(),
        count_reachable(&store, new_root) + 3
    );

    release_tree(&mut store, old_root).unwrap();

    // Shared subtrees survive; only the three displaced blocks go.
    assert_eq!(store.block_count(), count_reachable(&store, new_root));
    assert!(!store.contains_block(old_root));
    assert_clean(&store, new_root);
}

#[test]
fn abandoned_generation_without_snapshot_leaks_nothing() {
    let mut store = MemStore::new();
    build_three_level(&mut store);

    for round in 0..5 {
        store.begin_generation();
        let mut tree = Tree::open(&mut store, CTR).unwrap();
        for i in 0..20 {
            tree.insert((round * 20 + i) as u64, i as u64, 1).unwrap();
        }
    }

    let root = store.get_root(CTR).unwrap().unwrap();
    assert_eq!(store.block_count(), count_reachable(&store, root));
    assert_clean(&store, root);
}
