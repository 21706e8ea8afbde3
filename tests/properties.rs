//! Property tests for the two block-level primitives: the packed allocator
//! (segments stay contiguous, aligned, and content-preserving under any
//! allocate/resize/free sequence) and the sum tree (rank and search always
//! agree with a linear scan).

use pactree::alloc::{PackedAllocatorMut, KIND_PAYLOAD};
use pactree::config::BLOCK_SIZE;
use pactree::sumtree::{SumTreeMut, SUMTREE_SLOTS};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum AllocOp {
    Resize { slot: usize, len: usize },
    Free { slot: usize },
}

fn alloc_ops(slots: usize) -> impl Strategy<Value = Vec<AllocOp>> {
    let op = prop_oneof![
        4 => (0..slots, 0usize..600).prop_map(|(slot, len)| AllocOp::Resize { slot, len }),
        1 => (0..slots).prop_map(|slot| AllocOp::Free { slot }),
    ];
    prop::collection::vec(op, 1..60)
}

proptest! {
    #[test]
    fn allocator_preserves_other_segments(ops in alloc_ops(6)) {
        let slots = 6;
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut alloc = PackedAllocatorMut::init(&mut block, slots).unwrap();
        let mut model: Vec<Vec<u8>> = vec![Vec::new(); slots];

        for slot in 0..slots {
            alloc.allocate(slot, KIND_PAYLOAD, 0).unwrap();
        }

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                AllocOp::Resize { slot, len } => {
                    let old = model[slot].clone();
                    match alloc.resize(slot, len) {
                        Ok(()) => {
                            // Kept prefix survives, grown bytes are zero.
                            let mut expected = old;
                            expected.truncate(len);
                            expected.resize(len, 0);
                            // Stamp a recognizable pattern over the segment.
                            let bytes = alloc.bytes_mut(slot).unwrap();
                            prop_assert_eq!(&bytes[..len], &expected[..]);
                            for (j, b) in bytes.iter_mut().enumerate() {
                                *b = (slot * 41 + step + j) as u8;
                            }
                            model[slot] = alloc.bytes(slot).unwrap().to_vec();
                        }
                        Err(_) => {
                            // Full block: the segment must be untouched.
                            prop_assert_eq!(alloc.bytes(slot).unwrap(), &model[slot][..]);
                        }
                    }
                }
                AllocOp::Free { slot } => {
                    alloc.free(slot).unwrap();
                    alloc.allocate(slot, KIND_PAYLOAD, 0).unwrap();
                    model[slot].clear();
                }
            }

            alloc.validate().unwrap();
            for (other, content) in model.iter().enumerate() {
                prop_assert_eq!(
                    alloc.bytes(other).unwrap(),
                    &content[..],
                    "slot {} after step {}",
                    other,
                    step
                );
            }
        }
    }

    #[test]
    fn sumtree_rank_matches_prefix_scan(
        values in prop::collection::vec(-100i64..100, 0..300),
        branching in prop::sample::select(vec![2u16, 3, 4, 8, 32]),
    ) {
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut alloc = PackedAllocatorMut::init(&mut block, SUMTREE_SLOTS).unwrap();
        let mut tree = SumTreeMut::init(&mut alloc, 0, branching).unwrap();
        tree.insert_space(0, values.len()).unwrap();
        for (i, &v) in values.iter().enumerate() {
            tree.set_value(i, v).unwrap();
        }
        tree.reindex().unwrap();

        prop_assert_eq!(tree.reader().verify(|_| {}).unwrap(), 0);

        let mut prefix = 0i64;
        for i in 0..=values.len() {
            prop_assert_eq!(tree.rank(i).unwrap(), prefix, "rank({})", i);
            if i < values.len() {
                prefix += values[i];
            }
        }
    }

    #[test]
    fn sumtree_searches_match_linear_scan(
        values in prop::collection::vec(0i64..50, 0..300),
        branching in prop::sample::select(vec![2u16, 4, 32]),
        targets in prop::collection::vec(-10i64..2000, 1..20),
    ) {
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut alloc = PackedAllocatorMut::init(&mut block, SUMTREE_SLOTS).unwrap();
        let mut tree = SumTreeMut::init(&mut alloc, 0, branching).unwrap();
        tree.insert_space(0, values.len()).unwrap();
        for (i, &v) in values.iter().enumerate() {
            tree.set_value(i, v).unwrap();
        }
        tree.reindex().unwrap();

        let n = values.len();
        for target in targets {
            let mut running = 0i64;
            let mut expect_ge = n;
            let mut expect_gt = n;
            for (i, &v) in values.iter().enumerate() {
                running += v;
                if expect_ge == n && running >= target {
                    expect_ge = i;
                }
                if expect_gt == n && running > target {
                    expect_gt = i;
                }
            }

            let ge = tree.find_ge(target).unwrap();
            prop_assert_eq!(ge.idx, expect_ge, "find_ge({})", target);
            let gt = tree.find_gt(target).unwrap();
            prop_assert_eq!(gt.idx, expect_gt, "find_gt({})", target);

            // Backward searches are exact complements of the forward pair.
            match tree.find_le(target).unwrap() {
                Some(hit) => prop_assert_eq!(hit.idx, expect_gt - 1),
                None => prop_assert_eq!(expect_gt, 0),
            }
            match tree.find_lt(target).unwrap() {
                Some(hit) => prop_assert_eq!(hit.idx, expect_ge - 1),
                None => prop_assert_eq!(expect_ge, 0),
            }
        }
    }
}
