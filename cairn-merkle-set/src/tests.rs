use cairn_primitives::{Hash256, ZERO_HASH, hash_u32_le};
use proptest::prelude::*;
use rand::{seq::SliceRandom, thread_rng};

use crate::{MerkleSet, UpdateOp};

fn inserts(hashes: &[Hash256]) -> Vec<(Hash256, UpdateOp)> {
    hashes.iter().map(|h| (*h, UpdateOp::Insert)).collect()
}

fn removes(hashes: &[Hash256]) -> Vec<(Hash256, UpdateOp)> {
    hashes.iter().map(|h| (*h, UpdateOp::Remove)).collect()
}

fn leaf_hashes(count: u32) -> Vec<Hash256> {
    (0..count).map(hash_u32_le).collect()
}

#[test]
fn thousand_leaves_roundtrip_to_empty() {
    let mut set = MerkleSet::new();
    let hashes = leaf_hashes(1000);

    let empty_root = set.root_hash();
    assert_eq!(empty_root, ZERO_HASH);

    set.update(inserts(&hashes));
    assert_eq!(set.count(), 1000);
    assert_ne!(set.root_hash(), empty_root);
    assert!(set.live_chunks() > 0);

    set.update(removes(&hashes));
    assert_eq!(set.count(), 0);
    assert_eq!(set.root_hash(), ZERO_HASH);
    assert_eq!(set.live_chunks(), 0, "all chunks must be released");
}

#[test]
fn insert_then_remove_restores_the_root() {
    let mut set = MerkleSet::new();
    let hashes = leaf_hashes(50);
    set.update(inserts(&hashes));
    let root = set.root_hash();

    let extra = hash_u32_le(9999);
    let flags = set.update(vec![(extra, UpdateOp::Insert)]);
    assert_eq!(flags, vec![true]);
    assert_ne!(set.root_hash(), root);

    let flags = set.update(vec![(extra, UpdateOp::Remove)]);
    assert_eq!(flags, vec![true]);
    assert_eq!(set.root_hash(), root);
    assert_eq!(set.count(), 50);
}

#[test]
fn duplicate_insert_is_a_noop() {
    let mut set = MerkleSet::new();
    let hash = hash_u32_le(1);

    assert_eq!(set.update(vec![(hash, UpdateOp::Insert)]), vec![true]);
    assert_eq!(set.update(vec![(hash, UpdateOp::Insert)]), vec![false]);
    assert_eq!(set.count(), 1);

    // Batched duplicates report in sorted processing order: the first
    // application changes the set, the second does not.
    let other = hash_u32_le(2);
    let flags = set.update(vec![
        (other, UpdateOp::Insert),
        (other, UpdateOp::Insert),
    ]);
    assert_eq!(flags, vec![true, false]);
    assert_eq!(set.count(), 2);
}

#[test]
fn removing_absent_hashes_reports_false() {
    let mut set = MerkleSet::new();
    let hashes = leaf_hashes(8);
    set.update(inserts(&hashes));
    let root = set.root_hash();

    let flags = set.update(vec![(hash_u32_le(555), UpdateOp::Remove)]);
    assert_eq!(flags, vec![false]);
    assert_eq!(set.root_hash(), root);
    assert_eq!(set.count(), 8);
}

#[test]
fn zero_hash_is_rejected() {
    let mut set = MerkleSet::new();
    let flags = set.update(vec![(ZERO_HASH, UpdateOp::Insert)]);
    assert_eq!(flags, vec![false]);
    assert_eq!(set.count(), 0);
}

#[test]
fn singleton_states() {
    let mut set = MerkleSet::new();
    let hash = hash_u32_le(7);

    set.update(vec![(hash, UpdateOp::Insert)]);
    assert_eq!(set.count(), 1);
    // A singleton's root is the element itself; no chunk is allocated.
    assert_eq!(set.root_hash(), hash);
    assert_eq!(set.live_chunks(), 0);
    assert!(set.has(&hash, None));
    assert!(!set.has(&hash_u32_le(8), None));

    set.update(vec![(hash, UpdateOp::Remove)]);
    assert_eq!(set.count(), 0);
    assert_eq!(set.root_hash(), ZERO_HASH);
    assert!(!set.has(&hash, None));
}

#[test]
fn growing_past_two_allocates_once() {
    let mut set = MerkleSet::new();
    let hashes = leaf_hashes(2);
    set.update(inserts(&hashes));
    assert_eq!(set.count(), 2);
    assert_eq!(set.live_chunks(), 1);

    // Dropping back to one element frees the chunk again.
    set.update(vec![(hashes[0], UpdateOp::Remove)]);
    assert_eq!(set.count(), 1);
    assert_eq!(set.root_hash(), hashes[1]);
    assert_eq!(set.live_chunks(), 0);
}

#[test]
fn has_finds_every_member() {
    let mut set = MerkleSet::new();
    let hashes = leaf_hashes(300);
    set.update(inserts(&hashes));

    for hash in &hashes {
        assert!(set.has(hash, None));
    }
    for i in 300..400u32 {
        assert!(!set.has(&hash_u32_le(i), None));
    }

    let mut proof = Vec::new();
    assert!(set.has(&hashes[17], Some(&mut proof)));
    assert!(!proof.is_empty());
    // Sibling counts along the path cover the rest of the set.
    let covered: u32 = proof.iter().map(|(count, _)| count).sum::<u32>() + 1;
    assert_eq!(covered, 300);
}

#[test]
fn mixed_batch_nets_out() {
    let mut set = MerkleSet::new();
    let keep = leaf_hashes(20);
    set.update(inserts(&keep));
    let root = set.root_hash();

    // A batch whose inserts and removes cancel leaves the root unchanged.
    let churn = (100..140u32).map(hash_u32_le).collect::<Vec<_>>();
    let mut batch = inserts(&churn);
    batch.extend(removes(&churn));
    set.update(batch);

    assert_eq!(set.count(), 20);
    assert_eq!(set.root_hash(), root);
}

#[test]
fn random_interleavings_converge() {
    let mut rng = thread_rng();
    let hashes = leaf_hashes(128);

    let mut reference = MerkleSet::new();
    reference.update(inserts(&hashes));
    let expected = reference.root_hash();

    for _ in 0..10 {
        let mut shuffled = hashes.clone();
        shuffled.shuffle(&mut rng);

        // Insert in random order, remove a random half, re-add it.
        let mut set = MerkleSet::new();
        for chunk in shuffled.chunks(13) {
            set.update(inserts(chunk));
        }
        let (out, _) = shuffled.split_at(64);
        set.update(removes(out));
        set.update(inserts(out));

        assert_eq!(set.root_hash(), expected);
        assert_eq!(set.count(), 128);
    }
}

#[test]
fn tiny_chunk_bound_still_works() {
    // Bound 80 is the smallest node size: every level crosses a chunk.
    let mut set = MerkleSet::with_chunk_bound(80).expect("valid bound");
    let hashes = leaf_hashes(64);
    set.update(inserts(&hashes));
    assert_eq!(set.count(), 64);
    for hash in &hashes {
        assert!(set.has(hash, None));
    }
    set.update(removes(&hashes));
    assert_eq!(set.root_hash(), ZERO_HASH);
    assert_eq!(set.live_chunks(), 0);
}

#[test]
fn chunk_bound_below_one_node_is_rejected() {
    assert!(MerkleSet::with_chunk_bound(79).is_err());
    assert!(MerkleSet::with_chunk_bound(0).is_err());
}

proptest! {
    #[test]
    fn root_is_insertion_order_invariant(seeds in prop::collection::btree_set(any::<u32>(), 1..60)) {
        let hashes: Vec<Hash256> = seeds.iter().map(|s| hash_u32_le(*s)).collect();

        let mut forward = MerkleSet::new();
        forward.update(inserts(&hashes));

        let mut backward = MerkleSet::new();
        for hash in hashes.iter().rev() {
            backward.update(vec![(*hash, UpdateOp::Insert)]);
        }

        prop_assert_eq!(forward.root_hash(), backward.root_hash());
        prop_assert_eq!(forward.count(), hashes.len() as u32);
    }

    #[test]
    fn remove_undoes_insert(seeds in prop::collection::btree_set(any::<u32>(), 2..40)) {
        let hashes: Vec<Hash256> = seeds.iter().map(|s| hash_u32_le(*s)).collect();
        let (base, churn) = hashes.split_at(hashes.len() / 2);

        let mut set = MerkleSet::new();
        set.update(inserts(base));
        let root = set.root_hash();

        set.update(inserts(churn));
        set.update(removes(churn));

        prop_assert_eq!(set.root_hash(), root);
    }
}
