//! Block index entries with O(log n) ancestor skip pointers.

use std::sync::Arc;

use cairn_primitives::{FilePos, Hash256};

/// Turn the lowest set bit of `n` into a zero.
#[inline]
fn invert_lowest_one(n: u32) -> u32 {
    n & n.wrapping_sub(1)
}

/// The height the skip pointer of a block at `height` jumps back to.
///
/// Any strictly lower height would be valid; this choice keeps ancestor
/// walks short (around 110 steps across 2^18 blocks).
pub(crate) fn skip_height(height: u32) -> u32 {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// One entry of the block index: a header hash, its height, and links to
/// the parent and to a deterministic skip ancestor.
///
/// Entries are immutable once built and shared through `Arc`; the skip
/// pointer is computed at construction from the parent's chain.
#[derive(Debug)]
pub struct BlockIndex {
    hash: Hash256,
    height: u32,
    data_pos: FilePos,
    prev: Option<Arc<BlockIndex>>,
    skip: Option<Arc<BlockIndex>>,
}

impl BlockIndex {
    /// Create the genesis entry (height 0, no parent).
    pub fn genesis(hash: Hash256) -> Arc<Self> {
        Arc::new(BlockIndex {
            hash,
            height: 0,
            data_pos: FilePos::null(),
            prev: None,
            skip: None,
        })
    }

    /// Create an entry extending `prev`, computing the skip pointer.
    pub fn new(hash: Hash256, prev: Arc<BlockIndex>) -> Arc<Self> {
        Self::new_with_pos(hash, prev, FilePos::null())
    }

    /// Create an entry extending `prev`, recording where its block data
    /// lives in the flat block files.
    pub fn new_with_pos(hash: Hash256, prev: Arc<BlockIndex>, data_pos: FilePos) -> Arc<Self> {
        let height = prev.height + 1;
        let skip = prev.ancestor(skip_height(height));
        Arc::new(BlockIndex {
            hash,
            height,
            data_pos,
            prev: Some(prev),
            skip,
        })
    }

    /// The header hash.
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// The height of this entry.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Where this block's data lives in the flat block files, if recorded.
    pub fn data_pos(&self) -> FilePos {
        self.data_pos
    }

    /// The parent entry, if any.
    pub fn prev(&self) -> Option<&Arc<BlockIndex>> {
        self.prev.as_ref()
    }

    /// Walk to the ancestor at the given height, following skip pointers
    /// where they do not overshoot a cheaper parent walk.
    ///
    /// Returns `None` when `height` is above this entry.
    pub fn ancestor(self: &Arc<Self>, height: u32) -> Option<Arc<BlockIndex>> {
        if height > self.height {
            return None;
        }

        let mut walk = Arc::clone(self);
        while walk.height > height {
            let height_walk = walk.height;
            let height_skip = skip_height(height_walk);
            let height_skip_prev = skip_height(height_walk - 1);

            let take_skip = walk.skip.is_some()
                && (height_skip == height
                    || (height_skip > height
                        && !((height_skip_prev as i64) < (height_skip as i64 - 2)
                            && height_skip_prev >= height)));

            walk = if take_skip {
                Arc::clone(walk.skip.as_ref().expect("checked above"))
            } else {
                Arc::clone(walk.prev.as_ref().expect("non-genesis entry has a parent"))
            };
        }
        Some(walk)
    }
}

/// Find the last common ancestor of two block index entries.
pub fn last_common_ancestor(a: &Arc<BlockIndex>, b: &Arc<BlockIndex>) -> Option<Arc<BlockIndex>> {
    let mut a = if a.height() > b.height() {
        a.ancestor(b.height())?
    } else {
        Arc::clone(a)
    };
    let mut b = if b.height() > a.height() {
        b.ancestor(a.height())?
    } else {
        Arc::clone(b)
    };

    while !Arc::ptr_eq(&a, &b) {
        let (pa, pb) = (a.prev()?.clone(), b.prev()?.clone());
        a = pa;
        b = pb;
    }
    Some(a)
}

#[cfg(test)]
mod tests {
    use cairn_primitives::hash_u32_le;

    use super::*;

    fn build_chain(length: u32) -> Vec<Arc<BlockIndex>> {
        let mut chain = vec![BlockIndex::genesis(hash_u32_le(0))];
        for height in 1..length {
            let prev = chain.last().expect("non-empty").clone();
            chain.push(BlockIndex::new(hash_u32_le(height), prev));
        }
        chain
    }

    #[test]
    fn skip_height_is_strictly_lower() {
        for height in 2..5000u32 {
            let skip = skip_height(height);
            assert!(skip < height);
        }
        assert_eq!(skip_height(0), 0);
        assert_eq!(skip_height(1), 0);
    }

    #[test]
    fn ancestor_walks_to_every_height() {
        let chain = build_chain(300);
        let tip = chain.last().expect("non-empty");
        for height in 0..300u32 {
            let ancestor = tip.ancestor(height).expect("within range");
            assert!(Arc::ptr_eq(&ancestor, &chain[height as usize]));
        }
        assert!(tip.ancestor(300).is_none());
    }

    #[test]
    fn last_common_ancestor_of_forked_chains() {
        let chain = build_chain(20);
        let fork_point = chain[10].clone();
        let mut side = BlockIndex::new(hash_u32_le(1000), fork_point.clone());
        for i in 1001..1005u32 {
            side = BlockIndex::new(hash_u32_le(i), side);
        }

        let lca = last_common_ancestor(chain.last().expect("non-empty"), &side)
            .expect("chains share genesis");
        assert!(Arc::ptr_eq(&lca, &fork_point));
    }
}
