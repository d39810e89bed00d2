//! Node geometry: views into chunk memory.
//!
//! A node of size `s` is laid out as two 36-byte slots followed by two
//! child regions of `(s - 72) / 2` bytes each. When the child region is
//! exactly 4 bytes it is a chunk reference instead of an inline node:
//! zero for no child, otherwise `chunk_id + 1`.

use cairn_primitives::Hash256;

use crate::arena::ChunkId;

pub(crate) const HASH_SIZE: usize = 32;
pub(crate) const SLOT_SIZE: usize = 4 + HASH_SIZE;
pub(crate) const CHUNK_REF_SIZE: usize = 4;

/// Location of a `(count, hash)` slot: either the set's root summary or a
/// 36-byte region inside a chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotRef {
    Root,
    Chunk { chunk: ChunkId, offset: usize },
}

/// What owns the chunk a node sits at the top of, if any. Clearing such a
/// node frees its chunk and nulls the owning reference.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChunkOwner {
    /// The node is embedded inside its parent's chunk.
    None,
    /// The node is the root node; the set's root pointer owns its chunk.
    Root,
    /// A 4-byte reference field inside another chunk owns it.
    Field { chunk: ChunkId, offset: usize },
}

/// A view of one node inside the trie.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeRef {
    /// Where this node's summary slot lives (in the parent).
    pub parent: SlotRef,
    /// Which child of its parent this node is.
    pub bit: bool,
    /// Ownership of the chunk this node heads, if it heads one.
    pub owner: ChunkOwner,
    pub chunk: ChunkId,
    pub offset: usize,
    pub size: usize,
}

impl NodeRef {
    /// The node filling an entire chunk.
    pub fn chunk_top(
        chunk: ChunkId,
        chunk_size: usize,
        parent: SlotRef,
        bit: bool,
        owner: ChunkOwner,
    ) -> Self {
        NodeRef {
            parent,
            bit,
            owner,
            chunk,
            offset: 0,
            size: chunk_size,
        }
    }

    pub fn child_size(&self) -> usize {
        (self.size - 2 * SLOT_SIZE) / 2
    }

    pub fn left_slot(&self) -> SlotRef {
        SlotRef::Chunk {
            chunk: self.chunk,
            offset: self.offset,
        }
    }

    pub fn right_slot(&self) -> SlotRef {
        SlotRef::Chunk {
            chunk: self.chunk,
            offset: self.offset + SLOT_SIZE,
        }
    }

    pub fn left_child(&self) -> NodeRef {
        NodeRef {
            parent: self.left_slot(),
            bit: false,
            owner: ChunkOwner::None,
            chunk: self.chunk,
            offset: self.offset + 2 * SLOT_SIZE,
            size: self.child_size(),
        }
    }

    pub fn right_child(&self) -> NodeRef {
        NodeRef {
            parent: self.right_slot(),
            bit: true,
            owner: ChunkOwner::None,
            chunk: self.chunk,
            offset: self.offset + 2 * SLOT_SIZE + self.child_size(),
            size: self.child_size(),
        }
    }
}

/// Bit `index` of a hash, most significant bit of the first byte first.
#[inline]
pub(crate) fn hash_bit(hash: &Hash256, index: usize) -> bool {
    (hash[index / 8] >> (7 - (index % 8))) & 1 == 1
}
