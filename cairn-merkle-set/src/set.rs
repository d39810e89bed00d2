//! The merkle set and its batched update machinery.

use cairn_primitives::{Hash256, ZERO_HASH, hash_bytes};

use crate::{
    Error, Result,
    arena::{Arena, ChunkId},
    node::{CHUNK_REF_SIZE, ChunkOwner, NodeRef, SLOT_SIZE, SlotRef, hash_bit},
};

/// Default upper bound on the chunk size in bytes.
const DEFAULT_CHUNK_BOUND: usize = 1520;

/// One batched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// Add the hash to the set.
    Insert,
    /// Remove the hash from the set.
    Remove,
}

/// An authenticated set of 32-byte hashes.
///
/// The root hash is the all-zero hash for an empty set, the element itself
/// for a singleton, and the hash of the root node's slot region otherwise.
/// The all-zero hash is rejected as an element; it is the empty-slot
/// sentinel.
pub struct MerkleSet {
    count: u32,
    root_hash: Hash256,
    root_chunk: Option<ChunkId>,
    chunk_size: usize,
    arena: Arena,
}

impl Default for MerkleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleSet {
    /// Create a set with the default chunk bound.
    pub fn new() -> Self {
        Self::with_chunk_bound(DEFAULT_CHUNK_BOUND).expect("default bound holds a node")
    }

    /// Create a set whose chunks are the largest node size not exceeding
    /// `bound`.
    ///
    /// Node sizes follow the recurrence `4, 80, 232, 536, 1144, ...`
    /// (each level adds two slots around two copies of the previous
    /// level), so the bound must admit at least one real node.
    pub fn with_chunk_bound(bound: usize) -> Result<Self> {
        let mut chunk_size = CHUNK_REF_SIZE;
        let mut next = (SLOT_SIZE + chunk_size) * 2;
        while next <= bound {
            chunk_size = next;
            next = (SLOT_SIZE + chunk_size) * 2;
        }
        if chunk_size <= CHUNK_REF_SIZE {
            return Err(Error::InvalidChunkBound(bound));
        }
        Ok(MerkleSet {
            count: 0,
            root_hash: ZERO_HASH,
            root_chunk: None,
            chunk_size,
            arena: Arena::new(chunk_size),
        })
    }

    /// Number of elements in the set.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The current root hash.
    pub fn root_hash(&self) -> Hash256 {
        self.root_hash
    }

    #[cfg(test)]
    pub(crate) fn live_chunks(&self) -> usize {
        self.arena.live()
    }

    /// Apply a batch of inserts and removes.
    ///
    /// Operations are stably sorted by hash (preserving the relative order
    /// of operations on the same hash) and applied in one walk of the
    /// trie. Returns one flag per operation, in the sorted processing
    /// order, indicating whether it changed the set. The all-zero hash is
    /// never applied and reports `false`.
    pub fn update(&mut self, mut updates: Vec<(Hash256, UpdateOp)>) -> Vec<bool> {
        let mut stack: Vec<NodeRef> = Vec::new();
        let mut result = Vec::with_capacity(updates.len());

        updates.sort_by(|a, b| a.0.cmp(&b.0));

        for (hash, op) in updates {
            if hash == ZERO_HASH {
                result.push(false);
                continue;
            }

            let modified = match op {
                UpdateOp::Insert => {
                    if !stack.is_empty() {
                        self.advance_position(&mut stack, &hash);
                        self.add_hash_single(&mut stack, &hash)
                    } else {
                        match self.count {
                            0 => {
                                self.count = 1;
                                self.root_hash = hash;
                                true
                            }
                            1 => {
                                if self.root_hash == hash {
                                    false
                                } else {
                                    debug_assert!(self.root_chunk.is_none());
                                    let chunk = self.arena.allocate();
                                    self.root_chunk = Some(chunk);
                                    stack.push(self.root_node(chunk));

                                    let existing = self.root_hash;
                                    let (first, second) = if hash < existing {
                                        (hash, existing)
                                    } else {
                                        (existing, hash)
                                    };
                                    self.add_hash_pair(&mut stack, &first, &second);
                                    true
                                }
                            }
                            _ => {
                                let chunk = self.root_chunk.expect("chunk exists for count >= 2");
                                stack.push(self.root_node(chunk));
                                self.advance_position(&mut stack, &hash);
                                self.add_hash_single(&mut stack, &hash)
                            }
                        }
                    }
                }
                UpdateOp::Remove => {
                    if !stack.is_empty() {
                        self.advance_position(&mut stack, &hash);
                        self.remove_hash(&mut stack, &hash)
                    } else {
                        match self.count {
                            0 => false,
                            1 => {
                                if self.root_hash == hash {
                                    self.count = 0;
                                    self.root_hash = ZERO_HASH;
                                    true
                                } else {
                                    false
                                }
                            }
                            _ => {
                                let chunk = self.root_chunk.expect("chunk exists for count >= 2");
                                stack.push(self.root_node(chunk));
                                self.advance_position(&mut stack, &hash);
                                self.remove_hash(&mut stack, &hash)
                            }
                        }
                    }
                }
            };
            result.push(modified);
        }

        // Unwind the remaining frames, hashing each into its parent slot.
        while let Some(node) = stack.pop() {
            self.update_node_parent(&node);
        }

        result
    }

    /// Whether `hash` is in the set.
    ///
    /// When `proof` is given, it collects the sibling `(count, hash)`
    /// summary consumed at each step of the descent, deepest last. Together
    /// with the queried element that is enough to recompute the root.
    pub fn has(&self, hash: &Hash256, mut proof: Option<&mut Vec<(u32, Hash256)>>) -> bool {
        match self.count {
            0 => false,
            1 => self.root_hash == *hash,
            _ => {
                let Some(chunk) = self.root_chunk else {
                    return false;
                };
                let mut node = self.root_node(chunk);
                let mut depth = 0;
                loop {
                    let left = node.left_slot();
                    let right = node.right_slot();

                    // A terminal node holds its pair sorted by value, not
                    // by position.
                    if self.slot_count(left) == 1 && self.slot_count(right) == 1 {
                        let (lh, rh) = (self.slot_hash(left), self.slot_hash(right));
                        let found = lh == *hash || rh == *hash;
                        if let Some(out) = proof.as_mut() {
                            let other = if lh == *hash { rh } else { lh };
                            out.push((1, other));
                        }
                        return found;
                    }

                    let bit = hash_bit(hash, depth);
                    let (slot, other, child) = if !bit {
                        (left, right, node.left_child())
                    } else {
                        (right, left, node.right_child())
                    };
                    if let Some(out) = proof.as_mut() {
                        out.push((self.slot_count(other), self.slot_hash(other)));
                    }

                    match self.slot_count(slot) {
                        0 => return false,
                        1 => return self.slot_hash(slot) == *hash,
                        _ => match self.descend(child) {
                            Some(next) => {
                                node = next;
                                depth += 1;
                            }
                            None => return false,
                        },
                    }
                }
            }
        }
    }

    // ── Node and slot access ────────────────────────────────────────────

    fn root_node(&self, chunk: ChunkId) -> NodeRef {
        NodeRef::chunk_top(chunk, self.chunk_size, SlotRef::Root, false, ChunkOwner::Root)
    }

    fn slot_count(&self, slot: SlotRef) -> u32 {
        match slot {
            SlotRef::Root => self.count,
            SlotRef::Chunk { chunk, offset } => {
                let bytes = self.arena.bytes(chunk);
                u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
            }
        }
    }

    fn slot_hash(&self, slot: SlotRef) -> Hash256 {
        match slot {
            SlotRef::Root => self.root_hash,
            SlotRef::Chunk { chunk, offset } => {
                let bytes = self.arena.bytes(chunk);
                let mut hash = ZERO_HASH;
                hash.copy_from_slice(&bytes[offset + 4..offset + SLOT_SIZE]);
                hash
            }
        }
    }

    fn set_slot(&mut self, slot: SlotRef, count: u32, hash: &Hash256) {
        match slot {
            SlotRef::Root => {
                self.count = count;
                self.root_hash = *hash;
            }
            SlotRef::Chunk { chunk, offset } => {
                let bytes = self.arena.bytes_mut(chunk);
                bytes[offset..offset + 4].copy_from_slice(&count.to_le_bytes());
                bytes[offset + 4..offset + SLOT_SIZE].copy_from_slice(hash);
            }
        }
    }

    fn clear_slot(&mut self, slot: SlotRef) {
        self.set_slot(slot, 0, &ZERO_HASH);
    }

    fn is_terminal(&self, node: &NodeRef) -> bool {
        self.slot_count(node.left_slot()) == 1 && self.slot_count(node.right_slot()) == 1
    }

    fn read_chunk_ref(&self, chunk: ChunkId, offset: usize) -> Option<ChunkId> {
        let bytes = self.arena.bytes(chunk);
        let raw = u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"));
        raw.checked_sub(1)
    }

    fn write_chunk_ref(&mut self, chunk: ChunkId, offset: usize, target: Option<ChunkId>) {
        let raw = target.map_or(0, |id| id + 1);
        self.arena.bytes_mut(chunk)[offset..offset + 4].copy_from_slice(&raw.to_le_bytes());
    }

    // Resolve a child region to a node without allocating; `None` when the
    // region is an unallocated chunk reference.
    fn descend(&self, child: NodeRef) -> Option<NodeRef> {
        if child.size != CHUNK_REF_SIZE {
            return Some(child);
        }
        let target = self.read_chunk_ref(child.chunk, child.offset)?;
        Some(NodeRef::chunk_top(
            target,
            self.chunk_size,
            child.parent,
            child.bit,
            ChunkOwner::Field {
                chunk: child.chunk,
                offset: child.offset,
            },
        ))
    }

    // Push a child onto the stack, crossing (and if needed allocating) a
    // chunk boundary.
    fn push_node(&mut self, stack: &mut Vec<NodeRef>, node: NodeRef) {
        if node.size != CHUNK_REF_SIZE {
            stack.push(node);
            return;
        }
        let target = match self.read_chunk_ref(node.chunk, node.offset) {
            Some(existing) => existing,
            None => {
                let fresh = self.arena.allocate();
                self.write_chunk_ref(node.chunk, node.offset, Some(fresh));
                fresh
            }
        };
        stack.push(NodeRef::chunk_top(
            target,
            self.chunk_size,
            node.parent,
            node.bit,
            ChunkOwner::Field {
                chunk: node.chunk,
                offset: node.offset,
            },
        ));
    }

    // Pop the top node, releasing its storage: a chunk-top node frees its
    // chunk and nulls the owning reference, an inline node clears its
    // slots.
    fn clear_node(&mut self, stack: &mut Vec<NodeRef>) {
        let node = stack.pop().expect("clear_node on empty stack");
        match node.owner {
            ChunkOwner::Field { chunk, offset } => {
                self.arena.free(node.chunk);
                self.write_chunk_ref(chunk, offset, None);
            }
            ChunkOwner::Root => {
                self.arena.free(node.chunk);
                self.root_chunk = None;
            }
            ChunkOwner::None => {
                self.clear_slot(node.left_slot());
                self.clear_slot(node.right_slot());
            }
        }
    }

    // Summarize a node into its parent slot.
    fn update_node_parent(&mut self, node: &NodeRef) {
        let count =
            self.slot_count(node.left_slot()) + self.slot_count(node.right_slot());
        let hash = {
            let bytes = self.arena.bytes(node.chunk);
            hash_bytes(&bytes[node.offset..node.offset + 2 * SLOT_SIZE])
        };
        self.set_slot(node.parent, count, &hash);
    }

    // ── Update machinery ────────────────────────────────────────────────

    // Rewind the stack to the deepest ancestor shared with the next
    // position, hashing each popped frame into its parent.
    fn advance_position(&mut self, stack: &mut Vec<NodeRef>, next_position: &Hash256) {
        let mut prefix = 0;
        while prefix + 1 < stack.len() && stack[prefix + 1].bit == hash_bit(next_position, prefix) {
            prefix += 1;
        }
        while prefix < stack.len() - 1 {
            let node = stack.pop().expect("stack is non-empty");
            self.update_node_parent(&node);
        }
    }

    fn add_hash_single(&mut self, stack: &mut Vec<NodeRef>, insert_hash: &Hash256) -> bool {
        loop {
            let node = *stack.last().expect("stack is non-empty");
            let depth = stack.len() - 1;

            let (slot, other_slot, child) = if !hash_bit(insert_hash, depth) {
                (node.left_slot(), node.right_slot(), node.left_child())
            } else {
                (node.right_slot(), node.left_slot(), node.right_child())
            };

            match self.slot_count(slot) {
                0 => {
                    match self.slot_count(other_slot) {
                        0 => unreachable!("node has two empty children"),
                        1 => unreachable!("node has one empty child and one terminal"),
                        _ => {
                            self.set_slot(slot, 1, insert_hash);
                            return true;
                        }
                    }
                }
                1 => {
                    if self.slot_hash(slot) == *insert_hash {
                        return false;
                    }
                    match self.slot_count(other_slot) {
                        0 => unreachable!("node has one empty child and one terminal"),
                        1 => {
                            if self.slot_hash(other_slot) == *insert_hash {
                                return false;
                            }
                            // Split the terminal pair into a sorted triple.
                            let left_hash = self.slot_hash(node.left_slot());
                            let right_hash = self.slot_hash(node.right_slot());
                            self.clear_slot(node.left_slot());
                            self.clear_slot(node.right_slot());

                            let mut first = left_hash;
                            let mut second = *insert_hash;
                            let mut third = right_hash;
                            if first > second {
                                std::mem::swap(&mut first, &mut second);
                            }
                            if third < second {
                                std::mem::swap(&mut second, &mut third);
                            }
                            self.add_hash_triple(stack, &first, &second, &third);
                            return true;
                        }
                        _ => {
                            // The lone leaf joins the new element one level
                            // down as a terminal pair.
                            let existing = self.slot_hash(slot);
                            self.push_node(stack, child);
                            let (first, second) = if existing < *insert_hash {
                                (existing, *insert_hash)
                            } else {
                                (*insert_hash, existing)
                            };
                            self.add_hash_pair(stack, &first, &second);
                            return true;
                        }
                    }
                }
                _ => {
                    self.push_node(stack, child);
                }
            }
        }
    }

    // Write a sorted pair into an empty node, making it terminal.
    fn add_hash_pair(&mut self, stack: &mut [NodeRef], first: &Hash256, second: &Hash256) {
        let node = *stack.last().expect("stack is non-empty");
        debug_assert_eq!(self.slot_count(node.left_slot()), 0);
        debug_assert_eq!(self.slot_count(node.right_slot()), 0);
        debug_assert!(first < second);
        self.set_slot(node.left_slot(), 1, first);
        self.set_slot(node.right_slot(), 1, second);
    }

    // Place three sorted hashes under an empty node, descending while all
    // three agree on the next bit.
    fn add_hash_triple(
        &mut self,
        stack: &mut Vec<NodeRef>,
        first: &Hash256,
        second: &Hash256,
        third: &Hash256,
    ) {
        let node = *stack.last().expect("stack is non-empty");
        let depth = stack.len() - 1;
        debug_assert_eq!(self.slot_count(node.left_slot()), 0);
        debug_assert_eq!(self.slot_count(node.right_slot()), 0);

        let bits = (
            hash_bit(first, depth),
            hash_bit(second, depth),
            hash_bit(third, depth),
        );
        match bits {
            (false, false, false) => {
                self.push_node(stack, node.left_child());
                self.add_hash_triple(stack, first, second, third);
            }
            (true, true, true) => {
                self.push_node(stack, node.right_child());
                self.add_hash_triple(stack, first, second, third);
            }
            (false, false, true) => {
                self.push_node(stack, node.left_child());
                self.add_hash_pair(stack, first, second);
                self.set_slot(node.right_slot(), 1, third);
            }
            (false, true, true) => {
                self.push_node(stack, node.right_child());
                self.add_hash_pair(stack, second, third);
                self.set_slot(node.left_slot(), 1, first);
            }
            _ => unreachable!("triple is not sorted"),
        }
    }

    fn remove_hash(&mut self, stack: &mut Vec<NodeRef>, remove_hash: &Hash256) -> bool {
        loop {
            let node = *stack.last().expect("stack is non-empty");
            let depth = stack.len() - 1;

            let (slot, other_slot, child, other_child) = if !hash_bit(remove_hash, depth) {
                (
                    node.left_slot(),
                    node.right_slot(),
                    node.left_child(),
                    node.right_child(),
                )
            } else {
                (
                    node.right_slot(),
                    node.left_slot(),
                    node.right_child(),
                    node.left_child(),
                )
            };

            match self.slot_count(slot) {
                0 => return false,
                1 => {
                    return match self.slot_count(other_slot) {
                        0 => unreachable!("node has one empty child and one terminal"),
                        1 => {
                            // Terminal pair: either slot may hold the hash.
                            let slot_hash = self.slot_hash(slot);
                            let other_hash = self.slot_hash(other_slot);
                            if slot_hash == *remove_hash {
                                self.set_slot(node.parent, 1, &other_hash);
                            } else if other_hash == *remove_hash {
                                self.set_slot(node.parent, 1, &slot_hash);
                            } else {
                                return false;
                            }

                            self.clear_node(stack);
                            if let Some(top) = stack.last().copied() {
                                if self.is_terminal(&top) {
                                    self.roll_up_terminal_node(stack);
                                }
                            }
                            true
                        }
                        _ => {
                            if self.slot_hash(slot) != *remove_hash {
                                return false;
                            }
                            self.clear_slot(slot);

                            // The surviving subtree may now be a terminal
                            // pair with an empty sibling; pull it up.
                            self.push_node(stack, other_child);
                            let top = *stack.last().expect("just pushed");
                            if self.is_terminal(&top) {
                                self.roll_up_terminal_node(stack);
                            } else {
                                stack.pop();
                            }
                            true
                        }
                    };
                }
                _ => {
                    self.push_node(stack, child);
                }
            }
        }
    }

    // Migrate a terminal pair up to the deepest ancestor whose sibling is
    // empty, freeing everything below it.
    fn roll_up_terminal_node(&mut self, stack: &mut Vec<NodeRef>) {
        let mut moved = false;
        let mut left_hash = ZERO_HASH;
        let mut right_hash = ZERO_HASH;

        while stack.len() >= 2 {
            let node = *stack.last().expect("stack is non-empty");
            let parent = stack[stack.len() - 2];
            let parent_other_slot = if node.bit {
                parent.left_slot()
            } else {
                parent.right_slot()
            };
            if self.slot_count(parent_other_slot) != 0 {
                break;
            }

            if !moved {
                left_hash = self.slot_hash(node.left_slot());
                right_hash = self.slot_hash(node.right_slot());
                moved = true;
            }
            self.clear_node(stack);
        }

        if !moved {
            return;
        }
        let node = *stack.last().expect("roll-up stops at the root node");
        self.set_slot(node.left_slot(), 1, &left_hash);
        self.set_slot(node.right_slot(), 1, &right_hash);
    }
}
