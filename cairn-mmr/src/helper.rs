//! Peak and height arithmetic plus the storage key layout.
//!
//! The layout algebra: with `next_index` entries inserted, the live peaks
//! are the indexes obtained by successively clearing the lowest set bit of
//! `next_index` and subtracting one, so there are `popcount(next_index)`
//! peaks, ordered tallest to shortest.

/// Key under which the next insertion index is stored (`u64` big-endian).
pub(crate) const NEXT_INDEX_KEY: &[u8] = b"I";

/// Key under which the best block hash is stored (UTXO MMR only).
pub(crate) const BEST_BLOCK_KEY: &[u8] = b"B";

/// Tag byte prefixing every entry-list key.
const ENTRIES_TAG: u8 = b'e';

/// Storage key for the entry list at an insertion index.
///
/// Format: `'e' || index_be_u64`, so entry keys iterate in index order.
pub fn entry_key(index: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = ENTRIES_TAG;
    key[1..].copy_from_slice(&index.to_be_bytes());
    key
}

/// `floor(log2(value))`; `value` must be non-zero.
fn log2_floor(value: u64) -> u32 {
    debug_assert!(value != 0);
    63 - value.leading_zeros()
}

/// Height of the peak containing insertion index `index` in an MMR with
/// `total` inserted entries. Requires `index < total`.
pub fn peak_height(index: u64, total: u64) -> u32 {
    debug_assert!(index < total);
    log2_floor(index ^ total)
}

/// Length of the entry list stored at an insertion index.
///
/// The list covers heights `0..=h(index)` where `h(index)` is the height
/// of the index within the perfect subtree it terminates.
pub fn entry_list_size(index: u64) -> usize {
    peak_height(index, index + 1) as usize + 1
}

/// Number of peaks in an MMR holding `next_index` entries.
pub(crate) fn num_peaks(next_index: u64) -> usize {
    next_index.count_ones() as usize
}
