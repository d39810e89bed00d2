//! Shared primitive types for the cairn accumulator crates.
//!
//! This crate holds the 32-byte hash type used by every accumulator, the
//! block/transaction/coin collaborator types fed into them by the node, and
//! the script data-push parser used by the block filters. It deliberately
//! contains no consensus or codec logic: transaction ids, serialized sizes,
//! and file positions are supplied by the external codec and storage layers.

mod block;
mod coin;
pub mod script;

pub use block::{Block, OutPoint, Transaction, TxIn, TxOut};
pub use coin::{BlockSource, BlockUndo, Coin, CoinsView, FilePos, TxUndo, coin_leaf_hash};

/// A 32-byte hash. Ordering is lexicographic over the bytes.
pub type Hash256 = [u8; 32];

/// The all-zero hash, used as the null/empty sentinel throughout.
pub const ZERO_HASH: Hash256 = [0u8; 32];

/// Hash a byte slice with the build-time hash function (Blake3).
pub fn hash_bytes(data: &[u8]) -> Hash256 {
    *blake3::hash(data).as_bytes()
}

/// Hash the little-endian encoding of a `u32`.
///
/// Test vectors across the workspace derive their leaves this way.
pub fn hash_u32_le(value: u32) -> Hash256 {
    hash_bytes(&value.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_u32_le_matches_manual_hash() {
        assert_eq!(hash_u32_le(7), hash_bytes(&7u32.to_le_bytes()));
        assert_ne!(hash_u32_le(7), hash_u32_le(8));
    }

    #[test]
    fn zero_hash_is_all_zero() {
        assert!(ZERO_HASH.iter().all(|b| *b == 0));
    }
}
