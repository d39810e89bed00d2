//! Coin, undo, and data-source collaborator types.

use std::sync::Arc;

use crate::{Block, Hash256, OutPoint, TxOut, hash_bytes};

/// An unspent transaction output together with its accumulator binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// The output itself.
    pub output: TxOut,
    /// Height of the block that created the output.
    pub height: u32,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
    /// Insertion index of this coin in the UTXO MMR.
    pub index: u64,
}

/// Compute the accumulator leaf hash of a coin binding.
///
/// The encoding is canonical and fixed:
/// `txid || vout_le_u32 || value_le_u64 || script_len_le_u32 || script ||
/// height_le_u32 || coinbase_u8`.
pub fn coin_leaf_hash(outpoint: &OutPoint, coin: &Coin) -> Hash256 {
    let mut buf = Vec::with_capacity(36 + 8 + 4 + coin.output.script_pubkey.len() + 5);
    buf.extend_from_slice(&outpoint.to_bytes());
    buf.extend_from_slice(&coin.output.value.to_le_bytes());
    buf.extend_from_slice(&(coin.output.script_pubkey.len() as u32).to_le_bytes());
    buf.extend_from_slice(&coin.output.script_pubkey);
    buf.extend_from_slice(&coin.height.to_le_bytes());
    buf.push(coin.is_coinbase as u8);
    hash_bytes(&buf)
}

/// Undo data for one transaction: the coins its inputs spent, in input
/// order, each carrying the outpoint it was bound to.
#[derive(Debug, Clone, Default)]
pub struct TxUndo {
    /// Spent coins with their outpoints.
    pub prevouts: Vec<(OutPoint, Coin)>,
}

/// Undo data for one block: one entry per non-coinbase transaction.
#[derive(Debug, Clone, Default)]
pub struct BlockUndo {
    /// Per-transaction undo records, in block order.
    pub tx_undos: Vec<TxUndo>,
}

impl BlockUndo {
    /// Iterate over every spent coin in the block.
    pub fn spent_coins(&self) -> impl Iterator<Item = &(OutPoint, Coin)> {
        self.tx_undos.iter().flat_map(|undo| undo.prevouts.iter())
    }
}

/// A view over the current UTXO set, consulted when appending created
/// coins to the accumulator.
pub trait CoinsView {
    /// Look up a coin by outpoint, or `None` if it is not in the view.
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;
}

/// Position of a record inside the node's flat block files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePos {
    /// File number, or -1 for the null position.
    pub file: i32,
    /// Byte offset within the file.
    pub pos: u32,
}

impl FilePos {
    /// The null position.
    pub fn null() -> Self {
        FilePos { file: -1, pos: 0 }
    }

    /// Whether this is the null position.
    pub fn is_null(&self) -> bool {
        self.file == -1
    }
}

impl Default for FilePos {
    fn default() -> Self {
        Self::null()
    }
}

/// Source of block and undo data, backed by the node's block files.
pub trait BlockSource {
    /// Read a block by hash.
    fn block(&self, hash: &Hash256) -> Option<Arc<Block>>;

    /// Read a block's undo data by hash.
    fn undo(&self, hash: &Hash256) -> Option<Arc<BlockUndo>>;
}
