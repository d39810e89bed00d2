//! Block and transaction collaborator types.
//!
//! These mirror the contract the node's codec layer provides to the
//! accumulator cores: each transaction arrives with its id and serialized
//! size precomputed, and each block with its own and its parent's hash.

use crate::{Hash256, ZERO_HASH};

/// A reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    /// Id of the transaction holding the output.
    pub txid: Hash256,
    /// Output index within that transaction.
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint spent by coinbase inputs.
    pub fn null() -> Self {
        OutPoint {
            txid: ZERO_HASH,
            vout: u32::MAX,
        }
    }

    /// Whether this is the null (coinbase) outpoint.
    pub fn is_null(&self) -> bool {
        self.txid == ZERO_HASH && self.vout == u32::MAX
    }

    /// Canonical 36-byte serialization: `txid || vout_le_u32`.
    ///
    /// This is the encoding block filters commit to.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(&self.txid);
        out[32..].copy_from_slice(&self.vout.to_le_bytes());
        out
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// The output being spent.
    pub prevout: OutPoint,
    /// Raw signature script.
    pub script_sig: Vec<u8>,
    /// Witness stack entries.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// An input spending `prevout` with empty scripts.
    pub fn spending(prevout: OutPoint) -> Self {
        TxIn {
            prevout,
            script_sig: Vec::new(),
            witness: Vec::new(),
        }
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount in base units.
    pub value: u64,
    /// Raw output script.
    pub script_pubkey: Vec<u8>,
}

/// A transaction, with id and serialized size supplied by the codec layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction id.
    pub txid: Hash256,
    /// Inputs.
    pub inputs: Vec<TxIn>,
    /// Outputs.
    pub outputs: Vec<TxOut>,
    /// Size of the transaction's wire serialization in bytes.
    pub serialized_size: u32,
}

impl Transaction {
    /// Whether this is a coinbase transaction (single input spending the
    /// null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }
}

/// A block, with hashes supplied by the codec layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// This block's hash.
    pub hash: Hash256,
    /// The parent block's hash.
    pub prev_hash: Hash256,
    /// Transactions in block order; the first is the coinbase.
    pub txs: Vec<Transaction>,
}
