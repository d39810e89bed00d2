//! Block filters: the GCS scheme applied to block contents.

use std::collections::BTreeSet;

use cairn_primitives::{Block, Hash256, hash_bytes, script};

use crate::{GcsFilter, Result};

/// False-positive exponent for both deployed filter types.
const FILTER_FP_EXPONENT: u8 = 20;

/// The deployed block filter variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockFilterType {
    /// Txids, spent prevouts, and output script data pushes.
    Basic,
    /// Input script data pushes and witness stack entries.
    Extended,
}

impl BlockFilterType {
    /// Stable name, used by index databases and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            BlockFilterType::Basic => "basic",
            BlockFilterType::Extended => "extended",
        }
    }
}

/// Derive a block's filter keys: the first two little-endian u64 words of
/// its hash.
pub fn filter_keys(block_hash: &Hash256) -> (u64, u64) {
    let k0 = u64::from_le_bytes(block_hash[..8].try_into().expect("8 bytes"));
    let k1 = u64::from_le_bytes(block_hash[8..16].try_into().expect("8 bytes"));
    (k0, k1)
}

fn basic_elements(block: &Block) -> BTreeSet<Vec<u8>> {
    let mut elements = BTreeSet::new();
    for tx in &block.txs {
        // Every txid, coinbase included.
        elements.insert(tx.txid.to_vec());

        // Every spent prevout, coinbase excluded.
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                elements.insert(input.prevout.to_bytes().to_vec());
            }
        }

        // Every data push in every parseable output script.
        for output in &tx.outputs {
            let Some(pushes) = script::data_pushes(&output.script_pubkey) else {
                continue;
            };
            elements.extend(pushes);
        }
    }
    elements
}

fn extended_elements(block: &Block) -> BTreeSet<Vec<u8>> {
    let mut elements = BTreeSet::new();
    for tx in &block.txs {
        if tx.is_coinbase() {
            continue;
        }
        for input in &tx.inputs {
            elements.extend(script::data_pushes_lenient(&input.script_sig));
            elements.extend(input.witness.iter().cloned());
        }
    }
    elements
}

/// A complete block filter: the GCS set over one block's contents, keyed
/// by the block hash.
#[derive(Debug, Clone)]
pub struct BlockFilter {
    filter_type: BlockFilterType,
    block_hash: Hash256,
    filter: GcsFilter,
}

impl BlockFilter {
    /// Build the filter of the given type over a block.
    pub fn new(filter_type: BlockFilterType, block: &Block) -> Result<Self> {
        let elements = match filter_type {
            BlockFilterType::Basic => basic_elements(block),
            BlockFilterType::Extended => extended_elements(block),
        };
        let (k0, k1) = filter_keys(&block.hash);
        Ok(BlockFilter {
            filter_type,
            block_hash: block.hash,
            filter: GcsFilter::new(k0, k1, FILTER_FP_EXPONENT, &elements)?,
        })
    }

    /// Reconstruct a stored filter from its encoding, validating it.
    pub fn from_encoded(
        filter_type: BlockFilterType,
        block_hash: Hash256,
        encoded: Vec<u8>,
    ) -> Result<Self> {
        let (k0, k1) = filter_keys(&block_hash);
        Ok(BlockFilter {
            filter_type,
            block_hash,
            filter: GcsFilter::from_encoded(k0, k1, FILTER_FP_EXPONENT, encoded)?,
        })
    }

    /// The filter variant.
    pub fn filter_type(&self) -> BlockFilterType {
        self.filter_type
    }

    /// The hash of the block this filter covers.
    pub fn block_hash(&self) -> &Hash256 {
        &self.block_hash
    }

    /// The underlying GCS set.
    pub fn filter(&self) -> &GcsFilter {
        &self.filter
    }

    /// Hash of the encoded filter bytes.
    pub fn filter_hash(&self) -> Hash256 {
        hash_bytes(self.filter.encoded())
    }

    /// Chain this filter onto the previous filter header:
    /// `H(filter_hash || prev_header)`.
    pub fn compute_header(&self, prev_header: &Hash256) -> Hash256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.filter_hash());
        buf[32..].copy_from_slice(prev_header);
        hash_bytes(&buf)
    }
}
