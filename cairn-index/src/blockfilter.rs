//! Block filter index.
//!
//! Stores three rows per indexed block: the encoded filter, the filter
//! hash, and the chained filter header. Rows for blocks on the active
//! chain are keyed by height; when a block is reorganized out, its height
//! rows are first copied under hash-indexed keys in the same batch, so
//! filter data survives reorgs and can be served for any branch that later
//! becomes active again.

use std::sync::Arc;

use bincode::{Decode, Encode};
use cairn_chain_mmr::BlockIndex;
use cairn_gcs::{BlockFilter, BlockFilterType};
use cairn_primitives::{Block, Hash256, ZERO_HASH};
use cairn_storage::{KvStore, WriteBatch};
use tracing::warn;

use crate::{Error, Result, error::store_err};

const DB_FILTER: u8 = b'f';
const DB_FILTER_HASH: u8 = b'h';
const DB_FILTER_HEADER: u8 = b'r';

const DB_BLOCK_HEIGHT: u8 = b't';
const DB_BLOCK_HASH: u8 = b's';

fn height_key(tag: u8, height: u32) -> [u8; 6] {
    let mut key = [0u8; 6];
    key[0] = tag;
    key[1] = DB_BLOCK_HEIGHT;
    key[2..].copy_from_slice(&height.to_be_bytes());
    key
}

fn hash_key(tag: u8, block_hash: &Hash256) -> [u8; 34] {
    let mut key = [0u8; 34];
    key[0] = tag;
    key[1] = DB_BLOCK_HASH;
    key[2..].copy_from_slice(block_hash);
    key
}

// A height-indexed row: the payload plus the hash of the block it belongs
// to, so lookups can detect rows left behind by a reorg.
#[derive(Debug, Clone, Encode, Decode)]
struct HeightRow {
    block_hash: [u8; 32],
    payload: Vec<u8>,
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_big_endian()
}

impl HeightRow {
    fn encode_to_vec(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode_config())
            .map_err(|e| Error::Decode(format!("failed to encode index row: {}", e)))
    }

    fn decode_from_slice(bytes: &[u8]) -> Result<Self> {
        let (row, _) = bincode::decode_from_slice(bytes, bincode_config())
            .map_err(|e| Error::Decode(format!("failed to decode index row: {}", e)))?;
        Ok(row)
    }
}

fn payload_to_hash(payload: &[u8]) -> Result<Hash256> {
    payload
        .try_into()
        .map_err(|_| Error::Decode("hash payload has wrong width".into()))
}

/// A block filter index for one filter type, over its own store.
pub struct BlockFilterIndex<S> {
    filter_type: BlockFilterType,
    db: S,
}

impl<S: KvStore> BlockFilterIndex<S> {
    /// Create the index.
    pub fn new(filter_type: BlockFilterType, db: S) -> Self {
        BlockFilterIndex { filter_type, db }
    }

    /// The filter type this index stores.
    pub fn filter_type(&self) -> BlockFilterType {
        self.filter_type
    }

    /// Build and store the filter rows for a newly connected block.
    ///
    /// For non-genesis blocks the previous height's header row must exist
    /// and belong to the parent block; the chained header extends it.
    pub fn write_block(&mut self, block: &Block, index: &Arc<BlockIndex>) -> Result<()> {
        let height = index.height();

        let prev_header = if height > 0 {
            let row = self
                .read_height_row(DB_FILTER_HEADER, height - 1)?
                .ok_or(Error::MissingRow { height: height - 1 })?;
            let parent_hash = index.prev().expect("non-genesis block has a parent").hash();
            if row.block_hash != parent_hash {
                warn!(
                    target: "blockfilterindex",
                    "previous filter header belongs to an unexpected block at height {}",
                    height - 1
                );
                return Err(Error::UnexpectedBlock { height: height - 1 });
            }
            payload_to_hash(&row.payload)?
        } else {
            ZERO_HASH
        };

        let filter = BlockFilter::new(self.filter_type, block)?;
        let filter_hash = filter.filter_hash();
        let header = filter.compute_header(&prev_header);
        let block_hash = index.hash();

        let mut batch = WriteBatch::new();
        batch.put(
            height_key(DB_FILTER, height),
            HeightRow {
                block_hash,
                payload: filter.filter().encoded().to_vec(),
            }
            .encode_to_vec()?,
        );
        batch.put(
            height_key(DB_FILTER_HASH, height),
            HeightRow {
                block_hash,
                payload: filter_hash.to_vec(),
            }
            .encode_to_vec()?,
        );
        batch.put(
            height_key(DB_FILTER_HEADER, height),
            HeightRow {
                block_hash,
                payload: header.to_vec(),
            }
            .encode_to_vec()?,
        );
        self.db.write_batch(batch).map_err(store_err)
    }

    /// Prepare for a reorg from `current_tip` back to its ancestor
    /// `new_tip`: copy every height row in `[new_tip, current_tip]` to the
    /// hash-indexed keyspace in one batch.
    pub fn rewind(
        &mut self,
        current_tip: &Arc<BlockIndex>,
        new_tip: &Arc<BlockIndex>,
    ) -> Result<()> {
        let is_ancestor = current_tip
            .ancestor(new_tip.height())
            .is_some_and(|a| Arc::ptr_eq(&a, new_tip));
        if !is_ancestor {
            return Err(Error::InvalidInput(
                "rewind target is not an ancestor of the current tip".into(),
            ));
        }

        let mut batch = WriteBatch::new();
        for tag in [DB_FILTER, DB_FILTER_HASH, DB_FILTER_HEADER] {
            for height in new_tip.height()..=current_tip.height() {
                let row = self
                    .read_height_row(tag, height)?
                    .ok_or(Error::MissingRow { height })?;
                batch.put(hash_key(tag, &row.block_hash), row.payload);
            }
        }
        self.db.write_batch(batch).map_err(store_err)
    }

    /// Look up the filter for a block, from the height row when the block
    /// is still active at that height, otherwise from the hash row.
    pub fn lookup_filter(&self, index: &Arc<BlockIndex>) -> Result<Option<BlockFilter>> {
        let Some(payload) = self.lookup_payload(DB_FILTER, index)? else {
            return Ok(None);
        };
        let filter = BlockFilter::from_encoded(self.filter_type, index.hash(), payload)?;
        Ok(Some(filter))
    }

    /// Look up the filter hash for a block.
    pub fn lookup_filter_hash(&self, index: &Arc<BlockIndex>) -> Result<Option<Hash256>> {
        self.lookup_payload(DB_FILTER_HASH, index)?
            .map(|payload| payload_to_hash(&payload))
            .transpose()
    }

    /// Look up the chained filter header for a block.
    pub fn lookup_filter_header(&self, index: &Arc<BlockIndex>) -> Result<Option<Hash256>> {
        self.lookup_payload(DB_FILTER_HEADER, index)?
            .map(|payload| payload_to_hash(&payload))
            .transpose()
    }

    /// Look up the filters for the branch ending at `stop_index`, from
    /// `start_height` to its height inclusive.
    pub fn lookup_filter_range(
        &self,
        start_height: u32,
        stop_index: &Arc<BlockIndex>,
    ) -> Result<Vec<BlockFilter>> {
        let payloads = self.lookup_payload_range(DB_FILTER, start_height, stop_index)?;
        payloads
            .into_iter()
            .map(|(block_hash, payload)| {
                BlockFilter::from_encoded(self.filter_type, block_hash, payload)
                    .map_err(Error::from)
            })
            .collect()
    }

    /// Look up the filter hashes for the branch ending at `stop_index`.
    pub fn lookup_filter_hash_range(
        &self,
        start_height: u32,
        stop_index: &Arc<BlockIndex>,
    ) -> Result<Vec<Hash256>> {
        let payloads = self.lookup_payload_range(DB_FILTER_HASH, start_height, stop_index)?;
        payloads
            .into_iter()
            .map(|(_, payload)| payload_to_hash(&payload))
            .collect()
    }

    fn read_height_row(&self, tag: u8, height: u32) -> Result<Option<HeightRow>> {
        match self.db.get(&height_key(tag, height)).map_err(store_err)? {
            Some(bytes) => Ok(Some(HeightRow::decode_from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup_payload(&self, tag: u8, index: &Arc<BlockIndex>) -> Result<Option<Vec<u8>>> {
        if let Some(row) = self.read_height_row(tag, index.height())? {
            if row.block_hash == index.hash() {
                return Ok(Some(row.payload));
            }
        }
        Ok(self
            .db
            .get(&hash_key(tag, &index.hash()))
            .map_err(store_err)?)
    }

    // Read a run of height rows, then repair any that belong to a
    // different branch from the hash rows along `stop_index`'s ancestry.
    fn lookup_payload_range(
        &self,
        tag: u8,
        start_height: u32,
        stop_index: &Arc<BlockIndex>,
    ) -> Result<Vec<(Hash256, Vec<u8>)>> {
        if start_height > stop_index.height() {
            return Err(Error::InvalidInput(format!(
                "start height {} above stop height {}",
                start_height,
                stop_index.height()
            )));
        }

        let count = (stop_index.height() - start_height + 1) as usize;
        let mut results: Vec<Option<(Hash256, Vec<u8>)>> = Vec::with_capacity(count);
        for height in start_height..=stop_index.height() {
            let row = self
                .read_height_row(tag, height)?
                .ok_or(Error::MissingRow { height })?;
            results.push(Some((row.block_hash, row.payload)));
        }

        // Walk the requested branch; replace rows whose block hash
        // disagrees from the hash-indexed keyspace.
        let mut walk = Some(Arc::clone(stop_index));
        while let Some(index) = walk {
            if index.height() < start_height {
                break;
            }
            let slot = (index.height() - start_height) as usize;
            let matches = results[slot]
                .as_ref()
                .is_some_and(|(block_hash, _)| *block_hash == index.hash());
            if !matches {
                let payload = self
                    .db
                    .get(&hash_key(tag, &index.hash()))
                    .map_err(store_err)?
                    .ok_or(Error::MissingRow {
                        height: index.height(),
                    })?;
                results[slot] = Some((index.hash(), payload));
            }
            walk = index.prev().cloned();
        }

        Ok(results
            .into_iter()
            .map(|entry| entry.expect("every slot filled above"))
            .collect())
    }
}
