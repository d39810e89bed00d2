//! Transaction position index.
//!
//! The index maps every transaction id to the flat-file position of its
//! block and its byte offset within it. A dedicated worker thread first
//! backfills from the index's recorded best block along the active chain,
//! then drains an update queue fed by block-connected events; each block's
//! rows and the new best-block pointer commit in one atomic batch, so the
//! best-block pointer always describes a fully indexed prefix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cairn_chain_mmr::BlockIndex;
use cairn_primitives::{Block, BlockSource, FilePos, Hash256};
use cairn_queue::Queue;
use cairn_storage::{KvStore, WriteBatch};
use integer_encoding::VarInt;
use tracing::{error, info};

use crate::{Error, Result, error::store_err};

const DB_BEST_BLOCK: &[u8] = b"B";
const TX_POSITION_TAG: u8 = b't';

fn tx_key(txid: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = TX_POSITION_TAG;
    key[1..].copy_from_slice(txid);
    key
}

/// Where a transaction's serialization lives: the block's flat-file
/// position plus the byte offset of the transaction within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPosition {
    /// Position of the block record in the flat block files.
    pub block_pos: FilePos,
    /// Byte offset of the transaction within the block record.
    pub tx_offset: u32,
}

impl TxPosition {
    /// Encode as three varints: file (zigzag), position, offset.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.block_pos.file.encode_var_vec();
        out.extend_from_slice(&self.block_pos.pos.encode_var_vec());
        out.extend_from_slice(&self.tx_offset.encode_var_vec());
        out
    }

    /// Decode the varint encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = 0;
        let mut take_u32 = |signed: bool| -> Result<i64> {
            if signed {
                let (value, used) = i32::decode_var(&bytes[cursor..])
                    .ok_or_else(|| Error::Decode("truncated tx position".into()))?;
                cursor += used;
                Ok(value as i64)
            } else {
                let (value, used) = u32::decode_var(&bytes[cursor..])
                    .ok_or_else(|| Error::Decode("truncated tx position".into()))?;
                cursor += used;
                Ok(value as i64)
            }
        };

        let file = take_u32(true)? as i32;
        let pos = take_u32(false)? as u32;
        let tx_offset = take_u32(false)? as u32;
        if cursor != bytes.len() {
            return Err(Error::Decode("trailing bytes in tx position".into()));
        }
        Ok(TxPosition {
            block_pos: FilePos { file, pos },
            tx_offset,
        })
    }
}

/// One block-connected event queued for the worker.
pub struct IndexUpdate {
    /// The connected block.
    pub block: Arc<Block>,
    /// Its index entry.
    pub index: Arc<BlockIndex>,
}

struct Shared<S> {
    db: Mutex<S>,
    queue: Queue<IndexUpdate>,
    synced: AtomicBool,
    interrupted: AtomicBool,
    best_block: Mutex<Option<Arc<BlockIndex>>>,
}

impl<S: KvStore> Shared<S> {
    // Write one block's tx rows plus the best-block pointer atomically.
    fn write_block(&self, block: &Block, index: &BlockIndex) -> Result<()> {
        let mut batch = WriteBatch::new();
        let mut offset = cairn_gcs::compact_size_len(block.txs.len() as u64) as u32;
        for tx in &block.txs {
            let position = TxPosition {
                block_pos: index.data_pos(),
                tx_offset: offset,
            };
            batch.put(tx_key(&tx.txid), position.encode());
            offset += tx.serialized_size;
        }
        batch.put(DB_BEST_BLOCK, index.hash());

        let mut db = self.db.lock().expect("tx index db mutex poisoned");
        db.write_batch(batch).map_err(store_err)
    }

    // A fatal condition: report it, poison the index, wake everyone.
    fn fatal(&self, message: &str) {
        error!(target: "txindex", "{}", message);
        self.interrupted.store(true, Ordering::SeqCst);
        self.queue.interrupt();
    }
}

/// The transaction position index.
///
/// Create with [`TxIndex::new`], then [`TxIndex::start`] the worker with a
/// snapshot of the active chain and a block source. Feed it through
/// [`TxIndex::block_connected`]; synchronize with
/// [`TxIndex::block_until_synced`].
pub struct TxIndex<S: KvStore> {
    shared: Arc<Shared<S>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: KvStore + Send + 'static> TxIndex<S> {
    /// Create the index over its own store. No thread runs yet.
    pub fn new(db: S) -> Self {
        TxIndex {
            shared: Arc::new(Shared {
                db: Mutex::new(db),
                queue: Queue::new(),
                synced: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                best_block: Mutex::new(None),
            }),
            worker: None,
        }
    }

    /// The best block hash recorded by the index, if any.
    pub fn best_block_hash(&self) -> Result<Option<Hash256>> {
        let db = self.shared.db.lock().expect("tx index db mutex poisoned");
        match db.get(DB_BEST_BLOCK).map_err(store_err)? {
            Some(bytes) => {
                let hash: Hash256 = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Decode("best block hash has wrong width".into()))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    /// Start the sync worker.
    ///
    /// `chain` is a genesis-to-tip snapshot of the active chain; the
    /// worker backfills every block above the recorded best block using
    /// `source`, flags the index synced, then drains the update queue
    /// until interrupted. A recorded best block missing from `chain` is a
    /// startup error.
    pub fn start(
        &mut self,
        chain: Vec<Arc<BlockIndex>>,
        source: impl BlockSource + Send + 'static,
    ) -> Result<()> {
        let start_height = match self.best_block_hash()? {
            Some(best_hash) => {
                let position = chain
                    .iter()
                    .position(|index| index.hash() == best_hash)
                    .ok_or(Error::UnknownBestBlock)?;
                *self.shared.best_block.lock().expect("best block mutex poisoned") =
                    Some(chain[position].clone());
                position + 1
            }
            None => 0,
        };

        let shared = Arc::clone(&self.shared);
        self.worker = Some(std::thread::spawn(move || {
            worker_sync(&shared, &chain, &source, start_height);
        }));
        Ok(())
    }

    /// Queue a newly connected block. Ignored until the initial backfill
    /// completes (those blocks are picked up by the backfill itself).
    pub fn block_connected(&self, block: Arc<Block>, index: Arc<BlockIndex>) {
        if !self.shared.synced.load(Ordering::SeqCst) {
            return;
        }
        self.shared.queue.push(IndexUpdate { block, index });
    }

    /// Block until every update queued so far has been processed.
    ///
    /// Returns `false` if the initial backfill has not finished or the
    /// index was interrupted. Callers that dispatch events through an
    /// outer notification queue should drain that queue first.
    pub fn block_until_synced(&self) -> bool {
        if !self.shared.synced.load(Ordering::SeqCst) {
            return false;
        }
        self.shared.queue.wait_until_processed().wait()
    }

    /// Look up the position of a transaction by id.
    pub fn find_tx(&self, txid: &Hash256) -> Result<Option<TxPosition>> {
        let db = self.shared.db.lock().expect("tx index db mutex poisoned");
        match db.get(&tx_key(txid)).map_err(store_err)? {
            Some(bytes) => Ok(Some(TxPosition::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether the index hit a fatal error or was interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }

    /// Interrupt the worker; sticky.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        self.shared.queue.interrupt();
    }

    /// Join the worker thread, if running.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<S: KvStore> Drop for TxIndex<S> {
    fn drop(&mut self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        self.shared.queue.interrupt();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_sync<S: KvStore>(
    shared: &Shared<S>,
    chain: &[Arc<BlockIndex>],
    source: &dyn BlockSource,
    start_height: usize,
) {
    if start_height < chain.len() {
        info!(
            target: "txindex",
            "syncing transaction index from height {}", start_height
        );
    }

    // Backfill the chain snapshot above the recorded best block.
    for index in &chain[start_height.min(chain.len())..] {
        if shared.interrupted.load(Ordering::SeqCst) {
            return;
        }
        let Some(block) = source.block(&index.hash()) else {
            shared.fatal("failed to read block during tx index sync");
            return;
        };
        if shared.write_block(&block, index).is_err() {
            shared.fatal("failed to write block to tx index");
            return;
        }
        *shared.best_block.lock().expect("best block mutex poisoned") = Some(index.clone());
    }

    shared.synced.store(true, Ordering::SeqCst);
    info!(
        target: "txindex",
        "transaction index enabled at height {}",
        chain.len().checked_sub(1).map(|h| h as i64).unwrap_or(-1)
    );

    // Drain block-connected updates until interrupted.
    while let Some(update) = shared.queue.pop() {
        let best = shared
            .best_block
            .lock()
            .expect("best block mutex poisoned")
            .clone();

        // The new block must extend an ancestor of the current best block.
        let connects = match (&best, update.index.height()) {
            (None, _) => true,
            (Some(_), 0) => update.index.prev().is_none(),
            (Some(best), height) => match (best.ancestor(height - 1), update.index.prev()) {
                (Some(ancestor), Some(prev)) => Arc::ptr_eq(&ancestor, prev),
                _ => false,
            },
        };
        if !connects {
            shared.fatal("connected block does not extend the tx index best chain");
            return;
        }

        if shared.write_block(&update.block, &update.index).is_err() {
            shared.fatal("failed to write block to tx index");
            return;
        }
        *shared.best_block.lock().expect("best block mutex poisoned") = Some(update.index.clone());
    }
}
