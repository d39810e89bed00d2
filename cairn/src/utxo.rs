//! The UTXO set accumulator bound to the block lifecycle.

use std::sync::Arc;
use std::time::Instant;

use cairn_chain_mmr::{BlockIndex, Chain};
use cairn_mmr::Mmr;
use cairn_primitives::{
    Block, BlockSource, BlockUndo, CoinsView, Hash256, OutPoint, ZERO_HASH, coin_leaf_hash,
};
use cairn_storage::KvStore;
use tracing::info;

use crate::{Error, Result};

/// The persistent UTXO commitment: an [`Mmr`] over coin leaf hashes,
/// advanced by block connect/disconnect events in chain order.
///
/// Every output a block creates is appended (at the insertion index the
/// coins database assigned it) and every output it spends is removed, so
/// `next_index` counts all outputs ever created and disconnecting a block
/// is an exact rewind.
pub struct UtxoMmr<S> {
    mmr: Mmr<S>,
}

impl<S: KvStore> UtxoMmr<S> {
    /// Open the accumulator over its store.
    pub fn open(db: S) -> Result<Self> {
        Ok(UtxoMmr {
            mmr: Mmr::open(db)?,
        })
    }

    /// The commitment to the current UTXO set.
    pub fn root_hash(&self) -> Hash256 {
        self.mmr.root_hash()
    }

    /// Number of live coins.
    pub fn leaf_count(&self) -> u64 {
        self.mmr.leaf_count()
    }

    /// Total outputs ever created.
    pub fn next_index(&self) -> u64 {
        self.mmr.next_index()
    }

    /// The last block applied to the accumulator; zero hash when none.
    pub fn best_block(&self) -> Result<Hash256> {
        Ok(self.mmr.best_block()?)
    }

    /// Access the underlying accumulator.
    pub fn mmr(&self) -> &Mmr<S> {
        &self.mmr
    }

    /// Apply a connected block: append its created coins, remove its spent
    /// ones, and advance the best block.
    ///
    /// `view` must hold a coin for every output the block creates,
    /// including outputs spent later in the same block.
    pub fn block_connected(
        &mut self,
        block: &Block,
        undo: &BlockUndo,
        view: &impl CoinsView,
        index: &Arc<BlockIndex>,
    ) -> Result<()> {
        let best = self.mmr.best_block()?;
        if best != block.prev_hash {
            return Err(Error::BestBlockMismatch { best });
        }

        let txout_count: usize = block.txs.iter().map(|tx| tx.outputs.len()).sum();
        let txin_count: usize = block.txs.iter().map(|tx| tx.inputs.len()).sum();
        let start = Instant::now();

        // Append created coins to the UTXO set.
        let mut append = Vec::with_capacity(txout_count);
        for tx in &block.txs {
            for vout in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint {
                    txid: tx.txid,
                    vout,
                };
                let coin = view.coin(&outpoint).ok_or(Error::MissingCoin {
                    txid: tx.txid,
                    vout,
                })?;
                append.push((coin.index, coin_leaf_hash(&outpoint, &coin)));
            }
        }
        let inserted = self.mmr.insert(append)?;
        let insert_time = start.elapsed();

        // Remove spent coins from the UTXO set.
        let remove: Vec<u64> = undo.spent_coins().map(|(_, coin)| coin.index).collect();
        let removed = self.mmr.remove(remove)?;

        self.mmr.write_best_block(&block.hash)?;

        info!(
            target: "utxommr",
            height = index.height(),
            leaves = self.mmr.leaf_count(),
            txin_count,
            txout_count,
            inserted,
            removed,
            insert_us = insert_time.as_micros() as u64,
            total_us = start.elapsed().as_micros() as u64,
            "block connected"
        );
        Ok(())
    }

    /// Undo a disconnected block: restore its spent coins, rewind its
    /// created outputs, and step the best block back to the parent.
    pub fn block_disconnected(&mut self, block: &Block, undo: &BlockUndo) -> Result<()> {
        let best = self.mmr.best_block()?;
        if best != block.hash {
            return Err(Error::BestBlockMismatch { best });
        }

        let restore: Vec<(u64, Hash256)> = undo
            .spent_coins()
            .map(|(outpoint, coin)| (coin.index, coin_leaf_hash(outpoint, coin)))
            .collect();
        self.mmr.insert(restore)?;

        let txout_count: u64 = block.txs.iter().map(|tx| tx.outputs.len() as u64).sum();
        self.mmr.rewind(txout_count)?;

        self.mmr.write_best_block(&block.prev_hash)?;
        Ok(())
    }

    /// Replay every active-chain block above the accumulator's best block.
    ///
    /// The recorded best block must be on the active chain; reorg recovery
    /// is the caller's job (disconnect back to the fork first).
    pub fn catch_up(
        &mut self,
        chain: &Chain,
        source: &impl BlockSource,
        view: &impl CoinsView,
    ) -> Result<()> {
        let best = self.mmr.best_block()?;
        let next_height = if best == ZERO_HASH {
            0
        } else {
            chain
                .iter()
                .position(|index| index.hash() == best)
                .map(|position| position as u32 + 1)
                .ok_or(Error::UnknownBestBlock)?
        };

        let Some(tip_height) = chain.height() else {
            return Ok(());
        };
        for height in next_height..=tip_height {
            let index = chain.get(height).expect("height within tip");
            let hash = index.hash();
            let block = source
                .block(&hash)
                .ok_or(Error::MissingBlockData { hash })?;
            let undo = source.undo(&hash);
            let undo = undo.as_deref().cloned().unwrap_or_default();
            info!(target: "utxommr", height, "catch-up");
            self.block_connected(&block, &undo, view, index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cairn_primitives::{Coin, Transaction, TxIn, TxOut, hash_u32_le};
    use cairn_storage::MemKvStore;

    use super::*;

    #[derive(Default)]
    struct MapView {
        coins: HashMap<OutPoint, Coin>,
    }

    impl CoinsView for MapView {
        fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
            self.coins.get(outpoint).cloned()
        }
    }

    #[derive(Default)]
    struct MapSource {
        blocks: HashMap<Hash256, Arc<Block>>,
    }

    impl BlockSource for MapSource {
        fn block(&self, hash: &Hash256) -> Option<Arc<Block>> {
            self.blocks.get(hash).cloned()
        }

        fn undo(&self, _hash: &Hash256) -> Option<Arc<BlockUndo>> {
            None
        }
    }

    // A chain of coinbase-only blocks, one output per block.
    fn build_world(length: u32) -> (Chain, MapSource, MapView) {
        let mut source = MapSource::default();
        let mut view = MapView::default();
        let mut tip: Option<Arc<BlockIndex>> = None;
        let mut prev_hash = ZERO_HASH;

        for height in 0..length {
            let txid = hash_u32_le(1000 + height);
            let output = TxOut {
                value: 50,
                script_pubkey: vec![0x01, 0x55],
            };
            view.coins.insert(
                OutPoint { txid, vout: 0 },
                Coin {
                    output: output.clone(),
                    height,
                    is_coinbase: true,
                    index: height as u64,
                },
            );
            let block = Arc::new(Block {
                hash: hash_u32_le(height),
                prev_hash,
                txs: vec![Transaction {
                    txid,
                    inputs: vec![TxIn::spending(OutPoint::null())],
                    outputs: vec![output],
                    serialized_size: 100,
                }],
            });
            prev_hash = block.hash;
            tip = Some(match tip {
                None => BlockIndex::genesis(block.hash),
                Some(prev) => BlockIndex::new(block.hash, prev),
            });
            source.blocks.insert(block.hash, block);
        }

        let mut chain = Chain::new();
        chain.set_tip(tip);
        (chain, source, view)
    }

    #[test]
    fn catch_up_replays_the_active_chain() {
        let (chain, source, view) = build_world(6);

        let mut utxo = UtxoMmr::open(MemKvStore::new()).expect("open");
        utxo.catch_up(&chain, &source, &view).expect("catch up");
        assert_eq!(utxo.leaf_count(), 6);
        assert_eq!(
            utxo.best_block().expect("read"),
            chain.tip().expect("tip").hash()
        );

        // A second catch-up from the tip is a no-op.
        let root = utxo.root_hash();
        utxo.catch_up(&chain, &source, &view).expect("catch up again");
        assert_eq!(utxo.root_hash(), root);

        // Incremental connection from scratch produces the same root.
        let mut reference = UtxoMmr::open(MemKvStore::new()).expect("open");
        for height in 0..6u32 {
            let index = chain.get(height).expect("in range");
            let block = source.block(&index.hash()).expect("stored");
            reference
                .block_connected(&block, &BlockUndo::default(), &view, index)
                .expect("connect");
        }
        assert_eq!(reference.root_hash(), root);
    }

    #[test]
    fn catch_up_rejects_unknown_best_block() {
        let (chain, source, view) = build_world(3);
        let mut utxo = UtxoMmr::open(MemKvStore::new()).expect("open");
        utxo.catch_up(&chain, &source, &view).expect("catch up");

        // A chain from a different history does not contain our best block.
        let foreign_tip = BlockIndex::genesis(hash_u32_le(0x5EED));
        let mut foreign_source = MapSource::default();
        foreign_source.blocks.insert(
            foreign_tip.hash(),
            Arc::new(Block {
                hash: foreign_tip.hash(),
                prev_hash: ZERO_HASH,
                txs: Vec::new(),
            }),
        );
        let mut foreign_chain = Chain::new();
        foreign_chain.set_tip(Some(foreign_tip));

        assert!(matches!(
            utxo.catch_up(&foreign_chain, &foreign_source, &MapView::default()),
            Err(Error::UnknownBestBlock)
        ));
    }
}
