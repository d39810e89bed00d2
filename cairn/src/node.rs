//! The node-level handle container.

use std::sync::Arc;

use cairn_chain_mmr::BlockIndex;
use cairn_index::{BlockFilterIndex, TxIndex};
use cairn_primitives::{Block, BlockUndo, CoinsView};
use cairn_storage::KvStore;

use crate::{Result, UtxoMmr};

/// Owns the accumulator cores and optional indexes as explicit handles,
/// and fans validation events out to them in chain order.
///
/// Each component holds its own store instance; nothing here is global.
pub struct Node<S: KvStore> {
    /// The UTXO set commitment.
    pub utxo_mmr: UtxoMmr<S>,
    /// Optional transaction position index.
    pub tx_index: Option<TxIndex<S>>,
    /// Optional basic block filter index.
    pub filter_index: Option<BlockFilterIndex<S>>,
}

impl<S: KvStore + Send + 'static> Node<S> {
    /// A node with just the UTXO accumulator.
    pub fn new(utxo_mmr: UtxoMmr<S>) -> Self {
        Node {
            utxo_mmr,
            tx_index: None,
            filter_index: None,
        }
    }

    /// Attach a transaction index.
    pub fn with_tx_index(mut self, tx_index: TxIndex<S>) -> Self {
        self.tx_index = Some(tx_index);
        self
    }

    /// Attach a block filter index.
    pub fn with_filter_index(mut self, filter_index: BlockFilterIndex<S>) -> Self {
        self.filter_index = Some(filter_index);
        self
    }

    /// Dispatch a block-connected event: the UTXO accumulator first, then
    /// the filter index (synchronous), then the tx index (queued).
    pub fn block_connected(
        &mut self,
        block: &Arc<Block>,
        undo: &BlockUndo,
        view: &impl CoinsView,
        index: &Arc<BlockIndex>,
    ) -> Result<()> {
        self.utxo_mmr.block_connected(block, undo, view, index)?;
        if let Some(filter_index) = &mut self.filter_index {
            filter_index.write_block(block, index)?;
        }
        if let Some(tx_index) = &self.tx_index {
            tx_index.block_connected(Arc::clone(block), Arc::clone(index));
        }
        Ok(())
    }

    /// Dispatch a block-disconnected event.
    ///
    /// Only the UTXO accumulator unwinds per block; the filter index keeps
    /// its rows until the reorg's [`BlockFilterIndex::rewind`] runs, and
    /// the tx index tolerates stale entries by design.
    pub fn block_disconnected(&mut self, block: &Block, undo: &BlockUndo) -> Result<()> {
        self.utxo_mmr.block_disconnected(block, undo)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cairn_gcs::BlockFilterType;
    use cairn_primitives::{
        Coin, Hash256, OutPoint, Transaction, TxIn, TxOut, TxUndo, hash_u32_le,
    };
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

    struct Harness {
        view: MapView,
        next_coin_index: u64,
        height: u32,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                view: MapView::default(),
                next_coin_index: 0,
                height: 0,
            }
        }

        // Register a tx's outputs as coins and return the tx.
        fn tx(&mut self, seed: u32, inputs: Vec<TxIn>, values: &[u64]) -> Transaction {
            let txid = hash_u32_le(seed);
            let outputs: Vec<TxOut> = values
                .iter()
                .map(|value| TxOut {
                    value: *value,
                    script_pubkey: vec![0x02, 0xAA, 0xBB],
                })
                .collect();
            for (vout, output) in outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid,
                    vout: vout as u32,
                };
                self.view.coins.insert(
                    outpoint,
                    Coin {
                        output: output.clone(),
                        height: self.height,
                        is_coinbase: inputs.first().is_some_and(|i| i.prevout.is_null()),
                        index: self.next_coin_index,
                    },
                );
                self.next_coin_index += 1;
            }
            Transaction {
                txid,
                inputs,
                outputs,
                serialized_size: 120,
            }
        }

        fn undo_for(&self, spends: &[OutPoint]) -> BlockUndo {
            BlockUndo {
                tx_undos: vec![TxUndo {
                    prevouts: spends
                        .iter()
                        .map(|outpoint| {
                            (*outpoint, self.view.coins.get(outpoint).expect("coin").clone())
                        })
                        .collect(),
                }],
            }
        }
    }

    #[test]
    fn connect_disconnect_restores_the_commitment() {
        let mut harness = Harness::new();
        let mut utxo = UtxoMmr::open(MemKvStore::new()).expect("open");

        // Block 1: a coinbase creating two coins.
        let coinbase1 = harness.tx(1, vec![TxIn::spending(OutPoint::null())], &[50, 30]);
        let block1 = Arc::new(Block {
            hash: hash_u32_le(0xB1),
            prev_hash: [0u8; 32],
            txs: vec![coinbase1.clone()],
        });
        let index1 = BlockIndex::genesis(block1.hash);
        utxo.block_connected(&block1, &BlockUndo::default(), &harness.view, &index1)
            .expect("connect block 1");
        let root1 = utxo.root_hash();
        assert_eq!(utxo.leaf_count(), 2);

        // Block 2: a coinbase plus a spend of block 1's first output.
        harness.height = 1;
        let spent = OutPoint {
            txid: coinbase1.txid,
            vout: 0,
        };
        let coinbase2 = harness.tx(2, vec![TxIn::spending(OutPoint::null())], &[50]);
        let spend = harness.tx(3, vec![TxIn::spending(spent)], &[20, 9]);
        let undo2 = harness.undo_for(&[spent]);
        let block2 = Arc::new(Block {
            hash: hash_u32_le(0xB2),
            prev_hash: block1.hash,
            txs: vec![coinbase2, spend],
        });
        let index2 = BlockIndex::new(block2.hash, Arc::clone(&index1));
        utxo.block_connected(&block2, &undo2, &harness.view, &index2)
            .expect("connect block 2");
        let root2 = utxo.root_hash();
        assert_eq!(utxo.best_block().expect("read"), block2.hash);
        assert_eq!(utxo.leaf_count(), 4);
        assert_ne!(root1, root2);

        // Disconnect block 2 and the commitment reverts exactly.
        utxo.block_disconnected(&block2, &undo2)
            .expect("disconnect block 2");
        assert_eq!(utxo.root_hash(), root1);
        assert_eq!(utxo.best_block().expect("read"), block1.hash);
        assert_eq!(utxo.leaf_count(), 2);

        // Reconnecting reproduces the same commitment.
        utxo.block_connected(&block2, &undo2, &harness.view, &index2)
            .expect("reconnect block 2");
        assert_eq!(utxo.root_hash(), root2);
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let mut harness = Harness::new();
        let mut utxo = UtxoMmr::open(MemKvStore::new()).expect("open");

        let coinbase = harness.tx(1, vec![TxIn::spending(OutPoint::null())], &[50]);
        let block = Arc::new(Block {
            hash: hash_u32_le(0xB1),
            prev_hash: hash_u32_le(0xA0),
            txs: vec![coinbase],
        });
        let index = BlockIndex::genesis(block.hash);

        // The block claims a parent the accumulator has never seen.
        assert!(matches!(
            utxo.block_connected(&block, &BlockUndo::default(), &harness.view, &index),
            Err(crate::Error::BestBlockMismatch { .. })
        ));
    }

    #[test]
    fn node_dispatches_to_all_components() {
        let mut harness = Harness::new();
        let utxo = UtxoMmr::open(MemKvStore::new()).expect("open");
        let filter_index = BlockFilterIndex::new(BlockFilterType::Basic, MemKvStore::new());
        let mut node = Node::new(utxo).with_filter_index(filter_index);

        let coinbase = harness.tx(1, vec![TxIn::spending(OutPoint::null())], &[50]);
        let block = Arc::new(Block {
            hash: hash_u32_le(0xB1),
            prev_hash: [0u8; 32],
            txs: vec![coinbase.clone()],
        });
        let index = BlockIndex::genesis(block.hash);
        node.block_connected(&block, &BlockUndo::default(), &harness.view, &index)
            .expect("dispatch");

        assert_eq!(node.utxo_mmr.leaf_count(), 1);
        let filter = node
            .filter_index
            .as_ref()
            .expect("attached")
            .lookup_filter(&index)
            .expect("lookup")
            .expect("present");
        assert!(filter.filter().matches(&coinbase.txid));
    }
}
