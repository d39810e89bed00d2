//! Accumulator cores for a blockchain node.
//!
//! This crate wires the component crates together the way a node consumes
//! them: [`UtxoMmr`] binds the persistent MMR accumulator to the block
//! connect/disconnect lifecycle, and [`Node`] owns the accumulator plus
//! the optional indexes as explicit handles, dispatching validation events
//! to each in chain order.
//!
//! The component crates are re-exported for direct use.

mod error;
mod node;
mod utxo;

pub use cairn_chain_mmr as chain_mmr;
pub use cairn_gcs as gcs;
pub use cairn_index as index;
pub use cairn_merkle_set as merkle_set;
pub use cairn_mmr as mmr;
pub use cairn_primitives as primitives;
pub use cairn_queue as queue;
pub use cairn_storage as storage;
pub use error::{Error, Result};
pub use node::Node;
pub use utxo::UtxoMmr;
