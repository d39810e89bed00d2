use cairn_primitives::Hash256;

/// Alias for `core::result::Result<T, Error>`.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for node-level accumulator operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An MMR operation failed.
    #[error(transparent)]
    Mmr(#[from] cairn_mmr::Error),

    /// An index operation failed.
    #[error(transparent)]
    Index(#[from] cairn_index::Error),

    /// The event's block does not follow the accumulator's best block.
    ///
    /// Connect and disconnect events must arrive in chain order; anything
    /// else means the caller violated the topological contract.
    #[error("block event out of order: accumulator best block is {}", short_hex(.best))]
    BestBlockMismatch {
        /// The accumulator's current best block hash.
        best: Hash256,
    },

    /// The coins view has no coin for an output created by the connected
    /// block; the view must retain every created coin until the event is
    /// processed.
    #[error("coins view is missing created output {}:{vout}", short_hex(.txid))]
    MissingCoin {
        /// Creating transaction.
        txid: Hash256,
        /// Output index.
        vout: u32,
    },

    /// The accumulator's best block is not on the active chain.
    #[error("accumulator best block is unknown to the active chain")]
    UnknownBestBlock,

    /// Block data required for catch-up could not be read.
    #[error("missing block data for {}", short_hex(.hash))]
    MissingBlockData {
        /// Hash of the unreadable block.
        hash: Hash256,
    },
}

// Short hex rendering for error messages.
fn short_hex(hash: &Hash256) -> String {
    hash[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
