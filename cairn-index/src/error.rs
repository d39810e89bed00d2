/// Alias for `core::result::Result<T, Error>`.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for index operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An error propagated from the underlying storage layer.
    #[error("store error: {0}")]
    Store(String),

    /// A stored row failed to decode.
    #[error("failed to decode stored row: {0}")]
    Decode(String),

    /// Filter construction or decoding failed.
    #[error(transparent)]
    Filter(#[from] cairn_gcs::Error),

    /// The best block recorded by the index is not on the provided chain.
    #[error("index best block is unknown to the active chain")]
    UnknownBestBlock,

    /// A stored row belongs to a different block than expected.
    #[error("stored row belongs to unexpected block at height {height}")]
    UnexpectedBlock {
        /// The height whose row disagreed.
        height: u32,
    },

    /// A row that should exist is missing.
    #[error("missing index row at height {height}")]
    MissingRow {
        /// The height whose row is absent.
        height: u32,
    },

    /// Invalid arguments to a lookup or rewind.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub(crate) fn store_err<E: std::fmt::Display>(err: E) -> Error {
    Error::Store(err.to_string())
}
