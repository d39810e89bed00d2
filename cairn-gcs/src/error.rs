/// Alias for `core::result::Result<T, Error>`.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for filter construction and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The false-positive exponent is out of range.
    #[error("P must be <= 32, got {0}")]
    InvalidP(u8),
    /// The element count is out of range.
    #[error("N must be < 2^32, got {0}")]
    InvalidN(u64),
    /// The encoded stream ended early.
    #[error("unexpected end of encoded filter")]
    UnexpectedEnd,
    /// Bytes or set bits remain after the last encoded element.
    #[error("trailing data after encoded filter")]
    TrailingData,
    /// A compact-size prefix is malformed.
    #[error("invalid compact size: {0}")]
    InvalidCompactSize(String),
}
