/// Alias for `core::result::Result<T, Error>`.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for MMR operations.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An error propagated from the underlying storage layer.
    StoreError(String),
    /// Stored MMR data failed to decode or violates a structural invariant.
    InvalidData(String),
    /// Invalid input parameters.
    InvalidInput(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use Error::*;
        match self {
            StoreError(msg) => write!(f, "Store error: {}", msg),
            InvalidData(msg) => write!(f, "Invalid MMR data: {}", msg),
            InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
