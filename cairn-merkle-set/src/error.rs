/// Alias for `core::result::Result<T, Error>`.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for merkle set construction.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The requested chunk bound is too small to hold even one node.
    InvalidChunkBound(usize),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::InvalidChunkBound(bound) => {
                write!(f, "chunk bound {} cannot hold a node", bound)
            }
        }
    }
}

impl std::error::Error for Error {}
