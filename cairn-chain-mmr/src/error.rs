/// Alias for `core::result::Result<T, Error>`.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for chain MMR operations.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A height argument violates the call contract (header above root,
    /// root above tip, empty chain).
    InvalidHeight(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::InvalidHeight(msg) => write!(f, "Invalid height: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
