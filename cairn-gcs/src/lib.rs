//! Golomb-Rice coded probabilistic sets and the block filters built on
//! them.
//!
//! A [`GcsFilter`] commits to a set of byte strings: each element is
//! SipHash-2-4 hashed into `[0, N << P)` and the sorted hash deltas are
//! Golomb-Rice coded with parameter `P`, giving a false-positive rate of
//! `2^-P` per query. [`BlockFilter`] applies the scheme to a block's
//! txids, prevouts, and script data pushes, and chains per-block filter
//! headers the way block headers chain.

mod bitstream;
mod block_filter;
mod compact_size;
mod error;
mod filter;

pub use bitstream::{BitReader, BitWriter};
pub use block_filter::{BlockFilter, BlockFilterType, filter_keys};
pub use compact_size::{compact_size_len, read_compact_size, write_compact_size};
pub use error::{Error, Result};
pub use filter::GcsFilter;
