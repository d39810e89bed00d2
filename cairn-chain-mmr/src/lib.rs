//! In-memory MMR over the active header chain.
//!
//! [`Chain`] tracks the active chain as a dense vector of
//! [`BlockIndex`] references and maintains, per height, the stack of
//! intermediate MMR hashes for the peak containing that height. From those
//! it produces tip commitments ([`Chain::generate_commitment`]) and
//! membership proofs of any past header against a commitment
//! ([`Chain::generate_proof`] / [`verify_proof`]).
//!
//! Unlike the persistent UTXO accumulator, the header MMR commits to bare
//! 32-byte hashes and does not wrap its final commitment; the two roots are
//! deliberately not interchangeable.

mod block_index;
mod chain;
mod error;

pub use block_index::{BlockIndex, last_common_ancestor};
pub use chain::{BlockLocator, Chain, verify_proof};
pub use error::{Error, Result};
