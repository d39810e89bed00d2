//! Persistent, batched Merkle Mountain Range keyed by insertion index.
//!
//! The MMR commits to an evolving set of `(count, hash)` leaf entries. Every
//! insertion index ever used owns an *entry list*: the stack of subtree
//! roots at heights `0..=h(i)` whose top entry is the root of the perfect
//! subtree ending at that index. The forest's current peaks are cached in
//! memory, so [`Mmr::root_hash`] is a pure function of the cache and the
//! next insertion index.
//!
//! # Core types
//!
//! - [`Mmr`] — the accumulator (insert, remove, rewind, root hash).
//! - [`Entry`] — a `(count, hash)` pair; count 0 is absent, 1 a live leaf,
//!   greater than 1 an internal subtree root.
//! - [`EntryList`] — one index's entry stack with its compact disk codec.
//!
//! # Storage
//!
//! The accumulator owns a [`KvStore`] handle exclusively. Each batched
//! mutation commits as one atomic [`WriteBatch`]; readers between calls
//! never observe partial states.

#![warn(missing_docs)]

mod entry;
mod error;
/// Peak and height arithmetic plus the storage key layout.
pub(crate) mod helper;
mod mmr;

pub use cairn_storage::{KvStore, MemKvStore, WriteBatch};
pub use entry::{Entry, EntryList};
pub use error::{Error, Result};
pub use helper::{entry_key, entry_list_size, peak_height};
pub use mmr::Mmr;
