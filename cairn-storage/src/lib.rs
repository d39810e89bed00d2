//! Key-value storage boundary for the cairn accumulator crates.
//!
//! The accumulators persist through [`KvStore`], a deliberately small trait
//! over an ordered byte-key store with atomic write batches. Any store with
//! those two properties can back them; [`MemKvStore`] is the in-tree
//! implementation used by tests and ephemeral nodes.
//!
//! Mutating operations that must be crash-consistent are expressed as a
//! [`WriteBatch`] applied in one call; implementations must apply the whole
//! batch atomically, in order, or fail without applying any of it.

use std::collections::BTreeMap;

/// Error type for [`MemKvStore`] operations.
///
/// The in-memory store itself cannot fail; the type exists so that code
/// written against [`KvStore`] exercises its error paths uniformly.
#[derive(Debug, thiserror::Error)]
pub enum MemKvError {
    /// Catch-all for wrapped storage failures.
    #[error("storage error: {0}")]
    Storage(String),
}

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace the value at a key.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete a key. No-op if the key does not exist.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// An ordered list of operations applied atomically by
/// [`KvStore::write_batch`].
///
/// Later operations on a key supersede earlier ones, as with sequential
/// application.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a put operation.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Append a delete operation.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Whether the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// The operations, in application order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume the batch, yielding the operations in application order.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered byte-key storage with atomic write batches.
pub trait KvStore {
    /// The error type for operations on this store.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get the value associated with the given key, or `None` if not found.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Insert or replace the value at the given key.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Self::Error>;

    /// Delete the value at the given key. No-op if the key does not exist.
    fn delete(&mut self, key: &[u8]) -> Result<(), Self::Error>;

    /// Whether the given key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, Self::Error> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply a batch of operations atomically, in order.
    fn write_batch(&mut self, batch: WriteBatch) -> Result<(), Self::Error>;

    /// Get all key-value pairs with keys starting with the given prefix,
    /// ordered by key.
    #[allow(clippy::type_complexity)]
    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error>;

    /// Advise the store to compact the key range `[start, end)`.
    ///
    /// Purely an optimization hint; the default does nothing.
    fn compact_range(&mut self, _start: &[u8], _end: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A simple in-memory implementation of [`KvStore`] backed by a `BTreeMap`.
#[derive(Debug, Default, Clone)]
pub struct MemKvStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the underlying data.
    pub fn data(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.data
    }
}

impl KvStore for MemKvStore {
    type Error = MemKvError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Self::Error> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), Self::Error> {
        self.data.remove(key);
        Ok(())
    }

    fn write_batch(&mut self, batch: WriteBatch) -> Result<(), Self::Error> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error> {
        let result: Vec<_> = self
            .data
            .range::<Vec<u8>, _>(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let mut store = MemKvStore::new();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(store.exists(b"a").unwrap());
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert!(!store.exists(b"a").unwrap());
    }

    #[test]
    fn batch_applies_in_order() {
        let mut store = MemKvStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"old".to_vec());
        batch.put(b"k".to_vec(), b"new".to_vec());
        batch.put(b"gone".to_vec(), b"x".to_vec());
        batch.delete(b"gone".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.get(b"gone").unwrap(), None);
    }

    #[test]
    fn prefix_iter_is_ordered_and_bounded() {
        let mut store = MemKvStore::new();
        store.put(b"e\x00\x02", b"c").unwrap();
        store.put(b"e\x00\x01", b"b").unwrap();
        store.put(b"e\x00\x00", b"a").unwrap();
        store.put(b"f\x00\x00", b"other").unwrap();

        let entries = store.prefix_iter(b"e").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1, b"a");
        assert_eq!(entries[2].1, b"c");
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let mut store = MemKvStore::new();
        store.write_batch(WriteBatch::new()).unwrap();
        assert!(store.is_empty());
    }
}
