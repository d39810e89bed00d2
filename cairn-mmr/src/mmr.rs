//! The MMR accumulator.

use std::collections::BTreeMap;

use cairn_primitives::{Hash256, ZERO_HASH, hash_bytes};
use cairn_storage::{KvStore, WriteBatch};

use crate::{
    Entry, EntryList, Error, Result,
    entry::{entry_digest, merge_hashes},
    helper::{BEST_BLOCK_KEY, NEXT_INDEX_KEY, entry_key, entry_list_size, num_peaks, peak_height},
};

// Writes staged during one batched mutation. Entry reads consult the
// overlay first so later batch items observe earlier items' writes; the
// batch then commits atomically.
#[derive(Default)]
struct PendingBatch {
    overlay: BTreeMap<u64, EntryList>,
    batch: WriteBatch,
}

impl PendingBatch {
    fn stage_entries(&mut self, index: u64, list: EntryList) {
        if list.is_empty() {
            self.batch.delete(entry_key(index));
        } else {
            self.batch.put(entry_key(index), list.encode());
        }
        self.overlay.insert(index, list);
    }
}

/// A persistent Merkle Mountain Range over a key-value store.
///
/// Leaves are addressed by a dense 64-bit insertion index. Batched
/// [`insert`](Mmr::insert) and [`remove`](Mmr::remove) calls update each
/// touched entry list and the O(log n) parents above it, committing all
/// writes in one atomic batch. The current peaks are cached in memory, so
/// [`root_hash`](Mmr::root_hash) performs no I/O.
pub struct Mmr<S> {
    db: S,
    next_index: u64,
    peak_cache: Vec<Entry>,
}

impl<S: KvStore> Mmr<S> {
    /// Open an MMR over the given store, loading the next insertion index
    /// and rebuilding the peak cache.
    pub fn open(db: S) -> Result<Self> {
        let next_index = match db.get(NEXT_INDEX_KEY).map_err(store_err)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidData("next index has wrong width".into()))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let mut mmr = Mmr {
            db,
            next_index,
            peak_cache: Vec::new(),
        };
        mmr.refresh_peak_cache()?;
        Ok(mmr)
    }

    /// The next insertion index (total entries ever appended, before any
    /// rewind).
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Number of live leaves: the sum of the peak counts.
    pub fn leaf_count(&self) -> u64 {
        self.peak_cache.iter().map(|peak| peak.count as u64).sum()
    }

    /// The cached peaks, ordered tallest to shortest.
    pub fn peaks(&self) -> &[Entry] {
        &self.peak_cache
    }

    /// Return a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.db
    }

    /// Compute the root hash. Pure function of the next index and the peak
    /// cache; performs no I/O.
    ///
    /// The chain starts from `(0, H(next_index_le_u64))` and folds the
    /// peaks shortest to tallest via the entry merge commitment, then wraps
    /// the final accumulator in one more hash. (The in-memory header-chain
    /// MMR uses an unwrapped commitment; the two are never cross-verified.)
    pub fn root_hash(&self) -> Hash256 {
        let mut acc = Entry {
            count: 0,
            hash: hash_bytes(&self.next_index.to_le_bytes()),
        };
        for peak in self.peak_cache.iter().rev() {
            let hash = merge_hashes(peak, &acc);
            acc = Entry {
                count: acc.count + peak.count,
                hash,
            };
        }
        entry_digest(&acc)
    }

    /// Insert a batch of `(index, hash)` leaves.
    ///
    /// Indexes at or past the current end extend the MMR (any gap is filled
    /// with absent entries); indexes below it set the stored leaf slot,
    /// overwriting whatever hash is present, and update the parents above.
    /// All writes commit in one atomic batch. Returns the number of entry
    /// lists written.
    pub fn insert(&mut self, mut leaves: Vec<(u64, Hash256)>) -> Result<usize> {
        if leaves.is_empty() {
            return Ok(0);
        }
        leaves.sort_unstable();

        let mut pending = PendingBatch::default();
        let start_next_index = self.next_index;
        let mut update_count = 0;

        for i in 0..leaves.len() {
            let (index, hash) = leaves[i];

            if index >= self.next_index {
                // Extend the MMR out to the new index.
                while self.next_index < index {
                    self.append(&mut pending, Entry::default());
                    update_count += 1;
                }
                self.append(&mut pending, Entry::leaf(hash));
                update_count += 1;
                continue;
            }

            let height = peak_height(index, self.next_index);
            let mut list = self.read_entries(Some(&pending), index)?;
            let leaf = &mut list.entries[0];
            match leaf.count {
                0 => {
                    leaf.count = 1;
                    leaf.hash = hash;
                }
                1 => {
                    // Idempotent replay: overwrite without complaint. The
                    // walk still runs so a deferred parent update from the
                    // previous batch item always completes.
                    leaf.hash = hash;
                }
                _ => {
                    return Err(Error::InvalidData(format!(
                        "leaf slot at index {} holds an aggregate entry",
                        index
                    )));
                }
            }

            let next_batch_index = leaves.get(i + 1).map_or(self.next_index, |leaf| leaf.0);
            self.update_parents(&mut pending, list, index, next_batch_index, height, &mut update_count)?;
        }

        if self.next_index != start_next_index {
            pending
                .batch
                .put(NEXT_INDEX_KEY, self.next_index.to_be_bytes());
        }
        self.db.write_batch(pending.batch).map_err(store_err)?;
        Ok(update_count)
    }

    /// Remove a batch of leaf indexes.
    ///
    /// Absent leaves are tolerated; indexes at or past the end are ignored.
    /// All writes commit in one atomic batch. Returns the number of entry
    /// lists written.
    pub fn remove(&mut self, mut indices: Vec<u64>) -> Result<usize> {
        if indices.is_empty() {
            return Ok(0);
        }
        indices.sort_unstable();

        let mut pending = PendingBatch::default();
        let mut update_count = 0;

        for i in 0..indices.len() {
            let index = indices[i];
            if index >= self.next_index {
                continue;
            }

            let height = peak_height(index, self.next_index);
            let mut list = self.read_entries(Some(&pending), index)?;
            match list.entries[0].count {
                // Nothing stored; walk anyway to finish any parent updates
                // deferred by the previous batch item.
                0 => {}
                1 => list.entries[0].clear(),
                _ => {
                    return Err(Error::InvalidData(format!(
                        "leaf slot at index {} holds an aggregate entry",
                        index
                    )));
                }
            }

            let next_batch_index = indices.get(i + 1).copied().unwrap_or(self.next_index);
            self.update_parents(&mut pending, list, index, next_batch_index, height, &mut update_count)?;
        }

        self.db.write_batch(pending.batch).map_err(store_err)?;
        Ok(update_count)
    }

    /// Truncate the MMR by discarding the `count` most recent insertion
    /// indexes, then rebuild the peak cache from storage.
    ///
    /// Crash-safe: the new next index and the erasures commit in one batch.
    pub fn rewind(&mut self, count: u64) -> Result<()> {
        if count > self.next_index {
            return Err(Error::InvalidInput(format!(
                "cannot rewind {} entries of {}",
                count, self.next_index
            )));
        }
        let new_next_index = self.next_index - count;

        let mut batch = WriteBatch::new();
        batch.put(NEXT_INDEX_KEY, new_next_index.to_be_bytes());
        for index in new_next_index..self.next_index {
            batch.delete(entry_key(index));
        }
        self.db.write_batch(batch).map_err(store_err)?;

        self.next_index = new_next_index;
        self.refresh_peak_cache()
    }

    /// The best block hash recorded for this accumulator, or the zero hash
    /// if none has been written. UTXO MMR only.
    pub fn best_block(&self) -> Result<Hash256> {
        match self.db.get(BEST_BLOCK_KEY).map_err(store_err)? {
            Some(bytes) => bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidData("best block hash has wrong width".into())),
            None => Ok(ZERO_HASH),
        }
    }

    /// Record the best block hash. UTXO MMR only.
    pub fn write_best_block(&mut self, hash: &Hash256) -> Result<()> {
        self.db.put(BEST_BLOCK_KEY, hash).map_err(store_err)
    }

    /// Advise the store to compact the entry keyspace between two indexes.
    pub fn compact_entries(&mut self, start_index: u64, end_index: u64) -> Result<()> {
        self.db
            .compact_range(&entry_key(start_index), &entry_key(end_index))
            .map_err(store_err)
    }

    // Read the entry list at an index: overlay first, then the store. A
    // missing key decodes as a fully-absent list of the expected size; a
    // present key of the wrong size is corruption.
    fn read_entries(&self, pending: Option<&PendingBatch>, index: u64) -> Result<EntryList> {
        if let Some(pending) = pending {
            if let Some(list) = pending.overlay.get(&index) {
                return Ok(list.clone());
            }
        }
        let expected = entry_list_size(index);
        match self.db.get(&entry_key(index)).map_err(store_err)? {
            Some(bytes) => {
                let list = EntryList::decode(&bytes)?;
                if list.len() != expected {
                    return Err(Error::InvalidData(format!(
                        "entry list at index {} has length {}, expected {}",
                        index,
                        list.len(),
                        expected
                    )));
                }
                Ok(list)
            }
            None => Ok(EntryList::cleared(expected)),
        }
    }

    // Append one entry at the current end, merging completed subtrees out
    // of the peak cache into the new index's entry list.
    fn append(&mut self, pending: &mut PendingBatch, entry: Entry) {
        let index = self.next_index;
        self.next_index += 1;
        let height = peak_height(index, self.next_index) as usize;

        let mut entries = Vec::with_capacity(height + 1);
        entries.push(entry);
        for h in 1..=height {
            let left = self
                .peak_cache
                .pop()
                .expect("peak cache tracks next_index");
            let right = entries[h - 1];
            entries.push(Entry::combined(&left, &right));
        }

        let peak = entries[height];
        pending.stage_entries(index, EntryList::new(entries));
        self.peak_cache.push(peak);
    }

    // Walk from a modified entry list up to its peak, recombining parents.
    //
    // At height g the left neighbour of the walk index is the index with
    // bit g-1 cleared. When the walk moves right, the list carried so far
    // becomes the left sibling and is flushed; if the next index in the
    // batch falls inside the subtree just entered, the walk stops early and
    // that item's walk finishes the remaining parents.
    fn update_parents(
        &mut self,
        pending: &mut PendingBatch,
        mut right_list: EntryList,
        mut index: u64,
        next_batch_index: u64,
        height: u32,
        update_count: &mut usize,
    ) -> Result<u64> {
        for g in 1..=height as usize {
            let bit = 1u64 << (g - 1);
            let last_index = index;
            index |= bit;

            let left_entry = if index == last_index {
                // Still the right sibling at this height; fetch the left.
                let left_list = self.read_entries(Some(pending), index & !bit)?;
                left_list.entries[g - 1]
            } else {
                // Moved right: what we carried becomes the left sibling.
                let left_entry = right_list.entries[g - 1];
                let left_list = std::mem::take(&mut right_list);
                pending.stage_entries(last_index, left_list);
                *update_count += 1;

                if next_batch_index < index {
                    return Ok(index);
                }
                right_list = self.read_entries(Some(pending), index)?;
                left_entry
            };

            let right_entry = right_list.entries[g - 1];
            right_list.entries[g] = Entry::combined(&left_entry, &right_entry);
        }

        let peak_entry = *right_list
            .entries
            .last()
            .expect("entry lists are never empty");
        pending.stage_entries(index, right_list);
        *update_count += 1;

        let cache_slot = (index + 1).count_ones() as usize - 1;
        self.peak_cache[cache_slot] = peak_entry;
        Ok(index)
    }

    // Rebuild the peak cache by reading the peak entry lists: clear the
    // lowest set bit of next_index repeatedly, visiting peaks shortest to
    // tallest, and store them tallest first.
    fn refresh_peak_cache(&mut self) -> Result<()> {
        let n_peaks = num_peaks(self.next_index);
        self.peak_cache = vec![Entry::default(); n_peaks];

        let mut peak_next_index = self.next_index;
        for i in 0..n_peaks {
            let peak_index = peak_next_index - 1;
            let list = self.read_entries(None, peak_index)?;
            self.peak_cache[n_peaks - i - 1] = *list
                .entries
                .last()
                .expect("entry lists are never empty");
            peak_next_index &= peak_next_index - 1;
        }
        Ok(())
    }
}

fn store_err<E: std::fmt::Display>(err: E) -> Error {
    Error::StoreError(err.to_string())
}
