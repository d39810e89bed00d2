//! MMR entries, entry lists, and the compact entry-list codec.

use cairn_primitives::{Hash256, ZERO_HASH, hash_bytes};

use crate::{Error, Result};

/// Serialized width of one entry: 4 count bytes plus 32 hash bytes.
const ENTRY_SIZE: usize = 36;

/// A `(count, hash)` pair.
///
/// Count 0 marks an absent entry, count 1 a live leaf or promoted leaf,
/// and count above 1 an internal subtree root covering that many leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Entry {
    /// Number of live leaves covered by this entry.
    pub count: u32,
    /// Subtree root hash; the zero hash when `count == 0`.
    pub hash: Hash256,
}

impl Entry {
    /// A live leaf entry.
    pub fn leaf(hash: Hash256) -> Self {
        Entry { count: 1, hash }
    }

    /// Reset to the absent state.
    pub fn clear(&mut self) {
        self.count = 0;
        self.hash = ZERO_HASH;
    }

    /// Whether this entry is absent.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Combine two sibling entries into their parent.
    ///
    /// A lone leaf is promoted unchanged; two empty children yield an empty
    /// parent; anything else commits to both children's counts and hashes.
    pub fn combined(left: &Entry, right: &Entry) -> Entry {
        match (left.count, right.count) {
            (0, 0) => Entry::default(),
            (0, 1) => *right,
            (1, 0) => *left,
            _ => Entry {
                count: left.count + right.count,
                hash: merge_hashes(left, right),
            },
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.hash);
    }

    fn read_from(bytes: &[u8]) -> Entry {
        debug_assert_eq!(bytes.len(), ENTRY_SIZE);
        let mut count = [0u8; 4];
        count.copy_from_slice(&bytes[..4]);
        let mut hash = ZERO_HASH;
        hash.copy_from_slice(&bytes[4..]);
        Entry {
            count: u32::from_le_bytes(count),
            hash,
        }
    }
}

/// Hash commitment to a sibling pair: `H(left.count_le || left.hash ||
/// right.count_le || right.hash)`.
///
/// This is the sole hash contract of the accumulator; the root chain
/// reuses it with the running accumulator in the right position.
pub(crate) fn merge_hashes(left: &Entry, right: &Entry) -> Hash256 {
    let mut buf = [0u8; 2 * ENTRY_SIZE];
    buf[..4].copy_from_slice(&left.count.to_le_bytes());
    buf[4..36].copy_from_slice(&left.hash);
    buf[36..40].copy_from_slice(&right.count.to_le_bytes());
    buf[40..].copy_from_slice(&right.hash);
    hash_bytes(&buf)
}

/// Hash commitment to a single entry: `H(count_le || hash)`.
pub(crate) fn entry_digest(entry: &Entry) -> Hash256 {
    let mut buf = [0u8; ENTRY_SIZE];
    buf[..4].copy_from_slice(&entry.count.to_le_bytes());
    buf[4..].copy_from_slice(&entry.hash);
    hash_bytes(&buf)
}

/// The entry stack stored at one insertion index, covering heights
/// `0..=h(index)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryList {
    /// Entries by height, lowest first.
    pub(crate) entries: Vec<Entry>,
}

impl EntryList {
    /// Wrap a vector of entries.
    pub fn new(entries: Vec<Entry>) -> Self {
        EntryList { entries }
    }

    /// A list of `len` absent entries.
    pub fn cleared(len: usize) -> Self {
        EntryList {
            entries: vec![Entry::default(); len],
        }
    }

    /// Number of entries (heights) in the list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether every entry is absent. Fully-absent lists are erased from
    /// storage rather than written.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Entry::is_empty)
    }

    /// The entries by height, lowest first.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Encode to the compact disk format.
    ///
    /// Layout: `terminal_height || middle_height || max_height`, then one
    /// shared hash for the count-1 run `[terminal_height, middle_height)`,
    /// then raw entries for `[middle_height, max_height)`. The run shares a
    /// single hash because a count-1 entry's parent is the promoted entry
    /// itself whenever its sibling is empty.
    pub fn encode(&self) -> Vec<u8> {
        let max_height = self.entries.len();
        debug_assert!(max_height <= u8::MAX as usize);

        let mut height = 0;
        while height < max_height && self.entries[height].count == 0 {
            height += 1;
        }
        let terminal_height = height;

        while height < max_height && self.entries[height].count == 1 {
            debug_assert_eq!(
                self.entries[height].hash, self.entries[terminal_height].hash,
                "count-1 run must share one promoted hash"
            );
            height += 1;
        }
        let middle_height = height;

        let mut out = Vec::with_capacity(3 + 32 + (max_height - middle_height) * ENTRY_SIZE);
        out.push(terminal_height as u8);
        out.push(middle_height as u8);
        out.push(max_height as u8);

        if terminal_height < middle_height {
            out.extend_from_slice(&self.entries[terminal_height].hash);
        }
        for entry in &self.entries[middle_height..] {
            entry.write_to(&mut out);
        }
        out
    }

    /// Decode from the compact disk format. Strict: short input, trailing
    /// bytes, and inconsistent heights are all errors.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(Error::InvalidData("entry list header truncated".into()));
        }
        let terminal_height = bytes[0] as usize;
        let middle_height = bytes[1] as usize;
        let max_height = bytes[2] as usize;
        if terminal_height > middle_height || middle_height > max_height {
            return Err(Error::InvalidData(format!(
                "entry list heights out of order: {} {} {}",
                terminal_height, middle_height, max_height
            )));
        }

        let mut cursor = 3;
        let mut entries = vec![Entry::default(); max_height];

        if terminal_height < middle_height {
            let hash_bytes = bytes
                .get(cursor..cursor + 32)
                .ok_or_else(|| Error::InvalidData("entry list shared hash truncated".into()))?;
            cursor += 32;
            let mut hash = ZERO_HASH;
            hash.copy_from_slice(hash_bytes);
            for entry in &mut entries[terminal_height..middle_height] {
                entry.count = 1;
                entry.hash = hash;
            }
        }

        for entry in &mut entries[middle_height..max_height] {
            let raw = bytes
                .get(cursor..cursor + ENTRY_SIZE)
                .ok_or_else(|| Error::InvalidData("entry list entry truncated".into()))?;
            cursor += ENTRY_SIZE;
            *entry = Entry::read_from(raw);
        }

        if cursor != bytes.len() {
            return Err(Error::InvalidData(format!(
                "entry list has {} trailing bytes",
                bytes.len() - cursor
            )));
        }
        Ok(EntryList { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash256 {
        [byte; 32]
    }

    #[test]
    fn combined_promotes_lone_leaves() {
        let leaf = Entry::leaf(h(1));
        let empty = Entry::default();
        assert_eq!(Entry::combined(&leaf, &empty), leaf);
        assert_eq!(Entry::combined(&empty, &leaf), leaf);
        assert_eq!(Entry::combined(&empty, &empty), Entry::default());
    }

    #[test]
    fn combined_merges_populated_siblings() {
        let left = Entry::leaf(h(1));
        let right = Entry::leaf(h(2));
        let parent = Entry::combined(&left, &right);
        assert_eq!(parent.count, 2);
        assert_ne!(parent.hash, left.hash);
        // Order matters.
        assert_ne!(parent.hash, Entry::combined(&right, &left).hash);
    }

    #[test]
    fn combined_hashes_empty_sibling_of_internal_node() {
        // A count >= 2 node next to an empty sibling is a real merge, not a
        // promotion.
        let internal = Entry {
            count: 2,
            hash: h(9),
        };
        let parent = Entry::combined(&Entry::default(), &internal);
        assert_eq!(parent.count, 2);
        assert_ne!(parent.hash, internal.hash);
    }

    #[test]
    fn codec_roundtrip_mixed_list() {
        let list = EntryList::new(vec![
            Entry::default(),
            Entry::leaf(h(5)),
            Entry::leaf(h(5)),
            Entry {
                count: 4,
                hash: h(7),
            },
        ]);
        let encoded = list.encode();
        // Header + shared hash + one raw entry.
        assert_eq!(encoded.len(), 3 + 32 + 36);
        assert_eq!(EntryList::decode(&encoded).unwrap(), list);
    }

    #[test]
    fn codec_roundtrip_cleared_list() {
        let list = EntryList::cleared(4);
        let encoded = list.encode();
        assert_eq!(encoded.len(), 3);
        assert_eq!(EntryList::decode(&encoded).unwrap(), list);
    }

    #[test]
    fn codec_roundtrip_single_leaf() {
        let list = EntryList::new(vec![Entry::leaf(h(3))]);
        assert_eq!(EntryList::decode(&list.encode()).unwrap(), list);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut encoded = EntryList::new(vec![Entry::leaf(h(3))]).encode();
        encoded.push(0);
        assert!(EntryList::decode(&encoded).is_err());
    }

    #[test]
    fn decode_rejects_truncation() {
        let encoded = EntryList::new(vec![Entry::leaf(h(3))]).encode();
        assert!(EntryList::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn decode_rejects_disordered_heights() {
        assert!(EntryList::decode(&[2, 1, 3]).is_err());
        assert!(EntryList::decode(&[0, 4, 3]).is_err());
    }
}
