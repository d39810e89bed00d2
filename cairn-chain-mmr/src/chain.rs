//! The active chain and its header MMR.

use std::sync::Arc;

use cairn_primitives::{Hash256, ZERO_HASH};

use crate::{BlockIndex, Error, Result};

/// `floor(log2(value))`; `value` must be non-zero.
#[inline]
fn log2_floor(value: u32) -> u32 {
    debug_assert!(value != 0);
    31 - value.leading_zeros()
}

/// Hash a sibling pair of header-MMR nodes.
fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    *blake3::hash(&buf).as_bytes()
}

/// A block locator: a vector of header hashes with exponentially widening
/// stride, ending at genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocator {
    /// The hashes, tip first.
    pub have: Vec<Hash256>,
}

/// The active header chain, indexed by height, with an incrementally
/// maintained MMR over the header hashes.
///
/// `mmr_entries[h]` holds the intermediate subtree hashes computed while
/// folding height `h` into its containing peak: entry `j` is the height
/// `j + 1` subtree root ending at `h`. Entries only ever reference lower
/// heights, so [`Chain::set_tip`] fills them in one ascending pass over the
/// replaced suffix.
#[derive(Debug, Default)]
pub struct Chain {
    chain: Vec<Arc<BlockIndex>>,
    mmr_entries: Vec<Vec<Hash256>>,
}

impl Chain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// The tip entry, if the chain is non-empty.
    pub fn tip(&self) -> Option<&Arc<BlockIndex>> {
        self.chain.last()
    }

    /// The genesis entry, if the chain is non-empty.
    pub fn genesis(&self) -> Option<&Arc<BlockIndex>> {
        self.chain.first()
    }

    /// The tip height, or `None` for an empty chain.
    pub fn height(&self) -> Option<u32> {
        self.chain.len().checked_sub(1).map(|h| h as u32)
    }

    /// The entry at a height, if within the chain.
    pub fn get(&self, height: u32) -> Option<&Arc<BlockIndex>> {
        self.chain.get(height as usize)
    }

    /// Whether the given entry lies on the active chain.
    pub fn contains(&self, index: &Arc<BlockIndex>) -> bool {
        self.get(index.height())
            .is_some_and(|entry| Arc::ptr_eq(entry, index))
    }

    /// Iterate the active chain from genesis to tip.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BlockIndex>> {
        self.chain.iter()
    }

    /// Set the chain tip, replacing the diverging suffix and recomputing
    /// the MMR intermediate stacks for every replaced height.
    ///
    /// `None` clears the chain.
    pub fn set_tip(&mut self, tip: Option<Arc<BlockIndex>>) {
        let Some(tip) = tip else {
            self.chain.clear();
            self.mmr_entries.clear();
            return;
        };

        // Drop everything above the new tip, then walk back collecting the
        // branch that differs from what is already in place.
        self.chain.truncate(tip.height() as usize + 1);
        self.mmr_entries.truncate(tip.height() as usize + 1);

        let mut fresh = Vec::new();
        let mut walk = Some(tip);
        while let Some(index) = walk {
            let height = index.height() as usize;
            if height < self.chain.len() && Arc::ptr_eq(&self.chain[height], &index) {
                break;
            }
            walk = index.prev().cloned();
            fresh.push(index);
        }

        let keep = fresh
            .last()
            .map_or(self.chain.len(), |index| index.height() as usize);
        self.chain.truncate(keep);
        self.mmr_entries.truncate(keep);

        for index in fresh.into_iter().rev() {
            self.chain.push(index);
            let height = (self.chain.len() - 1) as u32;
            let mut entries = Vec::new();
            self.compute_mmr_peak(height, height, Some(&mut entries), None);
            self.mmr_entries.push(entries);
        }
    }

    // The height-`level` subtree root whose range ends at `height`.
    fn mmr_entry(&self, height: u32, level: u32) -> Hash256 {
        if level == 0 {
            self.chain[height as usize].hash()
        } else {
            self.mmr_entries[height as usize][level as usize - 1]
        }
    }

    // Fold the header at `header_height` up to the peak it belongs to in
    // the MMR of size `root_height + 1`, optionally collecting each
    // intermediate hash and each consumed sibling.
    fn compute_mmr_peak(
        &self,
        header_height: u32,
        root_height: u32,
        mut intermediates: Option<&mut Vec<Hash256>>,
        mut branch: Option<&mut Vec<Hash256>>,
    ) -> Hash256 {
        debug_assert!(header_height <= root_height);
        debug_assert!((root_height as usize) < self.chain.len());

        let peak_height = log2_floor(header_height ^ (root_height + 1));
        let mut peak = self.chain[header_height as usize].hash();
        let mut idx = header_height;

        for bit in 0..peak_height {
            let mask = 1u32 << bit;
            let other = self.mmr_entry(idx ^ mask, bit);
            peak = if idx & mask != 0 {
                hash_pair(&other, &peak)
            } else {
                hash_pair(&peak, &other)
            };

            if let Some(out) = intermediates.as_mut() {
                out.push(peak);
            }
            if let Some(out) = branch.as_mut() {
                out.push(other);
            }
            idx |= mask;
        }
        peak
    }

    // The peaks of the MMR of size `root_height + 1`, shortest first.
    fn peaks(&self, root_height: u32) -> Vec<Hash256> {
        let mut idx = root_height + 1;
        let mut peaks = Vec::with_capacity(idx.count_ones() as usize);
        let mut bit = 0;
        while idx != 0 {
            let mask = 1u32 << bit;
            if idx & mask != 0 {
                peaks.push(self.mmr_entry(idx - 1, bit));
                idx ^= mask;
            }
            bit += 1;
        }
        peaks
    }

    fn check_root_height(&self, root_height: u32) -> Result<()> {
        match self.height() {
            Some(tip) if root_height <= tip => Ok(()),
            _ => Err(Error::InvalidHeight(format!(
                "root height {} beyond chain tip",
                root_height
            ))),
        }
    }

    /// Commitment to the MMR over heights `0..=root_height`: the peaks
    /// folded shortest to tallest from the zero hash.
    pub fn generate_commitment(&self, root_height: u32) -> Result<Hash256> {
        self.check_root_height(root_height)?;

        let mut commitment = ZERO_HASH;
        for peak in self.peaks(root_height) {
            commitment = hash_pair(&commitment, &peak);
        }
        Ok(commitment)
    }

    /// Membership proof of the header at `header_height` against the
    /// commitment for `root_height`.
    ///
    /// Layout: the branch siblings up to the containing peak, then the
    /// aggregated commitment of all lower peaks, then each higher peak in
    /// ascending order. [`verify_proof`] consumes the same layout.
    pub fn generate_proof(&self, header_height: u32, root_height: u32) -> Result<Vec<Hash256>> {
        self.check_root_height(root_height)?;
        if header_height > root_height {
            return Err(Error::InvalidHeight(format!(
                "header height {} above root height {}",
                header_height, root_height
            )));
        }

        let idx = root_height + 1;
        let peak_height = log2_floor(header_height ^ idx);
        let mask = (1u32 << peak_height) - 1;
        let n_lower_peaks = (idx & mask).count_ones() as usize;
        let n_higher_peaks = (idx & !mask).count_ones() as usize - 1;

        let mut proof = Vec::with_capacity(peak_height as usize + 1 + n_higher_peaks);
        self.compute_mmr_peak(header_height, root_height, None, Some(&mut proof));

        let peaks = self.peaks(root_height);

        let mut lower = ZERO_HASH;
        for peak in &peaks[..n_lower_peaks] {
            lower = hash_pair(&lower, peak);
        }
        proof.push(lower);
        proof.extend_from_slice(&peaks[n_lower_peaks + 1..]);

        Ok(proof)
    }

    /// Build a block locator starting from `index` (or the tip): dense for
    /// the last ten entries, then exponentially widening stride, always
    /// ending at genesis.
    pub fn locator(&self, index: Option<&Arc<BlockIndex>>) -> BlockLocator {
        let mut step = 1u32;
        let mut have = Vec::with_capacity(32);

        let mut walk = match index {
            Some(index) => Some(Arc::clone(index)),
            None => self.tip().cloned(),
        };
        while let Some(index) = walk {
            have.push(index.hash());
            if index.height() == 0 {
                break;
            }
            let height = index.height().saturating_sub(step);
            walk = if self.contains(&index) {
                // O(1) lookup while on the active chain.
                self.get(height).cloned()
            } else {
                index.ancestor(height)
            };
            if have.len() > 10 {
                step *= 2;
            }
        }

        BlockLocator { have }
    }

    /// The last entry of the active chain that is an ancestor of `index`.
    pub fn find_fork(&self, index: &Arc<BlockIndex>) -> Option<Arc<BlockIndex>> {
        let tip_height = self.height()?;
        let mut walk = if index.height() > tip_height {
            index.ancestor(tip_height)?
        } else {
            Arc::clone(index)
        };
        while !self.contains(&walk) {
            walk = walk.prev()?.clone();
        }
        Some(walk)
    }
}

/// Verify a proof produced by [`Chain::generate_proof`].
///
/// Recomputes the fold: the branch into the containing peak (bit `i` of
/// `header_height` decides sibling order), the lower-peak aggregate, then
/// the higher peaks, and compares against `commitment`.
pub fn verify_proof(
    header_height: u32,
    root_height: u32,
    block_hash: &Hash256,
    commitment: &Hash256,
    proof: &[Hash256],
) -> Result<bool> {
    if header_height > root_height {
        return Err(Error::InvalidHeight(format!(
            "header height {} above root height {}",
            header_height, root_height
        )));
    }

    let idx = root_height + 1;
    let peak_height = log2_floor(header_height ^ idx);
    let mask = (1u32 << peak_height) - 1;
    let n_higher_peaks = (idx & !mask).count_ones() as usize - 1;
    if proof.len() != peak_height as usize + 1 + n_higher_peaks {
        return Ok(false);
    }

    let mut acc = *block_hash;
    for bit in 0..peak_height as usize {
        acc = if header_height & (1u32 << bit) != 0 {
            hash_pair(&proof[bit], &acc)
        } else {
            hash_pair(&acc, &proof[bit])
        };
    }

    let mut cursor = peak_height as usize;
    acc = hash_pair(&proof[cursor], &acc);
    cursor += 1;

    for peak in &proof[cursor..] {
        acc = hash_pair(&acc, peak);
    }

    Ok(acc == *commitment)
}
