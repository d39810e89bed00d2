//! The Golomb-Rice coded set.

use std::collections::BTreeSet;
use std::hash::Hasher;

use siphasher::sip::SipHasher24;

use crate::{
    BitReader, BitWriter, Error, Result, read_compact_size, write_compact_size,
};

/// Map a value uniform in `[0, 2^64)` to one uniform in `[0, n)` by taking
/// the upper 64 bits of the 128-bit product, computed piecewise on 32-bit
/// halves to stay inside 64-bit arithmetic.
fn map_into_range(x: u64, n: u64) -> u64 {
    let x_hi = x >> 32;
    let x_lo = x & 0xFFFF_FFFF;
    let n_hi = n >> 32;
    let n_lo = n & 0xFFFF_FFFF;

    let ac = x_hi * n_hi;
    let ad = x_hi * n_lo;
    let bc = x_lo * n_hi;
    let bd = x_lo * n_lo;

    let mid34 = (bd >> 32) + (bc & 0xFFFF_FFFF) + (ad & 0xFFFF_FFFF);
    ac + (bc >> 32) + (ad >> 32) + (mid34 >> 32)
}

fn golomb_rice_encode(writer: &mut BitWriter, p: u8, value: u64) {
    // Unary quotient: q one-bits then a zero terminator.
    let mut quotient = value >> p;
    while quotient > 0 {
        let nbits = quotient.min(64) as u32;
        writer.write(u64::MAX, nbits);
        quotient -= nbits as u64;
    }
    writer.write(0, 1);

    // The remainder is the bottom p bits of the value; no masking needed.
    writer.write(value, p as u32);
}

fn golomb_rice_decode(reader: &mut BitReader, p: u8) -> Result<u64> {
    let mut quotient = 0u64;
    while reader.read(1)? == 1 {
        quotient += 1;
    }
    let remainder = reader.read(p as u32)?;
    Ok((quotient << p) + remainder)
}

/// A Golomb-Rice coded probabilistic set with false-positive rate `2^-P`.
///
/// Immutable once constructed; matching decodes the stored encoding on the
/// fly. The encoding is validated completely at construction, including by
/// [`GcsFilter::from_encoded`], so matching itself cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsFilter {
    siphash_k0: u64,
    siphash_k1: u64,
    p: u8,
    n: u64,
    f: u64,
    encoded: Vec<u8>,
}

impl GcsFilter {
    /// Build a filter over a set of elements.
    pub fn new(
        siphash_k0: u64,
        siphash_k1: u64,
        p: u8,
        elements: &BTreeSet<Vec<u8>>,
    ) -> Result<Self> {
        if p > 32 {
            return Err(Error::InvalidP(p));
        }
        let n = elements.len() as u64;
        if n >= 1 << 32 {
            return Err(Error::InvalidN(n));
        }
        let f = n << p;

        let mut encoded = Vec::new();
        write_compact_size(&mut encoded, n);

        if !elements.is_empty() {
            let mut writer = BitWriter::new(&mut encoded);
            let mut last_value = 0;
            for value in hashed_set(siphash_k0, siphash_k1, f, elements.iter()) {
                golomb_rice_encode(&mut writer, p, value - last_value);
                last_value = value;
            }
            writer.flush();
        }

        Ok(GcsFilter {
            siphash_k0,
            siphash_k1,
            p,
            n,
            f,
            encoded,
        })
    }

    /// Reconstruct a filter from its encoding, validating it fully:
    /// exactly `N` deltas must decode and nothing may trail them.
    pub fn from_encoded(
        siphash_k0: u64,
        siphash_k1: u64,
        p: u8,
        encoded: Vec<u8>,
    ) -> Result<Self> {
        if p > 32 {
            return Err(Error::InvalidP(p));
        }

        let mut cursor = 0;
        let n = read_compact_size(&encoded, &mut cursor)?;
        if n >= 1 << 32 {
            return Err(Error::InvalidN(n));
        }

        let mut reader = BitReader::new(&encoded[cursor..]);
        for _ in 0..n {
            golomb_rice_decode(&mut reader, p)?;
        }
        reader.expect_exhausted()?;

        Ok(GcsFilter {
            siphash_k0,
            siphash_k1,
            p,
            n,
            f: n << p,
            encoded,
        })
    }

    /// Number of elements committed to.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// The false-positive exponent.
    pub fn p(&self) -> u8 {
        self.p
    }

    /// The serialized filter: a compact-size element count followed by the
    /// Golomb-Rice coded deltas.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Consume the filter, yielding its encoding.
    pub fn into_encoded(self) -> Vec<u8> {
        self.encoded
    }

    fn hash_to_range(&self, element: &[u8]) -> u64 {
        hash_element(self.siphash_k0, self.siphash_k1, self.f, element)
    }

    // The construction-time validation makes decode failures unreachable;
    // treat any as a non-match.
    fn elements_reader(&self) -> Result<(u64, BitReader<'_>)> {
        let mut cursor = 0;
        let n = read_compact_size(&self.encoded, &mut cursor)?;
        debug_assert_eq!(n, self.n);
        Ok((n, BitReader::new(&self.encoded[cursor..])))
    }

    /// Whether `element` may be in the set. False positives occur at rate
    /// `2^-P`; false negatives never.
    pub fn matches(&self, element: &[u8]) -> bool {
        let query = self.hash_to_range(element);
        self.match_query(query).unwrap_or(false)
    }

    fn match_query(&self, query: u64) -> Result<bool> {
        let (n, mut reader) = self.elements_reader()?;
        let mut value = 0u64;
        for _ in 0..n {
            value += golomb_rice_decode(&mut reader, self.p)?;
            if query == value {
                return Ok(true);
            } else if query < value {
                break;
            }
        }
        Ok(false)
    }

    /// Whether any of `elements` may be in the set. One pass over the
    /// encoding regardless of the query count.
    pub fn matches_any(&self, elements: &BTreeSet<Vec<u8>>) -> bool {
        let queries = hashed_set(
            self.siphash_k0,
            self.siphash_k1,
            self.f,
            elements.iter(),
        );
        self.match_queries(&queries).unwrap_or(false)
    }

    fn match_queries(&self, queries: &[u64]) -> Result<bool> {
        let (n, mut reader) = self.elements_reader()?;
        let mut value = 0u64;
        let mut query_iter = queries.iter().peekable();
        for _ in 0..n {
            value += golomb_rice_decode(&mut reader, self.p)?;
            loop {
                match query_iter.peek() {
                    None => return Ok(false),
                    Some(query) if **query == value => return Ok(true),
                    Some(query) if **query > value => break,
                    Some(_) => {
                        query_iter.next();
                    }
                }
            }
        }
        Ok(false)
    }
}

/// SipHash-2-4 an element and map it into `[0, f)`.
fn hash_element(k0: u64, k1: u64, f: u64, element: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(element);
    map_into_range(hasher.finish(), f)
}

/// Hash every element into `[0, f)` and sort ascending.
fn hashed_set<'a>(
    k0: u64,
    k1: u64,
    f: u64,
    elements: impl Iterator<Item = &'a Vec<u8>>,
) -> Vec<u64> {
    let mut hashed: Vec<u64> = elements.map(|e| hash_element(k0, k1, f, e)).collect();
    hashed.sort_unstable();
    hashed
}
