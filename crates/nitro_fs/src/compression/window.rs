//! Sliding window helpers shared by the LZ style codecs.

use byteorder::ReadBytesExt;
use std::io::Cursor;

use crate::error::{CorruptionError, Result};

const HASH_BITS: u32 = 14;
const CHAIN_LIMIT: usize = 128;
const NONE: usize = usize::MAX;

/// Shortest back-reference any of the codecs can express
pub(crate) const MIN_MATCH: usize = 3;

/// Reads one byte of a compressed stream
#[inline]
pub(crate) fn next_byte(reader: &mut Cursor<&[u8]>) -> Result<u8> {
    reader
        .read_u8()
        .map_err(|_| CorruptionError::UnexpectedEnd.into())
}

/// Appends `count` bytes copied from `distance` bytes behind the end of `out`.
///
/// The copy runs byte by byte so overlapping references repeat their pattern. Copies are cut
/// short at `limit` total bytes.
#[inline]
pub(crate) fn copy_back(
    out: &mut Vec<u8>,
    floor: usize,
    distance: usize,
    count: usize,
    limit: usize,
) -> Result<()> {
    if distance == 0 || distance > out.len() - floor {
        return Err(CorruptionError::DisplacementUnderflow {
            position: out.len() - floor,
            displacement: distance,
        }
        .into());
    }

    let count = count.min(limit.saturating_sub(out.len()));
    let start = out.len() - distance;
    for i in 0..count {
        let byte = out[start + i];
        out.push(byte);
    }
    Ok(())
}

/// Hash chained longest-match search over a fixed input
pub(crate) struct MatchFinder<'a> {
    data: &'a [u8],
    head: Vec<usize>,
    prev: Vec<usize>,
    min_distance: usize,
    max_distance: usize,
    max_length: usize,
}

impl<'a> MatchFinder<'a> {
    pub fn new(
        data: &'a [u8],
        min_distance: usize,
        max_distance: usize,
        max_length: usize,
    ) -> MatchFinder<'a> {
        MatchFinder {
            data,
            head: vec![NONE; 1 << HASH_BITS],
            prev: vec![NONE; data.len()],
            min_distance,
            max_distance,
            max_length,
        }
    }

    #[inline]
    fn hash(&self, pos: usize) -> usize {
        let d = &self.data[pos..pos + MIN_MATCH];
        let h = (d[0] as u32) << 10 ^ (d[1] as u32) << 5 ^ d[2] as u32;
        (h.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS)) as usize
    }

    /// Makes `pos` available as a match candidate for later positions
    pub fn insert(&mut self, pos: usize) {
        if pos + MIN_MATCH > self.data.len() {
            return;
        }
        let h = self.hash(pos);
        self.prev[pos] = self.head[h];
        self.head[h] = pos;
    }

    /// Inserts every position of `range`
    pub fn insert_run(&mut self, start: usize, len: usize) {
        for pos in start..start + len {
            self.insert(pos);
        }
    }

    /// Finds the longest earlier match for the data at `pos` as `(length, distance)`
    pub fn longest(&self, pos: usize) -> Option<(usize, usize)> {
        if pos + MIN_MATCH > self.data.len() {
            return None;
        }

        let max_length = self.max_length.min(self.data.len() - pos);
        let mut best = (0, 0);
        let mut candidate = self.head[self.hash(pos)];
        let mut steps = 0;

        while candidate != NONE && steps < CHAIN_LIMIT {
            let distance = pos - candidate;
            if distance > self.max_distance {
                break;
            }

            if distance >= self.min_distance {
                let length = (0..max_length)
                    .take_while(|&k| self.data[candidate + k] == self.data[pos + k])
                    .count();
                if length > best.0 {
                    best = (length, distance);
                    if length == max_length {
                        break;
                    }
                }
            }

            candidate = self.prev[candidate];
            steps += 1;
        }

        (best.0 >= MIN_MATCH).then_some(best)
    }
}

#[cfg(test)]
mod test {
    use crate::compression::window::{copy_back, MatchFinder};
    use crate::error::{CorruptionError, Error};

    #[test]
    fn overlapping_copy_repeats_pattern() {
        let mut out = b"ab".to_vec();
        copy_back(&mut out, 0, 2, 5, 100).unwrap();
        assert_eq!(out, b"abababa");
    }

    #[test]
    fn copy_is_cut_at_limit() {
        let mut out = b"x".to_vec();
        copy_back(&mut out, 0, 1, 18, 4).unwrap();
        assert_eq!(out, b"xxxx");
    }

    #[test]
    fn copy_before_start_is_rejected() {
        let mut out = b"abc".to_vec();
        let err = copy_back(&mut out, 0, 4, 3, 100).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptCompression(CorruptionError::DisplacementUnderflow {
                position: 3,
                displacement: 4
            })
        ));
    }

    #[test]
    fn finds_longest_match_respecting_min_distance() {
        let data = b"abcabcabcabc";
        let mut finder = MatchFinder::new(data, 3, 4096, 18);
        finder.insert_run(0, 3);
        assert_eq!(finder.longest(3), Some((9, 3)));

        let mut finder = MatchFinder::new(data, 4, 4096, 18);
        finder.insert_run(0, 3);
        assert_eq!(finder.longest(3), None);
    }
}
