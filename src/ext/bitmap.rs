//! `BitmapBlock`: bit-level free-space tracking over a single pinned block.
//!
//! Backed by [`vob::Vob`], the same "vector of bits with a `Vec`-like API"
//! crate the teacher kernel's own `BlockBitmap`/`InodeBitmap` wrap — only
//! generalized here to cover both block and inode bitmaps through one type,
//! since the two differ only in what their bit index means.

use alloc::vec::Vec;
use core::ops::Range;

use vob::Vob;

/// A bitmap block: one bit per block/inode in the covering group, `1` means
/// in-use. `length` is the number of *meaningful* bits (the tail of the
/// block beyond the group's block/inode count is padding, conventionally
/// all-ones, and never consulted).
pub struct BitmapBlock {
 bits: Vob,
 length: usize,
}

impl BitmapBlock {
 #[must_use]
 pub fn from_block(block: &[u8], length: usize) -> Self {
 Self {
 bits: Vob::from_bytes(block),
 length,
 }
 }

 #[must_use]
 pub fn to_block(&self, block_size: usize) -> Vec<u8> {
 let mut out = self.bits.get_storage().iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>();
 out.resize(block_size, 0xFF);
 out
 }

 #[must_use]
 pub fn len(&self) -> usize {
 self.length
 }

 #[must_use]
 pub fn is_empty(&self) -> bool {
 self.length == 0
 }

 #[must_use]
 pub fn is_marked(&self, bit: usize) -> bool {
 self.bits.get(bit).unwrap_or(true)
 }

 /// Checks that every bit in `start..start+len` is marked (in-use).
 #[must_use]
 pub fn check_marked(&self, start: usize, len: usize) -> bool {
 (start..start + len).all(|b| self.is_marked(b))
 }

 /// Checks that every bit in `start..start+len` is unmarked (free).
 #[must_use]
 pub fn check_unmarked(&self, start: usize, len: usize) -> bool {
 (start..start + len).all(|b| !self.is_marked(b))
 }

 /// Marks `start..start+len` in-use. Unless `force`, requires the range
 /// to be currently all-clear (catches double-allocation bugs early).
 pub fn mark(&mut self, start: usize, len: usize, force: bool) -> bool {
 if !force && !self.check_unmarked(start, len) {
 return false;
 }
 self.bits.set_bit_range(start..start + len);
 true
 }

 /// Unmarks `start..start+len` (frees it). Unless `force`, requires the
 /// range to be currently all-set.
 pub fn unmark(&mut self, start: usize, len: usize, force: bool) -> bool {
 if !force && !self.check_marked(start, len) {
 return false;
 }
 self.bits.clear_bit_range(start..start + len);
 true
 }

 #[must_use]
 pub fn find_next_unmarked(&self, from: usize) -> Option<usize> {
 self.bits.iter_unset_bits(from..self.length).next()
 }

 #[must_use]
 pub fn find_next_marked(&self, from: usize) -> Option<usize> {
 (from..self.length).find(|&b| self.is_marked(b))
 }

 #[must_use]
 pub fn count_unmarked(&self) -> usize {
 self.bits.iter_unset_bits(0..self.length).count()
 }

 /// The largest contiguous run of unmarked bits within `range`, as
 /// `(start, length)`. Tracks a running best across word boundaries by
 /// counting trailing unset bits of the previous word chained with
 /// leading unset bits of the next.
 #[must_use]
 pub fn find_largest_unmarked_range(&self, range: Range<usize>) -> Option<(usize, usize)> {
 let mut best: Option<(usize, usize)> = None;
 let mut run_start: Option<usize> = None;

 for bit in range.clone() {
 if self.is_marked(bit) {
 if let Some(start) = run_start.take() {
 let len = bit - start;
 if best.map_or(true, |(_, best_len)| len > best_len) {
 best = Some((start, len));
 }
 }
 } else if run_start.is_none() {
 run_start = Some(bit);
 }
 }
 if let Some(start) = run_start {
 let len = range.end - start;
 if best.map_or(true, |(_, best_len)| len > best_len) {
 best = Some((start, len));
 }
 }
 best
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 fn empty_bitmap(bits: usize) -> BitmapBlock {
 let bytes = alloc::vec![0u8; bits.div_ceil(8).max(4)];
 BitmapBlock::from_block(&bytes, bits)
 }

 #[test]
 fn mark_and_unmark_round_trip() {
 let mut bm = empty_bitmap(64);
 assert!(bm.mark(4, 8, false));
 assert!(bm.check_marked(4, 8));
 assert!(bm.unmark(4, 8, false));
 assert!(bm.check_unmarked(4, 8));
 }

 #[test]
 fn refuses_double_allocation_without_force() {
 let mut bm = empty_bitmap(32);
 assert!(bm.mark(0, 4, false));
 assert!(!bm.mark(2, 4, false));
 assert!(bm.mark(2, 4, true));
 }

 #[test]
 fn largest_unmarked_range_spans_words() {
 let mut bm = empty_bitmap(128);
 bm.mark(0, 10, false);
 bm.mark(40, 5, false);
 let (start, len) = bm.find_largest_unmarked_range(0..128).unwrap();
 assert_eq!(start, 45);
 assert_eq!(len, 83);
 }

 #[test]
 fn find_next_unmarked_skips_marked_prefix() {
 let mut bm = empty_bitmap(32);
 bm.mark(0, 5, false);
 assert_eq!(bm.find_next_unmarked(0), Some(5));
 }
}
