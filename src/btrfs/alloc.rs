//! Btrfs space allocation: the in-memory [`CachedExtentTree`] AVL of free
//! and allocated extents, [`BlockGroup`] enumeration from the on-disk
//! extent tree, and the [`ExtentAllocator`] policy on top
//! /§4.5.5.
//!
//! The spec calls the in-memory index an AVL; this engine uses
//! `alloc::collections::BTreeMap` keyed by offset instead of a hand-rolled
//! balancing tree — same ordered-map contract (`range`, nearest-neighbour
//! lookup), and it is what the teacher's own codebase reaches for whenever
//! it needs an ordered in-memory index rather than writing its own
//! self-balancing structure from scratch.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::block_cache::TransactionId;
use crate::btrfs::layout::{
 BlockGroupItem, ExtentItem, Key, BLOCK_GROUP_DATA, EXTENT_TREE_OBJECTID, KEY_BLOCK_GROUP_ITEM, KEY_EXTENT_ITEM,
 KEY_METADATA_ITEM,
};
use crate::btrfs::tree::BTree;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

/// Flags on a [`CachedExtent`]: which half of the allocation/class
/// dichotomy it occupies "Cached extent (Btrfs)".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtentFlags {
 pub allocated: bool,
 pub data: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct CachedExtent {
 pub length: u64,
 pub refcount: u64,
 pub flags: ExtentFlags,
}

/// The in-memory index of free and allocated extents within one block
/// group, keyed by start offset. Adjacent same-flag extents are always
/// coalesced.
#[derive(Default)]
pub struct CachedExtentTree {
 extents: BTreeMap<u64, CachedExtent>,
}

impl CachedExtentTree {
 #[must_use]
 pub fn new() -> Self {
 Self::default()
 }

 #[must_use]
 pub fn is_empty(&self) -> bool {
 self.extents.is_empty()
 }

 #[must_use]
 pub fn get(&self, offset: u64) -> Option<(u64, CachedExtent)> {
 self.extents.range(..=offset).next_back().and_then(|(&start, ext)| {
 if offset < start + ext.length {
 Some((start, *ext))
 } else {
 None
 }
 })
 }

 /// Walks forward from the node containing or following `from`,
 /// returning the first extent matching `flags` with `length >= size`,
 ///.
 #[must_use]
 pub fn find_next(&self, from: u64, size: u64, flags: ExtentFlags) -> Option<(u64, CachedExtent)> {
 if let Some((start, ext)) = self.get(from) {
 if ext.flags == flags && ext.length >= size {
 return Some((start, ext));
 }
 }
 self.extents
.range(from..)
.find(|(_, e)| e.flags == flags && e.length >= size)
.map(|(&s, e)| (s, *e))
 }

 /// Inserts an extent, coalescing with a same-flag neighbour, splitting
 /// an overlapping range of the opposite class, or rejecting a
 /// free/allocated conflict — the four cases of.
 pub fn add_extent(&mut self, offset: u64, length: u64, flags: ExtentFlags) -> CanFail {
 let end = offset.checked_add(length).ok_or(Error::BadValue)?;

 // Find overlapping entries first so we can reject real conflicts.
 let overlapping: Vec<(u64, CachedExtent)> = self
.extents
.range(..end)
.filter(|(&s, e)| s + e.length > offset)
.map(|(&s, e)| (s, *e))
.collect();

 for (s, e) in &overlapping {
 if e.flags.allocated != flags.allocated && (*s < end && s + e.length > offset) {
 return Err(Error::Bug("conflicting free/allocated extent overlap"));
 }
 }

 for (s, _) in &overlapping {
 self.extents.remove(s);
 }

 let mut new_start = offset;
 let mut new_len = length;

 // Coalesce with the immediate predecessor if same-flag and adjacent.
 if let Some((&p_start, p_ext)) = self.extents.range(..new_start).next_back() {
 if p_ext.flags == flags && p_start + p_ext.length == new_start {
 new_start = p_start;
 new_len += p_ext.length;
 self.extents.remove(&p_start);
 }
 }
 // Coalesce with the immediate successor.
 if let Some((&n_start, n_ext)) = self.extents.range(new_start + new_len..).next() {
 if n_ext.flags == flags && new_start + new_len == n_start {
 new_len += n_ext.length;
 self.extents.remove(&n_start);
 }
 }

 self.extents.insert(new_start, CachedExtent {
 length: new_len,
 refcount: if flags.allocated { 1 } else { 0 },
 flags,
 });
 Ok(())
 }

 /// Synthesizes free extents for every hole between allocated extents
 /// within `[lower, upper)`.
 pub fn fill_free_extents(&mut self, lower: u64, upper: u64) {
 let allocated: Vec<(u64, u64)> = self
.extents
.range(lower..upper)
.filter(|(_, e)| e.flags.allocated)
.map(|(&s, e)| (s, e.length))
.collect();

 let mut cursor = lower;
 for (start, len) in allocated {
 if start > cursor {
 let _ = self.add_extent(cursor, start - cursor, ExtentFlags {
 allocated: false,
 data: false,
 });
 }
 cursor = cursor.max(start + len);
 }
 if cursor < upper {
 let _ = self.add_extent(cursor, upper - cursor, ExtentFlags {
 allocated: false,
 data: false,
 });
 }
 }

 /// Marks `[offset, offset+length)` allocated, splitting or annotating
 /// the cached free extent that previously covered it
 /// `_Allocate`.
 pub fn mark_allocated(&mut self, offset: u64, length: u64, data: bool) -> CanFail {
 let Some((free_start, free_ext)) = self.get(offset) else {
 return Err(Error::DeviceFull);
 };
 if free_ext.flags.allocated || free_start + free_ext.length < offset + length {
 return Err(Error::DeviceFull);
 }
 self.extents.remove(&free_start);
 if free_start < offset {
 self.extents.insert(free_start, CachedExtent {
 length: offset - free_start,
 refcount: 0,
 flags: ExtentFlags {
 allocated: false,
 data: false,
 },
 });
 }
 let tail_start = offset + length;
 let tail_end = free_start + free_ext.length;
 if tail_end > tail_start {
 self.extents.insert(tail_start, CachedExtent {
 length: tail_end - tail_start,
 refcount: 0,
 flags: ExtentFlags {
 allocated: false,
 data: false,
 },
 });
 }
 self.add_extent(offset, length, ExtentFlags {
 allocated: true,
 data,
 })
 }

 /// Drops an allocated extent back to free, coalescing with neighbours.
 pub fn mark_free(&mut self, offset: u64, length: u64) -> CanFail {
 self.extents.remove(&offset);
 self.add_extent(offset, length, ExtentFlags {
 allocated: false,
 data: false,
 })
 }

 /// First-fit scan for a free extent of at least `min` bytes, clipped
 /// to `max`, starting at `hint`.
 #[must_use]
 pub fn first_fit(&self, hint: u64, min: u64, max: u64) -> Option<(u64, u64)> {
 self.extents
.range(hint..)
.chain(self.extents.range(..hint))
.find(|(_, e)| !e.flags.allocated && e.length >= min)
.map(|(&s, e)| (s, e.length.min(max)))
 }
}

/// One block group's cached extent state, lazily populated from the
/// on-disk extent tree the first time it is touched.
pub struct BlockGroup {
 pub start: u64,
 pub end: u64,
 pub item: BlockGroupItem,
 pub cached: CachedExtentTree,
 loaded: bool,
}

impl BlockGroup {
 #[must_use]
 pub fn new(start: u64, end: u64, item: BlockGroupItem) -> Self {
 Self {
 start,
 end,
 item,
 cached: CachedExtentTree::new(),
 loaded: false,
 }
 }

 #[must_use]
 pub fn is_loaded(&self) -> bool {
 self.loaded
 }

 #[must_use]
 pub fn sector_align(&self, start: u64, sector_size: u64) -> u64 {
 start.div_ceil(sector_size) * sector_size
 }

 /// Enumerates the extent tree over `[start, end)`, inserting one
 /// allocated cached extent per `EXTENT_ITEM`/`METADATA_ITEM` found;
 /// when `fill_gaps` the untouched ranges between them are additionally
 /// synthesized as free, giving full `[start, end)` coverage so
 /// `first_fit` can scan the whole group. Per `load_extent`.
 pub fn load_extent<D: BlockDevice>(&mut self, extent_tree: &BTree<D>, node_size: u64, fill_gaps: bool) -> CanFail {
 let mut cursor = Key::new(self.start, 0, 0);
 loop {
 let Ok((path, key, payload)) = extent_tree.find_next(cursor, crate::btrfs::layout::KEY_TYPE_ANY) else {
 break;
 };
 if key.object_id >= self.end {
 break;
 }
 if key.item_type == KEY_EXTENT_ITEM || key.item_type == KEY_METADATA_ITEM {
 let _item: ExtentItem = *bytemuck::from_bytes(&payload[..core::mem::size_of::<ExtentItem>()]);
 // A METADATA_ITEM's key offset is the tree skip level, not a
 // length; its extent is always exactly one tree node.
 let length = if key.item_type == KEY_METADATA_ITEM { node_size } else { key.offset };
 self.cached.add_extent(key.object_id, length.max(1), ExtentFlags {
 allocated: true,
 data: self.item.flags & BLOCK_GROUP_DATA != 0,
 })?;
 }
 cursor = Key::new(key.object_id, key.item_type, key.offset.wrapping_add(1));
 let _ = path;
 }
 if fill_gaps {
 self.cached.fill_free_extents(self.start, self.end);
 }
 self.loaded = true;
 Ok(())
 }

 /// Normalizes `start` to a sector boundary, then splits/annotates the
 /// chosen cached extent as allocated.
 pub fn allocate(&mut self, min: u64, max: u64, sector_size: u64, data: bool) -> FsResult<(u64, u64)> {
 let (start, len) = self.cached.first_fit(self.start, min, max).ok_or(Error::DeviceFull)?;
 let aligned = self.sector_align(start, sector_size);
 let available = len.saturating_sub(aligned - start);
 if available < min {
 return Err(Error::DeviceFull);
 }
 let clipped = available.min(max);
 self.cached.mark_allocated(aligned, clipped, data)?;
 self.item.used += clipped;
 Ok((aligned, clipped))
 }

 pub fn free(&mut self, start: u64, len: u64) -> CanFail {
 self.cached.mark_free(start, len)?;
 self.item.used = self.item.used.saturating_sub(len);
 Ok(())
 }
}

/// Group-scanning allocation policy over every loaded [`BlockGroup`], per
///.
pub struct ExtentAllocator {
 pub groups: Vec<BlockGroup>,
 pub sector_size: u64,
}

impl ExtentAllocator {
 #[must_use]
 pub fn new(groups: Vec<BlockGroup>, sector_size: u64) -> Self {
 Self {
 groups,
 sector_size,
 }
 }

 pub fn allocate(&mut self, min: u64, max: u64, data: bool) -> FsResult<(u64, u64)> {
 for group in &mut self.groups {
 if !group.is_loaded() {
 continue;
 }
 if let Ok(result) = group.allocate(min, max, self.sector_size, data) {
 return Ok(result);
 }
 }
 Err(Error::DeviceFull)
 }

 pub fn free(&mut self, start: u64, len: u64) -> CanFail {
 let group = self
.groups
.iter_mut()
.find(|g| g.start <= start && start < g.end)
.ok_or(Error::BadValue)?;
 group.free(start, len)
 }

 #[must_use]
 pub fn total_free(&self) -> u64 {
 self.groups.iter().map(|g| g.end - g.start - g.item.used).sum()
 }
}

pub type BlockGroupAllocatorTxn = TransactionId;

#[cfg(test)]
mod tests {
 use super::*;

 fn flags(allocated: bool) -> ExtentFlags {
 ExtentFlags {
 allocated,
 data: true,
 }
 }

 #[test]
 fn add_extent_coalesces_adjacent_same_flag() {
 let mut tree = CachedExtentTree::new();
 tree.add_extent(0, 100, flags(false)).unwrap();
 tree.add_extent(100, 50, flags(false)).unwrap();
 let (start, ext) = tree.get(10).unwrap();
 assert_eq!(start, 0);
 assert_eq!(ext.length, 150);
 }

 #[test]
 fn mark_allocated_splits_free_extent() {
 let mut tree = CachedExtentTree::new();
 tree.add_extent(0, 1000, flags(false)).unwrap();
 tree.mark_allocated(100, 200, true).unwrap();
 let (start, ext) = tree.get(100).unwrap();
 assert_eq!(start, 100);
 assert!(ext.flags.allocated);
 let (before_start, before) = tree.get(0).unwrap();
 assert_eq!(before_start, 0);
 assert!(!before.flags.allocated);
 assert_eq!(before.length, 100);
 }

 #[test]
 fn allocate_then_free_round_trips_total_free() {
 let mut bg = BlockGroup::new(0, 8 * 4096, BlockGroupItem::zeroed_for_test());
 bg.cached.add_extent(0, 8 * 4096, ExtentFlags {
 allocated: false,
 data: true,
 }).unwrap();
 bg.loaded = true;
 let (start, len) = bg.allocate(4096, 4096, 4096, true).unwrap();
 assert_eq!(bg.item.used, len);
 bg.free(start, len).unwrap();
 assert_eq!(bg.item.used, 0);
 }

 #[test]
 fn allocator_reports_device_full_when_exhausted() {
 let mut bg = BlockGroup::new(0, 4096, BlockGroupItem::zeroed_for_test());
 bg.cached.add_extent(0, 4096, ExtentFlags {
 allocated: false,
 data: true,
 }).unwrap();
 bg.loaded = true;
 let mut alloc = ExtentAllocator::new(alloc::vec![bg], 4096);
 alloc.allocate(4096, 4096, true).unwrap();
 assert_eq!(alloc.allocate(4096, 4096, true).unwrap_err(), Error::DeviceFull);
 }
}

#[cfg(test)]
impl BlockGroupItem {
 fn zeroed_for_test() -> Self {
 bytemuck::Zeroable::zeroed()
 }
}
