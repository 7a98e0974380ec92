//! `BlockAllocator`/`InodeAllocator`: group-scanning policy on top of
//! [`crate::ext::group::AllocationBlockGroup`].

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::block_cache::{BlockCache, TransactionId};
use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use crate::ext::group::AllocationBlockGroup;

/// Scans groups starting at a preferred index (file locality: `inode_id /
/// inodes_per_group`), then wraps, picking the first-fit largest run
/// within a group and clipping it to `max`.
pub struct BlockAllocator {
 groups: Vec<Arc<AllocationBlockGroup>>,
 blocks_per_group: u32,
}

impl BlockAllocator {
 #[must_use]
 pub fn new(groups: Vec<Arc<AllocationBlockGroup>>, blocks_per_group: u32) -> Self {
 Self {
 groups,
 blocks_per_group,
 }
 }

 #[must_use]
 pub fn group(&self, index: u32) -> Option<&Arc<AllocationBlockGroup>> {
 self.groups.get(index as usize)
 }

 #[must_use]
 pub fn total_free(&self) -> u64 {
 self.groups.iter().map(|g| u64::from(g.free_blocks_count())).sum()
 }

 /// Allocates between `min` and `max` contiguous blocks, preferring
 /// `preferred_group`, wrapping across every group otherwise. Returns
 /// the allocation as a device-relative `(start, length)` — the caller
 /// (the volume) adds the group's base block offset.
 pub fn allocate<D: BlockDevice>(
 &self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 min: u32,
 max: u32,
 preferred_group: u32) -> FsResult<(u32, u32, u32)> {
 let n = self.groups.len() as u32;
 if n == 0 {
 return Err(Error::DeviceFull);
 }
 for offset in 0..n {
 let idx = (preferred_group + offset) % n;
 let group = &self.groups[idx as usize];
 group.ensure_block_bitmap(cache)?;
 if let Some((start, len)) = group.largest_free_run() {
 if len >= min {
 let clipped = len.min(max);
 group.allocate_blocks(cache, txn, start, clipped)?;
 return Ok((idx, start, clipped));
 }
 }
 }
 Err(Error::DeviceFull)
 }

 pub fn free<D: BlockDevice>(
 &self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 group_index: u32,
 start: u32,
 len: u32) -> FsResult<()> {
 let group = self.groups.get(group_index as usize).ok_or(Error::BadValue)?;
 group.free_blocks(cache, txn, start, len)
 }

 #[must_use]
 pub fn blocks_per_group(&self) -> u32 {
 self.blocks_per_group
 }
}

/// Mirrors [`BlockAllocator`] for inode allocation: lazily initializes a
/// group's inode bitmap, updates free-inode and (for directories)
/// used-directory counts.
pub struct InodeAllocator {
 groups: Vec<Arc<AllocationBlockGroup>>,
 inodes_per_group: u32,
}

impl InodeAllocator {
 #[must_use]
 pub fn new(groups: Vec<Arc<AllocationBlockGroup>>, inodes_per_group: u32) -> Self {
 Self {
 groups,
 inodes_per_group,
 }
 }

 /// Allocates one inode, preferring `preferred_group` (the parent
 /// directory's group, for locality), returning the global 1-based
 /// inode number.
 pub fn allocate<D: BlockDevice>(
 &self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 preferred_group: u32,
 is_dir: bool) -> FsResult<u32> {
 let n = self.groups.len() as u32;
 if n == 0 {
 return Err(Error::DeviceFull);
 }
 for offset in 0..n {
 let idx = (preferred_group + offset) % n;
 let group = &self.groups[idx as usize];
 group.ensure_inode_bitmap(cache)?;
 if group.free_inodes() == 0 {
 continue;
 }
 let local = group.allocate_inode(cache, txn, is_dir)?;
 return Ok(idx * self.inodes_per_group + local + 1);
 }
 Err(Error::DeviceFull)
 }

 pub fn free<D: BlockDevice>(
 &self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 inode_id: u32,
 is_dir: bool) -> FsResult<()> {
 let zero_based = inode_id - 1;
 let group_index = zero_based / self.inodes_per_group;
 let local = zero_based % self.inodes_per_group;
 let group = self.groups.get(group_index as usize).ok_or(Error::BadValue)?;
 group.free_inode(cache, txn, local, is_dir)
 }

 #[must_use]
 pub fn group_of(&self, inode_id: u32) -> u32 {
 (inode_id - 1) / self.inodes_per_group
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use crate::ext::layout::GroupDescriptor;
 use bytemuck::Zeroable;

 fn fixture() -> (BlockAllocator, Arc<BlockCache<MemBlockDevice>>) {
 let dev = Arc::new(MemBlockDevice::new(1024, 256));
 let cache = Arc::new(BlockCache::new(dev));
 let groups = (0..4)
.map(|i| {
 let mut desc = GroupDescriptor::zeroed();
 desc.block_bitmap_lo = i * 2 + 1;
 desc.free_blocks_count_lo = 16;
 Arc::new(AllocationBlockGroup::new(i, desc, 16, 16, false))
 })
.collect();
 (BlockAllocator::new(groups, 16), cache)
 }

 #[test]
 fn allocate_picks_largest_run_and_clips_to_max() {
 let (alloc, cache) = fixture();
 let txn = cache.start_transaction();
 let (group, start, len) = alloc.allocate(&cache, txn, 1, 4, 0).unwrap();
 assert_eq!(group, 0);
 assert_eq!(start, 0);
 assert_eq!(len, 4);
 }

 #[test]
 fn allocate_wraps_when_preferred_group_full() {
 let (alloc, cache) = fixture();
 let txn = cache.start_transaction();
 alloc.group(1).unwrap().allocate_blocks(&cache, txn, 0, 16).unwrap();
 let (group, _, _) = alloc.allocate(&cache, txn, 1, 4, 1).unwrap();
 assert_ne!(group, 1);
 }

 #[test]
 fn out_of_space_reports_device_full() {
 let (alloc, cache) = fixture();
 let txn = cache.start_transaction();
 for g in 0..4 {
 alloc.group(g).unwrap().allocate_blocks(&cache, txn, 0, 16).unwrap();
 }
 assert_eq!(alloc.allocate(&cache, txn, 1, 4, 0).unwrap_err(), Error::DeviceFull);
 }
}
