//! `AllocationBlockGroup`: the in-memory state of one Ext block group —
//! its descriptor, block bitmap and inode bitmap, plus the transaction-
//! scoped locking asks for so a group's counters can be rolled
//! back wholesale if the owning transaction aborts.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::{Mutex, RwLock};

use crate::block_cache::{BlockCache, TransactionEvent, TransactionId, TransactionListener};
use crate::checksum::{crc16, crc32c_seeded};
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::ext::bitmap::BitmapBlock;
use crate::ext::layout::{GroupDescriptor, GROUP_DESC_FLAG_BLOCK_UNINIT, GROUP_DESC_FLAG_INODE_UNINIT};

/// Snapshot of the counters that must be restored verbatim if a mutating
/// transaction aborts after touching this group.
#[derive(Clone, Copy)]
struct Counters {
 free_blocks: u32,
 free_inodes: u32,
 used_dirs: u32,
}

struct Inner {
 desc: GroupDescriptor,
 block_bitmap: Option<BitmapBlock>,
 inode_bitmap: Option<BitmapBlock>,
 /// The transaction currently holding the group's scoped lock, and the
 /// pre-transaction counters to restore on abort.
 txn_scope: Option<(TransactionId, Counters)>,
}

pub struct AllocationBlockGroup {
 index: u32,
 blocks_per_group: u32,
 inodes_per_group: u32,
 block_bitmap_block: u64,
 inode_bitmap_block: u64,
 wide: bool,
 state: Mutex<Inner>,
 /// Pre-transaction counters, confirmed or restored by
 /// [`TransactionListener::transaction_done`].
 pending: RwLock<Option<Counters>>,
}

impl AllocationBlockGroup {
 #[must_use]
 pub fn new(
 index: u32,
 desc: GroupDescriptor,
 blocks_per_group: u32,
 inodes_per_group: u32,
 wide: bool) -> Self {
 Self {
 index,
 blocks_per_group,
 inodes_per_group,
 block_bitmap_block: desc.block_bitmap(wide),
 inode_bitmap_block: desc.inode_bitmap(wide),
 wide,
 state: Mutex::new(Inner {
 desc,
 block_bitmap: None,
 inode_bitmap: None,
 txn_scope: None,
 }),
 pending: RwLock::new(None),
 }
 }

 #[must_use]
 pub fn index(&self) -> u32 {
 self.index
 }

 #[must_use]
 pub fn free_blocks_count(&self) -> u32 {
 self.state.lock().desc.free_blocks_count(self.wide)
 }

 #[must_use]
 pub fn free_inodes(&self) -> u32 {
 self.state.lock().desc.free_inodes_count(self.wide)
 }

 #[must_use]
 pub fn descriptor(&self) -> GroupDescriptor {
 self.state.lock().desc
 }

 /// Loads (or lazily synthesizes, per `BLOCK_UNINIT`) the block bitmap,
 /// scanning it once to cross-check the on-disk free count per spec
 /// §4.5.2.
 pub fn ensure_block_bitmap<D: BlockDevice>(&self, cache: &BlockCache<D>) -> FsResult<()> {
 let mut inner = self.state.lock();
 if inner.block_bitmap.is_some() {
 return Ok(());
 }
 let bitmap = if inner.desc.flags & GROUP_DESC_FLAG_BLOCK_UNINIT != 0 {
 BitmapBlock::from_block(&alloc::vec![0u8; cache.block_size() as usize], self.blocks_per_group as usize)
 } else {
 let block = cache.get(self.block_bitmap_block)?;
 BitmapBlock::from_block(&block, self.blocks_per_group as usize)
 };
 let scanned_free = bitmap.count_unmarked() as u32;
 if !inner.desc.block_uninit() && scanned_free != inner.desc.free_blocks_count(self.wide) {
 log::warn!("ext: group {} block bitmap free count mismatch", self.index);
 }
 inner.block_bitmap = Some(bitmap);
 Ok(())
 }

 pub fn ensure_inode_bitmap<D: BlockDevice>(&self, cache: &BlockCache<D>) -> FsResult<()> {
 let mut inner = self.state.lock();
 if inner.inode_bitmap.is_some() {
 return Ok(());
 }
 let bitmap = if inner.desc.flags & GROUP_DESC_FLAG_INODE_UNINIT != 0 {
 BitmapBlock::from_block(&alloc::vec![0u8; cache.block_size() as usize], self.inodes_per_group as usize)
 } else {
 let block = cache.get(self.inode_bitmap_block)?;
 BitmapBlock::from_block(&block, self.inodes_per_group as usize)
 };
 inner.inode_bitmap = Some(bitmap);
 Ok(())
 }

 /// Registers this group as a listener on `txn` the first time it is
 /// mutated under that transaction, snapshotting counters so a later
 /// abort can restore them.
 fn enter_txn_scope<D: BlockDevice>(self: &Arc<Self>, cache: &BlockCache<D>, txn: TransactionId) {
 let mut inner = self.state.lock();
 if inner.txn_scope.map(|(t, _)| t) == Some(txn) {
 return;
 }
 let counters = Counters {
 free_blocks: inner.desc.free_blocks_count(self.wide),
 free_inodes: inner.desc.free_inodes_count(self.wide),
 used_dirs: u32::from(inner.desc.used_dirs_count_lo),
 };
 inner.txn_scope = Some((txn, counters));
 drop(inner);
 *self.pending.write() = Some(counters);
 let _ = cache.add_transaction_listener(txn, self.clone());
 }

 /// Allocates `len` blocks starting at `start` (relative to this
 /// group), marking the bitmap and decrementing the free count.
 pub fn allocate_blocks<D: BlockDevice>(
 self: &Arc<Self>,
 cache: &BlockCache<D>,
 txn: TransactionId,
 start: u32,
 len: u32) -> CanFail {
 self.ensure_block_bitmap(cache)?;
 self.enter_txn_scope(cache, txn);
 let mut inner = self.state.lock();
 let ok = inner
.block_bitmap
.as_mut()
.expect("bitmap loaded above")
.mark(start as usize, len as usize, inner.desc.block_uninit());
 if !ok {
 return Err(Error::Bug("double allocation of ext block range"));
 }
 inner.desc.flags &= !GROUP_DESC_FLAG_BLOCK_UNINIT;
 let free = inner.desc.free_blocks_count(self.wide) - len;
 self.set_free_blocks(&mut inner, free);
 self.write_block_bitmap(cache, txn, &inner)?;
 self.write_descriptor(&mut inner);
 Ok(())
 }

 pub fn free_blocks<D: BlockDevice>(
 self: &Arc<Self>,
 cache: &BlockCache<D>,
 txn: TransactionId,
 start: u32,
 len: u32) -> CanFail {
 self.ensure_block_bitmap(cache)?;
 self.enter_txn_scope(cache, txn);
 let mut inner = self.state.lock();
 inner.block_bitmap.as_mut().expect("bitmap loaded above").unmark(start as usize, len as usize, false);
 let free = inner.desc.free_blocks_count(self.wide) + len;
 self.set_free_blocks(&mut inner, free);
 self.write_block_bitmap(cache, txn, &inner)?;
 self.write_descriptor(&mut inner);
 Ok(())
 }

 pub fn allocate_inode<D: BlockDevice>(
 self: &Arc<Self>,
 cache: &BlockCache<D>,
 txn: TransactionId,
 is_dir: bool) -> FsResult<u32> {
 self.ensure_inode_bitmap(cache)?;
 self.enter_txn_scope(cache, txn);
 let mut inner = self.state.lock();
 let bitmap = inner.inode_bitmap.as_mut().expect("bitmap loaded above");
 let idx = bitmap.find_next_unmarked(0).ok_or(Error::DeviceFull)?;
 bitmap.mark(idx, 1, inner.desc.inode_uninit());
 inner.desc.flags &= !GROUP_DESC_FLAG_INODE_UNINIT;
 let free = inner.desc.free_inodes_count(self.wide) - 1;
 self.set_free_inodes(&mut inner, free);
 if is_dir {
 inner.desc.used_dirs_count_lo += 1;
 }
 self.write_inode_bitmap(cache, txn, &inner)?;
 self.write_descriptor(&mut inner);
 Ok(idx as u32)
 }

 pub fn free_inode<D: BlockDevice>(
 self: &Arc<Self>,
 cache: &BlockCache<D>,
 txn: TransactionId,
 local_index: u32,
 is_dir: bool) -> CanFail {
 self.ensure_inode_bitmap(cache)?;
 self.enter_txn_scope(cache, txn);
 let mut inner = self.state.lock();
 inner.inode_bitmap.as_mut().expect("bitmap loaded above").unmark(local_index as usize, 1, false);
 let free = inner.desc.free_inodes_count(self.wide) + 1;
 self.set_free_inodes(&mut inner, free);
 if is_dir {
 inner.desc.used_dirs_count_lo = inner.desc.used_dirs_count_lo.saturating_sub(1);
 }
 self.write_inode_bitmap(cache, txn, &inner)?;
 self.write_descriptor(&mut inner);
 Ok(())
 }

 #[must_use]
 pub fn largest_free_run(&self) -> Option<(u32, u32)> {
 let inner = self.state.lock();
 let bitmap = inner.block_bitmap.as_ref()?;
 bitmap
.find_largest_unmarked_range(0..self.blocks_per_group as usize)
.map(|(s, l)| (s as u32, l as u32))
 }

 fn set_free_blocks(&self, inner: &mut Inner, free: u32) {
 inner.desc.free_blocks_count_lo = (free & 0xFFFF) as u16;
 if self.wide {
 inner.desc.free_blocks_count_hi = (free >> 16) as u16;
 }
 }

 fn set_free_inodes(&self, inner: &mut Inner, free: u32) {
 inner.desc.free_inodes_count_lo = (free & 0xFFFF) as u16;
 if self.wide {
 inner.desc.free_inodes_count_hi = (free >> 16) as u16;
 }
 }

 fn write_block_bitmap<D: BlockDevice>(&self, cache: &BlockCache<D>, txn: TransactionId, inner: &Inner) -> CanFail {
 let bytes = inner.block_bitmap.as_ref().expect("loaded").to_block(cache.block_size() as usize);
 cache.mark_dirty(self.block_bitmap_block, bytes, txn)
 }

 fn write_inode_bitmap<D: BlockDevice>(&self, cache: &BlockCache<D>, txn: TransactionId, inner: &Inner) -> CanFail {
 let bytes = inner.inode_bitmap.as_ref().expect("loaded").to_block(cache.block_size() as usize);
 cache.mark_dirty(self.inode_bitmap_block, bytes, txn)
 }

 /// Recomputes the descriptor's split checksum (CRC-16, or CRC-32C's low
 /// 16 bits when the meta-group-checksum ro-compat feature is set) per
 ///. The group-descriptor table block itself is written back
 /// by the volume, which batches every group's descriptor into one block.
 fn write_descriptor(&self, inner: &mut Inner) {
 inner.desc.checksum = 0;
 let bytes: &[u8] = bytemuck::bytes_of(&inner.desc);
 inner.desc.checksum = crc16(bytes);
 }

 /// Recomputes the CRC-32C variant of the descriptor checksum, used
 /// instead of CRC-16 when the metadata-checksum feature is enabled,
 /// seeded with the filesystem UUID and this group's index.
 pub fn checksum_metadata(&self, uuid: &[u8; 16]) {
 let mut inner = self.state.lock();
 inner.desc.checksum = 0;
 let mut seed = crc32c_seeded(0xFFFF_FFFF, uuid);
 seed = crc32c_seeded(seed, &self.index.to_le_bytes());
 let bytes: &[u8] = bytemuck::bytes_of(&inner.desc);
 let full = crc32c_seeded(seed, bytes);
 inner.desc.checksum = (full & 0xFFFF) as u16;
 }
}

impl TransactionListener for AllocationBlockGroup {
 fn transaction_done(&self, _event: TransactionEvent, success: bool) {
 let mut inner = self.state.lock();
 if !success {
 if let Some(counters) = *self.pending.read() {
 inner.desc.free_blocks_count_lo = (counters.free_blocks & 0xFFFF) as u16;
 if self.wide {
 inner.desc.free_blocks_count_hi = (counters.free_blocks >> 16) as u16;
 }
 inner.desc.free_inodes_count_lo = (counters.free_inodes & 0xFFFF) as u16;
 if self.wide {
 inner.desc.free_inodes_count_hi = (counters.free_inodes >> 16) as u16;
 }
 inner.desc.used_dirs_count_lo = counters.used_dirs as u16;
 }
 }
 inner.txn_scope = None;
 drop(inner);
 *self.pending.write() = None;
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use bytemuck::Zeroable;

 fn fresh_group() -> (Arc<AllocationBlockGroup>, Arc<BlockCache<MemBlockDevice>>) {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = Arc::new(BlockCache::new(dev));
 let mut desc = GroupDescriptor::zeroed();
 desc.block_bitmap_lo = 10;
 desc.inode_bitmap_lo = 11;
 desc.free_blocks_count_lo = 32;
 desc.free_inodes_count_lo = 16;
 (Arc::new(AllocationBlockGroup::new(0, desc, 32, 16, false)), cache)
 }

 #[test]
 fn allocate_then_free_restores_free_count() {
 let (group, cache) = fresh_group();
 let txn = cache.start_transaction();
 group.allocate_blocks(&cache, txn, 4, 4).unwrap();
 assert_eq!(group.free_blocks_count(), 28);
 group.free_blocks(&cache, txn, 4, 4).unwrap();
 assert_eq!(group.free_blocks_count(), 32);
 }

 #[test]
 fn abort_restores_pre_transaction_counters() {
 let (group, cache) = fresh_group();
 let txn = cache.start_transaction();
 group.allocate_blocks(&cache, txn, 0, 8).unwrap();
 assert_eq!(group.free_blocks_count(), 24);
 cache.abort_transaction(txn).unwrap();
 assert_eq!(group.free_blocks_count(), 32);
 }
}
