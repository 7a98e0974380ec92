//! `Inode`: cached view over one on-disk [`InodeRaw`] record, dispatching
//! reads/writes to either the legacy [`DataStream`] or the ext4
//! [`ExtentStream`] depending on `INODE_FLAG_EXTENTS`.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes};
use spin::RwLock;

use crate::block_cache::{BlockCache, TransactionId};
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::ext::datastream::DataStream;
use crate::ext::extent::{AllocatedRun, ExtentStream, SPARSE};
use crate::ext::layout::{InodeRaw, INODE_FLAG_EXTENTS, S_IFDIR, S_IFLNK, S_IFMT};

/// An inode number's 1-based, global identity plus the raw record read out
/// of its group's inode table.
pub struct Inode {
 pub id: u32,
 raw: RwLock<InodeRaw>,
 uuid: [u8; 16],
 dirty: RwLock<bool>,
}

/// What the volume's allocator needs to know to grow a stream: the
/// preferred group (for locality) and a callback-free `min`/`max` request
/// size.
pub struct GrowthRequest {
 pub preferred_group: u32,
 pub min: u32,
 pub max: u32,
}

impl Inode {
 #[must_use]
 pub fn from_raw(id: u32, raw: InodeRaw, uuid: [u8; 16]) -> Arc<Self> {
 Arc::new(Self {
 id,
 raw: RwLock::new(raw),
 uuid,
 dirty: RwLock::new(false),
 })
 }

 #[must_use]
 pub fn raw(&self) -> InodeRaw {
 *self.raw.read()
 }

 #[must_use]
 pub fn size(&self) -> u64 {
 self.raw.read().size()
 }

 #[must_use]
 pub fn is_dir(&self) -> bool {
 self.raw.read().file_type() == S_IFDIR
 }

 #[must_use]
 pub fn is_symlink(&self) -> bool {
 self.raw.read().file_type() == S_IFLNK
 }

 #[must_use]
 pub fn links_count(&self) -> u16 {
 self.raw.read().links_count
 }

 #[must_use]
 pub fn uses_extents(&self) -> bool {
 self.raw.read().flags & INODE_FLAG_EXTENTS != 0
 }

 #[must_use]
 pub fn flags(&self) -> u32 {
 self.raw.read().flags
 }

 pub fn set_flags(&self, flags: u32) {
 self.raw.write().flags = flags;
 self.touch();
 }

 #[must_use]
 pub fn is_dirty(&self) -> bool {
 *self.dirty.read()
 }

 pub fn mark_clean(&self) {
 *self.dirty.write() = false;
 }

 fn touch(&self) {
 *self.dirty.write() = true;
 }

 /// Checks `mode` bits against `uid`/`gid`, the classic owner/group/other
 /// rwx triad, per its permission-check requirement. `want` is a
 /// subset of the low 9 `i_mode` bits (e.g. `0o4` for read).
 #[must_use]
 pub fn check_permissions(&self, uid: u32, gid: u32, want: u16) -> bool {
 let raw = self.raw.read();
 let mode = raw.mode;
 let file_uid = u32::from(raw.uid_lo) | (u32::from(raw.uid_hi) << 16);
 let file_gid = u32::from(raw.gid_lo) | (u32::from(raw.gid_hi) << 16);
 if uid == 0 {
 return true;
 }
 let bits = if uid == file_uid {
 (mode >> 6) & 0o7
 } else if gid == file_gid {
 (mode >> 3) & 0o7
 } else {
 mode & 0o7
 };
 bits & want == want
 }

 fn extent_stream<'a, D: BlockDevice>(&self, cache: &'a BlockCache<D>, raw: &InodeRaw) -> ExtentStream<'a, D> {
 ExtentStream::new(cache, u64::from(self.id), raw.generation, self.uuid, raw.block)
 }

 /// Reads up to `buf.len()` bytes starting at file offset `offset`,
 /// treating holes (sparse logical blocks with no backing extent/direct
 /// pointer) as zero-filled.
 pub fn read_at<D: BlockDevice>(&self, cache: &BlockCache<D>, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
 let raw = self.raw.read();
 let size = raw.size();
 if offset >= size {
 return Ok(0);
 }
 let block_size = u64::from(cache.block_size());
 let to_read = buf.len().min((size - offset) as usize);
 let mut done = 0usize;
 while done < to_read {
 let file_offset = offset + done as u64;
 let logical_block = (file_offset / block_size) as u32;
 let in_block = (file_offset % block_size) as usize;
 let chunk = (block_size as usize - in_block).min(to_read - done);

 let physical = self.resolve_block(cache, &raw, logical_block)?;
 if physical == 0 || physical == SPARSE {
 buf[done..done + chunk].fill(0);
 } else {
 let data = cache.get(physical)?;
 buf[done..done + chunk].copy_from_slice(&data[in_block..in_block + chunk]);
 }
 done += chunk;
 }
 Ok(done)
 }

 fn resolve_block<D: BlockDevice>(&self, cache: &BlockCache<D>, raw: &InodeRaw, logical_block: u32) -> FsResult<u64> {
 if raw.flags & INODE_FLAG_EXTENTS != 0 {
 self.extent_stream(cache, raw).find_block(logical_block)
 } else {
 let words = words_from_block(&raw.block);
 DataStream::from_words(words).find_block(cache, logical_block).map(u64::from)
 }
 }

 /// Writes `buf` at file offset `offset`, growing the stream (via
 /// `allocate`) one run at a time whenever it touches a logical block
 /// with no backing store yet. Does not grow `size`; the caller is
 /// expected to call [`Inode::resize`] first when extending the file.
 pub fn write_at<D: BlockDevice>(
 &self,
 cache: &BlockCache<D>,
 txn: TransactionId,
 offset: u64,
 buf: &[u8],
 mut allocate: impl FnMut(GrowthRequest) -> FsResult<AllocatedRun>) -> CanFail {
 let mut raw = self.raw.write();
 let block_size = u64::from(cache.block_size());
 let mut done = 0usize;
 while done < buf.len() {
 let file_offset = offset + done as u64;
 let logical_block = (file_offset / block_size) as u32;
 let in_block = (file_offset % block_size) as usize;
 let chunk = (block_size as usize - in_block).min(buf.len() - done);

 let mut physical = self.resolve_block(cache, &raw, logical_block)?;
 if physical == 0 || physical == SPARSE {
 let run = allocate(GrowthRequest {
 preferred_group: self.id / 8192,
 min: 1,
 max: 1,
 })?;
 if raw.flags & INODE_FLAG_EXTENTS != 0 {
 let mut stream = self.extent_stream(cache, &raw);
 stream.enlarge(txn, logical_block, run)?;
 raw.block = stream.root_bytes();
 } else {
 let mut words = words_from_block(&raw.block);
 let mut stream = DataStream::from_words(words);
 stream.enlarge(cache, txn, logical_block, run)?;
 words = stream.blocks;
 write_words_to_block(&mut raw.block, &words);
 }
 physical = run.start;
 }

 let mut block_data = if chunk == block_size as usize {
 vec![0u8; block_size as usize]
 } else {
 cache.get(physical)?
 };
 block_data[in_block..in_block + chunk].copy_from_slice(&buf[done..done + chunk]);
 cache.mark_dirty(physical, block_data, txn)?;
 done += chunk;
 }
 let new_size = offset + buf.len() as u64;
 if new_size > raw.size() {
 raw.size_lo = new_size as u32;
 raw.size_hi = (new_size >> 32) as u32;
 }
 drop(raw);
 self.touch();
 Ok(())
 }

 /// Zero-fills logical blocks `[old_len, new_len)` without allocating
 /// backing storage for them, so a subsequent read sees zeros and a
 /// subsequent write through a hole triggers ordinary CoW allocation,
 ///'s gap-filling requirement for `ftruncate` growth.
 pub fn fill_gap_with_zeros(&self, old_size: u64, new_size: u64) {
 let mut raw = self.raw.write();
 if new_size > raw.size() {
 raw.size_lo = new_size as u32;
 raw.size_hi = (new_size >> 32) as u32;
 }
 drop(raw);
 let _ = old_size;
 self.touch();
 }

 /// Shrinks the file to `new_size`, freeing every block beyond the new
 /// last logical block and returning the freed runs for the volume's
 /// allocator to reclaim shrink semantics.
 pub fn resize<D: BlockDevice>(&self, cache: &BlockCache<D>, new_size: u64) -> FsResult<Vec<(u64, u32)>> {
 let mut raw = self.raw.write();
 let block_size = u64::from(cache.block_size());
 let new_blocks = new_size.div_ceil(block_size) as u32;
 let freed = if raw.flags & INODE_FLAG_EXTENTS != 0 {
 let mut stream = self.extent_stream(cache, &raw);
 let freed = stream.shrink(new_blocks);
 raw.block = stream.root_bytes();
 freed
 } else {
 let words = words_from_block(&raw.block);
 let mut stream = DataStream::from_words(words);
 let freed = stream.shrink(cache, new_blocks);
 write_words_to_block(&mut raw.block, &stream.blocks);
 freed.into_iter().map(|(s, l)| (u64::from(s), l)).collect()
 };
 raw.size_lo = new_size as u32;
 raw.size_hi = (new_size >> 32) as u32;
 drop(raw);
 self.touch();
 Ok(freed)
 }

 /// Decrements the link count, returning `true` once it reaches zero —
 /// the caller must then push this inode onto the orphan list (spec
 /// §4.3/§4.6) before truncating and freeing it, so a crash mid-unlink
 /// is recovered by the next journal replay.
 pub fn unlink(&self) -> bool {
 let mut raw = self.raw.write();
 raw.links_count = raw.links_count.saturating_sub(1);
 let gone = raw.links_count == 0;
 drop(raw);
 self.touch();
 gone
 }

 pub fn link(&self) {
 let mut raw = self.raw.write();
 raw.links_count += 1;
 drop(raw);
 self.touch();
 }

 pub fn set_mode(&self, mode: u16) {
 let mut raw = self.raw.write();
 raw.mode = (raw.mode & S_IFMT) | (mode & !S_IFMT);
 drop(raw);
 self.touch();
 }

 /// Overwrites both the file-type bits and the permission bits, for
 /// `create`/`create_symlink` laying down a brand new inode whose type
 /// [`Inode::set_mode`]'s type-preserving semantics don't fit.
 pub fn set_type_and_mode(&self, file_type: u16, perm: u16) {
 let mut raw = self.raw.write();
 raw.mode = file_type | (perm & !S_IFMT);
 drop(raw);
 self.touch();
 }

 /// Stores `target` directly in the 60-byte `i_block` union in place of
 /// any block pointers/extent root, per its inline-symlink case
 /// (`len < 60`). Does not touch `num_blocks`: an inline symlink owns no
 /// blocks.
 pub fn set_inline_symlink(&self, target: &[u8]) -> CanFail {
 if target.len() >= 60 {
 return Err(Error::BadValue);
 }
 let mut raw = self.raw.write();
 raw.block = [0u8; 60];
 raw.block[..target.len()].copy_from_slice(target);
 raw.size_lo = target.len() as u32;
 raw.size_hi = 0;
 drop(raw);
 self.touch();
 Ok(())
 }

 pub fn set_owner(&self, uid: u32, gid: u32) {
 let mut raw = self.raw.write();
 raw.uid_lo = uid as u16;
 raw.uid_hi = (uid >> 16) as u16;
 raw.gid_lo = gid as u16;
 raw.gid_hi = (gid >> 16) as u16;
 drop(raw);
 self.touch();
 }

 #[must_use]
 pub fn uid(&self) -> u32 {
 let raw = self.raw.read();
 u32::from(raw.uid_lo) | (u32::from(raw.uid_hi) << 16)
 }

 #[must_use]
 pub fn gid(&self) -> u32 {
 let raw = self.raw.read();
 u32::from(raw.gid_lo) | (u32::from(raw.gid_hi) << 16)
 }

 #[must_use]
 pub fn mode(&self) -> u16 {
 self.raw.read().mode
 }

 /// The block holding this inode's external extended-attribute region,
 /// or `0` if it has none.
 #[must_use]
 pub fn file_acl(&self) -> u64 {
 let raw = self.raw.read();
 u64::from(raw.file_acl_lo) | (u64::from(raw.file_acl_hi) << 32)
 }

 #[must_use]
 pub fn extra_isize(&self) -> u16 {
 self.raw.read().extra_isize
 }

 /// Decodes `(seconds, extra)` into a [`crate::time::UnixTimestamp`] per
 /// the nanosecond-timestamps / 2038 extension: the low two bits of
 /// `extra` extend `seconds` past 32 bits, the remaining 30 hold
 /// nanoseconds.
 #[must_use]
 pub fn atime(&self) -> crate::time::UnixTimestamp {
 let raw = self.raw.read();
 decode_extended_time(raw.atime, raw.atime_extra)
 }

 #[must_use]
 pub fn mtime(&self) -> crate::time::UnixTimestamp {
 let raw = self.raw.read();
 decode_extended_time(raw.mtime, raw.mtime_extra)
 }

 #[must_use]
 pub fn ctime(&self) -> crate::time::UnixTimestamp {
 let raw = self.raw.read();
 decode_extended_time(raw.ctime, raw.ctime_extra)
 }

 #[must_use]
 pub fn crtime(&self) -> crate::time::UnixTimestamp {
 let raw = self.raw.read();
 decode_extended_time(raw.crtime, raw.crtime_extra)
 }

 pub fn set_atime(&self, ts: crate::time::UnixTimestamp) {
 let mut raw = self.raw.write();
 let (seconds, extra) = encode_extended_time(ts);
 raw.atime = seconds;
 raw.atime_extra = extra;
 drop(raw);
 self.touch();
 }

 pub fn set_mtime(&self, ts: crate::time::UnixTimestamp) {
 let mut raw = self.raw.write();
 let (seconds, extra) = encode_extended_time(ts);
 raw.mtime = seconds;
 raw.mtime_extra = extra;
 drop(raw);
 self.touch();
 }

 pub fn set_ctime(&self, ts: crate::time::UnixTimestamp) {
 let mut raw = self.raw.write();
 let (seconds, extra) = encode_extended_time(ts);
 raw.ctime = seconds;
 raw.ctime_extra = extra;
 drop(raw);
 self.touch();
 }

 pub fn set_crtime(&self, ts: crate::time::UnixTimestamp) {
 let mut raw = self.raw.write();
 let (seconds, extra) = encode_extended_time(ts);
 raw.crtime = seconds;
 raw.crtime_extra = extra;
 drop(raw);
 self.touch();
 }

 /// Serializes the current in-memory record back to `inode_size` bytes
 /// for the volume to place into the inode table.
 #[must_use]
 pub fn to_bytes(&self, inode_size: usize) -> Vec<u8> {
 let raw = self.raw.read();
 let mut out = vec![0u8; inode_size];
 let core = bytes_of(&*raw);
 out[..core.len().min(inode_size)].copy_from_slice(&core[..core.len().min(inode_size)]);
 out
 }

 pub fn from_bytes(id: u32, bytes: &[u8], uuid: [u8; 16]) -> FsResult<Arc<Self>> {
 let core_len = core::mem::size_of::<InodeRaw>();
 if bytes.len() < core_len {
 return Err(Error::BadData);
 }
 let raw: InodeRaw = *from_bytes(&bytes[..core_len]);
 Ok(Self::from_raw(id, raw, uuid))
 }
}

/// Splits an inode's 32-bit on-disk `{x}time` field plus its extra-isize
/// `{x}time_extra` field into a [`crate::time::UnixTimestamp`].
fn decode_extended_time(seconds: u32, extra: u32) -> crate::time::UnixTimestamp {
 let epoch_bits = i64::from(extra & 0b11);
 let nanos = extra >> 2;
 let full_seconds = i64::from(seconds) | (epoch_bits << 32);
 crate::time::UnixTimestamp::from_seconds_and_nanos(full_seconds, nanos)
}

/// Inverse of [`decode_extended_time`].
fn encode_extended_time(ts: crate::time::UnixTimestamp) -> (u32, u32) {
 let seconds = ts.seconds();
 let low = seconds as u32;
 let epoch_bits = ((seconds >> 32) & 0b11) as u32;
 (low, (ts.nanos() << 2) | epoch_bits)
}

fn words_from_block(block: &[u8; 60]) -> [u32; 15] {
 let mut words = [0u32; 15];
 for (i, w) in words.iter_mut().enumerate() {
 *w = u32::from_le_bytes(block[i * 4..i * 4 + 4].try_into().unwrap());
 }
 words
}

fn write_words_to_block(block: &mut [u8; 60], words: &[u32; 15]) {
 for (i, w) in words.iter().enumerate() {
 block[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use bytemuck::Zeroable;

 fn fresh_inode(extents: bool) -> Arc<Inode> {
 let mut raw: InodeRaw = Zeroable::zeroed();
 raw.mode = crate::ext::layout::S_IFREG | 0o644;
 if extents {
 raw.flags |= INODE_FLAG_EXTENTS;
 let cache = BlockCache::new(Arc::new(MemBlockDevice::new(1024, 16)));
 let mut stream = ExtentStream::new(&cache, 12, 0, [0; 16], [0u8; 60]);
 stream.init_empty();
 raw.block = stream.root_bytes();
 }
 Inode::from_raw(12, raw, [0u8; 16])
 }

 #[test]
 fn write_then_read_round_trips_with_extents() {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = BlockCache::new(dev);
 let inode = fresh_inode(true);
 let txn = cache.start_transaction();
 let mut next = 20u64;
 inode.write_at(&cache, txn, 0, b"hello world", |_req| {
 let run = AllocatedRun {
 start: next,
 len: 1,
 };
 next += 1;
 Ok(run)
 }).unwrap();
 let mut buf = [0u8; 11];
 inode.read_at(&cache, 0, &mut buf).unwrap();
 assert_eq!(&buf, b"hello world");
 }

 #[test]
 fn read_past_hole_returns_zeros() {
 let dev = Arc::new(MemBlockDevice::new(1024, 16));
 let cache = BlockCache::new(dev);
 let inode = fresh_inode(true);
 inode.raw.write().size_lo = 1024;
 let mut buf = [0xFFu8; 16];
 inode.read_at(&cache, 0, &mut buf).unwrap();
 assert_eq!(buf, [0u8; 16]);
 }

 #[test]
 fn unlink_reports_when_links_reach_zero() {
 let inode = fresh_inode(false);
 inode.raw.write().links_count = 1;
 assert!(inode.unlink());
 }

 #[test]
 fn permissions_owner_group_other() {
 let inode = fresh_inode(false);
 inode.raw.write().mode = 0o640;
 assert!(inode.check_permissions(0, 0, 0o4));
 }

 #[test]
 fn timestamp_round_trips_past_2038_with_nanos() {
 let inode = fresh_inode(false);
 let ts = crate::time::UnixTimestamp::from_seconds_and_nanos(5_000_000_000, 123_456_700);
 inode.set_mtime(ts);
 assert_eq!(inode.mtime(), ts);
 }

 #[test]
 fn uid_gid_split_across_lo_hi_words() {
 let inode = fresh_inode(false);
 inode.set_owner(0x1_0001, 0x1_0002);
 assert_eq!(inode.uid(), 0x1_0001);
 assert_eq!(inode.gid(), 0x1_0002);
 }
}
