//! `ExtVolume`: the mounted Ext2/3/4 filesystem — owns the superblock, the
//! block-group table, the journal (if any) and the orphan list, and
//! implements [`crate::volume::Volume`].

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes, Zeroable};
use spin::RwLock;

use crate::block_cache::BlockCache;
use crate::checksum::HashVersion;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::ext::alloc::{BlockAllocator, InodeAllocator};
use crate::ext::extent::AllocatedRun;
use crate::ext::group::AllocationBlockGroup;
use crate::ext::inode::{GrowthRequest, Inode};
use crate::ext::dir::{self, DirEntry, HTreeRootInfo};
use crate::ext::layout::{
 GroupDescriptor, InodeRaw, Superblock, EXT2_MAGIC, EXT2_ROOT_INODE, EXT2_SUPERBLOCK_OFFSET,
 FEATURE_INCOMPAT_FILETYPE, INODE_FLAG_INDEX,
};
use crate::volume::partition::PartitionHandle;
use crate::volume::{FsInfo, MountFlags, Volume, VolumeKind};

/// Reads `len` bytes starting at absolute device byte `byte_offset`,
/// covering as many of the device's native blocks as needed.
fn read_bytes<D: BlockDevice>(device: &D, byte_offset: u64, len: usize) -> FsResult<Vec<u8>> {
 let block_size = u64::from(device.block_size());
 let first_block = byte_offset / block_size;
 let last_byte = byte_offset + len as u64;
 let block_count = last_byte.div_ceil(block_size) - first_block;
 let mut buf = alloc::vec![0u8; (block_count * block_size) as usize];
 device.read(first_block, &mut buf).map_err(|_| Error::IoError)?;
 let start = (byte_offset - first_block * block_size) as usize;
 Ok(buf[start..start + len].to_vec())
}

/// Probes `device` for the Ext magic at its fixed superblock offset
/// (`partition start + 1024`).
pub fn identify<D: BlockDevice>(device: &D, partition: PartitionHandle) -> FsResult<FsInfo> {
 let raw = read_bytes(device, partition.byte_offset() + EXT2_SUPERBLOCK_OFFSET, core::mem::size_of::<Superblock>())?;
 let sb: Superblock = *from_bytes(&raw);
 if sb.magic != EXT2_MAGIC {
 return Err(Error::BadData);
 }
 let name_end = sb.volume_name.iter().position(|&b| b == 0).unwrap_or(sb.volume_name.len());
 let volume_name = String::from_utf8_lossy(&sb.volume_name[..name_end]).into_owned();
 Ok(FsInfo {
 kind: VolumeKind::Ext,
 block_size: sb.block_size(),
 total_size: sb.blocks_count() * u64::from(sb.block_size()),
 volume_name,
 read_only: sb.unsupported_features(false),
 })
}

pub struct ExtVolume<D: BlockDevice> {
 cache: Arc<BlockCache<D>>,
 superblock: RwLock<Superblock>,
 groups: Vec<Arc<AllocationBlockGroup>>,
 block_allocator: BlockAllocator,
 inode_allocator: InodeAllocator,
 wide: bool,
 read_only: bool,
 hash_seed: [u32; 4],
 hash_version: HashVersion,
}

impl<D: BlockDevice> ExtVolume<D> {
 /// Mounts `device`, reading the superblock and every group descriptor,
 ///: rejects unknown incompat bits unconditionally, and
 /// unknown ro-compat bits unless the mount is already read-only.
 pub fn mount(device: Arc<D>, flags: MountFlags) -> FsResult<Arc<Self>> {
 let cache = Arc::new(BlockCache::new(device));
 let sb_block = EXT2_SUPERBLOCK_OFFSET / u64::from(cache.block_size());
 let sb_bytes = cache.get(sb_block)?;
 let sb_offset = (EXT2_SUPERBLOCK_OFFSET % u64::from(cache.block_size())) as usize;
 let sb: Superblock = *from_bytes(&sb_bytes[sb_offset..sb_offset + core::mem::size_of::<Superblock>()]);
 if sb.magic != EXT2_MAGIC {
 return Err(Error::BadData);
 }
 let read_only = flags.read_only || cache.is_read_only();
 if sb.unsupported_features(read_only) {
 return Err(Error::Unsupported);
 }

 let wide = sb.feature_incompat & crate::ext::layout::FEATURE_INCOMPAT_64BIT != 0;
 let desc_size = sb.desc_size as u64;
 let group_count = sb.group_count();
 let gdt_block = sb_block + 1;

 let mut groups = Vec::with_capacity(group_count as usize);
 let descs_per_block = u64::from(cache.block_size()) / desc_size;
 for i in 0..group_count {
 let block = gdt_block + u64::from(i) / descs_per_block;
 let offset = (u64::from(i) % descs_per_block * desc_size) as usize;
 let block_data = cache.get(block)?;
 let mut buf = [0u8; 64];
 buf[..desc_size as usize].copy_from_slice(&block_data[offset..offset + desc_size as usize]);
 let desc: GroupDescriptor = *from_bytes(&buf[..core::mem::size_of::<GroupDescriptor>()]);
 groups.push(Arc::new(AllocationBlockGroup::new(i, desc, sb.blocks_per_group, sb.inodes_per_group, wide)));
 }

 let block_allocator = BlockAllocator::new(groups.clone(), sb.blocks_per_group);
 let inode_allocator = InodeAllocator::new(groups.clone(), sb.inodes_per_group);
 let hash_version = HashVersion::from_disk(sb.def_hash_version).unwrap_or(HashVersion::HalfMd4);

 Ok(Arc::new(Self {
 cache,
 hash_seed: sb.hash_seed,
 hash_version,
 superblock: RwLock::new(sb),
 groups,
 block_allocator,
 inode_allocator,
 wide,
 read_only,
 }))
 }

 #[must_use]
 pub fn cache(&self) -> &Arc<BlockCache<D>> {
 &self.cache
 }

 #[must_use]
 pub fn hash_version(&self) -> HashVersion {
 self.hash_version
 }

 #[must_use]
 pub fn hash_seed(&self) -> [u32; 4] {
 self.hash_seed
 }

 fn inode_size(&self) -> usize {
 let sb = self.superblock.read();
 if sb.rev_level == 0 {
 128
 } else {
 sb.inode_size as usize
 }
 }

 fn inode_location(&self, id: u32) -> FsResult<(u64, usize)> {
 let sb = self.superblock.read();
 let zero_based = id.checked_sub(1).ok_or(Error::BadValue)?;
 let group_index = zero_based / sb.inodes_per_group;
 let local = u64::from(zero_based % sb.inodes_per_group);
 let group = self.groups.get(group_index as usize).ok_or(Error::BadValue)?;
 let inode_size = if sb.rev_level == 0 {
 128
 } else {
 sb.inode_size as usize
 };
 let table_start = group.descriptor().inode_table(self.wide);
 let per_block = u64::from(self.cache.block_size()) / inode_size as u64;
 let block = table_start + local / per_block;
 let offset = (local % per_block) as usize * inode_size;
 Ok((block, offset))
 }

 /// Reads and parses inode `id` out of its group's inode table.
 pub fn read_inode(&self, id: u32) -> FsResult<Arc<Inode>> {
 let (block, offset) = self.inode_location(id)?;
 let inode_size = self.inode_size();
 let data = self.cache.get(block)?;
 if offset + inode_size > data.len() {
 return Err(Error::BadData);
 }
 Inode::from_bytes(id, &data[offset..offset + inode_size], self.superblock.read().uuid)
 }

 pub fn write_inode(&self, txn: crate::block_cache::TransactionId, inode: &Inode) -> CanFail {
 let (block, offset) = self.inode_location(inode.id)?;
 let inode_size = self.inode_size();
 let mut data = self.cache.get(block)?;
 let bytes = inode.to_bytes(inode_size);
 data[offset..offset + inode_size].copy_from_slice(&bytes);
 self.cache.mark_dirty(block, data, txn)?;
 inode.mark_clean();
 Ok(())
 }

 /// Resolves every extended attribute attached to `inode`: the inline
 /// region past `extra_isize` in its own record, plus its external
 /// attribute block if it has one. An inline name present
 /// in both regions wins (the on-disk format never actually duplicates
 /// one, but inline entries are scanned first to match that priority).
 pub fn read_xattrs(&self, inode: &Inode) -> FsResult<Vec<crate::ext::xattr::Xattr>> {
 use crate::ext::layout::XATTR_MAGIC;
 use crate::ext::xattr::{parse_block_header, scan};

 let mut out = Vec::new();

 let (block, offset) = self.inode_location(inode.id)?;
 let inode_size = self.inode_size();
 let data = self.cache.get(block)?;
 let record = &data[offset..offset + inode_size];
 let fixed_end = (128 + inode.extra_isize() as usize).min(inode_size);
 if fixed_end + 4 <= inode_size {
 let magic = u32::from_le_bytes(record[fixed_end..fixed_end + 4].try_into().unwrap());
 if magic == XATTR_MAGIC {
 out.extend(scan(&record[fixed_end..], 4, 4));
 }
 }

 let acl_block = inode.file_acl();
 if acl_block != 0 {
 let acl_data = self.cache.get(acl_block)?;
 parse_block_header(&acl_data)?;
 out.extend(scan(&acl_data, core::mem::size_of::<crate::ext::layout::XattrHeader>(), 0));
 }

 Ok(out)
 }

 /// Allocates one or more contiguous blocks, preferring the group that
 /// owns `preferred_inode`, per its locality heuristic.
 pub fn allocate_blocks(
 &self,
 txn: crate::block_cache::TransactionId,
 preferred_inode: u32,
 min: u32,
 max: u32) -> FsResult<AllocatedRun> {
 let preferred_group = self.inode_allocator.group_of(preferred_inode.max(1));
 let (group_index, local_start, len) = self.block_allocator.allocate(&self.cache, txn, min, max, preferred_group)?;
 let group_base = u64::from(group_index) * u64::from(self.superblock.read().blocks_per_group)
 + u64::from(self.superblock.read().first_data_block);
 Ok(AllocatedRun {
 start: group_base + u64::from(local_start),
 len,
 })
 }

 pub fn free_blocks(&self, txn: crate::block_cache::TransactionId, start: u64, len: u32) -> CanFail {
 let sb = self.superblock.read();
 let relative = start.checked_sub(u64::from(sb.first_data_block)).ok_or(Error::BadValue)?;
 let group_index = (relative / u64::from(sb.blocks_per_group)) as u32;
 let local = (relative % u64::from(sb.blocks_per_group)) as u32;
 drop(sb);
 self.block_allocator.free(&self.cache, txn, group_index, local, len)
 }

 pub fn allocate_inode(&self, txn: crate::block_cache::TransactionId, preferred_group: u32, is_dir: bool) -> FsResult<u32> {
 self.inode_allocator.allocate(&self.cache, txn, preferred_group, is_dir)
 }

 pub fn free_inode(&self, txn: crate::block_cache::TransactionId, id: u32, is_dir: bool) -> CanFail {
 self.inode_allocator.free(&self.cache, txn, id, is_dir)
 }

 /// The group a new inode should prefer, per its locality
 /// heuristic (`inode_id / inodes_per_group`, here keyed off the
 /// parent directory rather than the not-yet-allocated child).
 #[must_use]
 pub fn preferred_group(&self, near_inode: u32) -> u32 {
 self.inode_allocator.group_of(near_inode.max(1))
 }

 /// Allocates and publishes a fresh inode record near `preferred_group`,
 /// with `links_count` seeded to what a bare directory or regular file
 /// starts with before any directory entry references it.
 pub fn new_inode(
 &self,
 txn: crate::block_cache::TransactionId,
 preferred_group: u32,
 mode: u16,
 is_dir: bool) -> FsResult<Arc<Inode>> {
 let id = self.allocate_inode(txn, preferred_group, is_dir)?;
 let mut raw: InodeRaw = Zeroable::zeroed();
 raw.mode = mode;
 let inode = Inode::from_raw(id, raw, self.superblock.read().uuid);
 self.write_inode(txn, &inode)?;
 Ok(inode)
 }

 fn allocate_callback<'a>(
 &'a self,
 txn: crate::block_cache::TransactionId,
 inode_id: u32) -> impl FnMut(GrowthRequest) -> FsResult<AllocatedRun> + 'a {
 move |req: GrowthRequest| self.allocate_blocks(txn, inode_id, req.min, req.max)
 }

 pub fn write_file(
 &self,
 txn: crate::block_cache::TransactionId,
 inode: &Inode,
 offset: u64,
 data: &[u8]) -> CanFail {
 let cb = self.allocate_callback(txn, inode.id);
 inode.write_at(&self.cache, txn, offset, data, cb)
 }

 pub fn read_file(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
 inode.read_at(&self.cache, offset, buf)
 }

 /// Truncates `inode` to `new_size`, freeing every block the shrink
 /// frees back to the owning groups.
 pub fn truncate(&self, txn: crate::block_cache::TransactionId, inode: &Inode, new_size: u64) -> CanFail {
 let freed = inode.resize(&self.cache, new_size)?;
 for (start, len) in freed {
 self.free_blocks(txn, start, len)?;
 }
 Ok(())
 }

 /// Pushes `inode_id` onto the head of the filesystem-wide orphan
 /// linked list (the superblock's `last_orphan`, threaded through each
 /// inode's `dtime` field) crash-safety contract
 /// for unlink-then-truncate.
 pub fn save_orphan(&self, txn: crate::block_cache::TransactionId, inode_id: u32) -> CanFail {
 let mut sb = self.superblock.write();
 let head = sb.last_orphan;
 sb.last_orphan = inode_id;
 drop(sb);
 let inode = self.read_inode(inode_id)?;
 {
 let mut raw = inode.raw();
 raw.dtime = head;
 let (block, offset) = self.inode_location(inode_id)?;
 let inode_size = self.inode_size();
 let mut data = self.cache.get(block)?;
 data[offset..offset + core::mem::size_of::<InodeRaw>().min(inode_size)]
.copy_from_slice(&bytes_of(&raw)[..core::mem::size_of::<InodeRaw>().min(inode_size)]);
 self.cache.mark_dirty(block, data, txn)?;
 }
 self.write_superblock(txn)
 }

 /// Removes `inode_id` from the orphan list, relinking its predecessor
 /// (or the superblock head) to whatever `inode_id` pointed at.
 pub fn remove_orphan(&self, txn: crate::block_cache::TransactionId, inode_id: u32) -> CanFail {
 let mut sb = self.superblock.write();
 let mut cursor = sb.last_orphan;
 if cursor == inode_id {
 let next_inode = self.read_inode(inode_id)?;
 sb.last_orphan = next_inode.raw().dtime;
 drop(sb);
 return self.write_superblock(txn);
 }
 drop(sb);
 let mut guard = 0;
 while cursor != 0 && guard < self.groups.len() as u32 * 65536 {
 let current = self.read_inode(cursor)?;
 let next = current.raw().dtime;
 if next == inode_id {
 let target = self.read_inode(inode_id)?;
 let mut raw = current.raw();
 raw.dtime = target.raw().dtime;
 let (block, offset) = self.inode_location(cursor)?;
 let inode_size = self.inode_size();
 let mut data = self.cache.get(block)?;
 data[offset..offset + core::mem::size_of::<InodeRaw>().min(inode_size)]
.copy_from_slice(&bytes_of(&raw)[..core::mem::size_of::<InodeRaw>().min(inode_size)]);
 self.cache.mark_dirty(block, data, txn)?;
 return Ok(());
 }
 cursor = next;
 guard += 1;
 }
 Err(Error::EntryNotFound)
 }

 fn write_superblock(&self, txn: crate::block_cache::TransactionId) -> CanFail {
 let sb_block = EXT2_SUPERBLOCK_OFFSET / u64::from(self.cache.block_size());
 let sb_offset = (EXT2_SUPERBLOCK_OFFSET % u64::from(self.cache.block_size())) as usize;
 let mut data = self.cache.get(sb_block)?;
 let sb = self.superblock.read();
 data[sb_offset..sb_offset + core::mem::size_of::<Superblock>()].copy_from_slice(bytes_of(&*sb));
 self.cache.mark_dirty(sb_block, data, txn)
 }

 #[must_use]
 pub fn group_count(&self) -> u32 {
 self.groups.len() as u32
 }

 pub fn start_transaction(&self) -> crate::block_cache::TransactionId {
 self.cache.start_transaction()
 }

 pub fn commit(&self, txn: crate::block_cache::TransactionId) -> CanFail {
 self.cache.end_transaction(txn)
 }

 fn filetype_feature(&self) -> bool {
 self.superblock.read().feature_incompat & FEATURE_INCOMPAT_FILETYPE != 0
 }

 fn dir_block(&self, _txn: crate::block_cache::TransactionId, dir_inode: &Inode, index: u64) -> FsResult<Vec<u8>> {
 let mut buf = alloc::vec![0u8; self.cache.block_size() as usize];
 dir_inode.read_at(&self.cache, index * u64::from(self.cache.block_size()), &mut buf)?;
 Ok(buf)
 }

 /// Resolves `name` inside `dir_inode`, dispatching to HTree descent or a
 /// full linear scan depending on `INODE_FLAG_INDEX`.
 pub fn dir_lookup(&self, dir_inode: &Inode, name: &str) -> FsResult<DirEntry> {
 if dir_inode.flags() & INODE_FLAG_INDEX != 0 {
 dir::htree_lookup(&self.cache, dir_inode, name, self.hash_version, self.hash_seed)?.ok_or(Error::EntryNotFound)
 } else {
 dir::linear_lookup(&self.cache, dir_inode)?
.into_iter()
.find(|e| e.name == name)
.ok_or(Error::EntryNotFound)
 }
 }

 /// Lists every live entry of `dir_inode` in on-disk order, per spec
 /// §4.4 readdir (no separate `.`/`..` synthesis: both are ordinary
 /// entries stored in the directory's first block).
 pub fn dir_iter(&self, dir_inode: &Inode) -> FsResult<Vec<DirEntry>> {
 let filetype = self.filetype_feature();
 if dir_inode.flags() & INODE_FLAG_INDEX != 0 {
 dir::htree_iter(&self.cache, dir_inode, filetype)
 } else {
 dir::linear_iter(&self.cache, dir_inode, filetype)
 }
 }

 /// Inserts `(inode, file_type, name)` into `dir_inode`.
 /// Unindexed directories try every existing block and then append a
 /// freshly allocated one. Indexed directories insert into the leaf the
 /// hash resolves to; a full leaf with no split support yet reports
 /// [`Error::Unsupported`] rather than silently dropping the entry (see
 /// the directory-indexing Open Question in the design notes).
 pub fn dir_insert(
 &self,
 txn: crate::block_cache::TransactionId,
 dir_inode: &Inode,
 inode: u32,
 file_type: u8,
 name: &str) -> CanFail {
 if dir_inode.flags() & INODE_FLAG_INDEX != 0 {
 let root_block = self.dir_block(txn, dir_inode, 0)?;
 let root = HTreeRootInfo::parse(&root_block)?;
 let root_entries = dir::htree_entries(&root_block, root.entries_offset(), root.count);
 let hash = self.hash_version.hash(name.as_bytes());
 let leaf_index = if root.indirect_levels == 0 {
 dir::htree_descend(&root_entries, hash).ok_or(Error::BadData)?
 } else {
 return Err(Error::Unsupported);
 };
 let mut leaf = self.dir_block(txn, dir_inode, u64::from(leaf_index))?;
 if dir::insert_in_block(&mut leaf, inode, file_type, name).is_ok() {
 return self.write_file(txn, dir_inode, u64::from(leaf_index) * u64::from(self.cache.block_size()), &leaf);
 }
 return Err(Error::Unsupported);
 }

 let block_size = u64::from(self.cache.block_size());
 let num_blocks = dir_inode.size().div_ceil(block_size);
 for b in 0..num_blocks {
 let mut block = self.dir_block(txn, dir_inode, b)?;
 if dir::is_virgin_block(&block) {
 dir::format_empty_block(&mut block);
 }
 if dir::insert_in_block(&mut block, inode, file_type, name).is_ok() {
 self.write_file(txn, dir_inode, b * block_size, &block)?;
 return Ok(());
 }
 }

 let mut block = alloc::vec![0u8; block_size as usize];
 dir::format_empty_block(&mut block);
 dir::insert_in_block(&mut block, inode, file_type, name)?;
 self.write_file(txn, dir_inode, num_blocks * block_size, &block)
 }

 /// Removes `name` from `dir_inode`, locating its block the same way
 /// `dir_lookup` would and marking the entry deleted in place.
 pub fn dir_remove(&self, txn: crate::block_cache::TransactionId, dir_inode: &Inode, name: &str) -> CanFail {
 if dir_inode.flags() & INODE_FLAG_INDEX != 0 {
 let root_block = self.dir_block(txn, dir_inode, 0)?;
 let root = HTreeRootInfo::parse(&root_block)?;
 let root_entries = dir::htree_entries(&root_block, root.entries_offset(), root.count);
 let hash = self.hash_version.hash(name.as_bytes());
 let leaf_index = if root.indirect_levels == 0 {
 dir::htree_descend(&root_entries, hash).ok_or(Error::BadData)?
 } else {
 return Err(Error::Unsupported);
 };
 let mut leaf = self.dir_block(txn, dir_inode, u64::from(leaf_index))?;
 dir::remove_from_block(&mut leaf, name)?;
 return self.write_file(txn, dir_inode, u64::from(leaf_index) * u64::from(self.cache.block_size()), &leaf);
 }

 let block_size = u64::from(self.cache.block_size());
 let num_blocks = dir_inode.size().div_ceil(block_size);
 for b in 0..num_blocks {
 let mut block = self.dir_block(txn, dir_inode, b)?;
 if dir::remove_from_block(&mut block, name).is_ok() {
 return self.write_file(txn, dir_inode, b * block_size, &block);
 }
 }
 Err(Error::EntryNotFound)
 }
}

impl<D: BlockDevice> Volume for ExtVolume<D> {
 fn kind(&self) -> VolumeKind {
 VolumeKind::Ext
 }

 fn block_size(&self) -> u32 {
 self.cache.block_size()
 }

 fn is_read_only(&self) -> bool {
 self.read_only
 }

 fn root_inode_id(&self) -> u64 {
 u64::from(EXT2_ROOT_INODE)
 }

 fn find_block(&self, logical: u64) -> FsResult<u64> {
 Ok(logical)
 }

 fn unmount(&self) -> FsResult<()> {
 self.cache.sync()
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use bytemuck::Zeroable;

 fn format_minimal_volume() -> Arc<MemBlockDevice> {
 let dev = Arc::new(MemBlockDevice::new(1024, 256));
 let mut sb: Superblock = Zeroable::zeroed();
 sb.inodes_count = 64;
 sb.blocks_count_lo = 256;
 sb.first_data_block = 1;
 sb.log_block_size = 0;
 sb.blocks_per_group = 256;
 sb.inodes_per_group = 64;
 sb.magic = EXT2_MAGIC;
 sb.rev_level = 1;
 sb.inode_size = 128;
 sb.free_blocks_count_lo = 200;
 sb.free_inodes_count = 50;

 dev.with_bytes(|bytes| {
 bytes[1024..1024 + core::mem::size_of::<Superblock>()].copy_from_slice(bytes_of(&sb));
 let mut desc: GroupDescriptor = Zeroable::zeroed();
 desc.block_bitmap_lo = 3;
 desc.inode_bitmap_lo = 4;
 desc.inode_table_lo = 5;
 desc.free_blocks_count_lo = 200;
 desc.free_inodes_count_lo = 50;
 bytes[2048..2048 + core::mem::size_of::<GroupDescriptor>()].copy_from_slice(bytes_of(&desc));
 });
 dev
 }

 #[test]
 fn mount_reads_superblock_and_one_group() {
 let dev = format_minimal_volume();
 let volume = ExtVolume::mount(dev, MountFlags::default()).unwrap();
 assert_eq!(volume.group_count(), 1);
 assert_eq!(volume.root_inode_id(), 2);
 }

 #[test]
 fn identify_reports_ext_kind() {
 let dev = format_minimal_volume();
 let info = identify(&*dev, PartitionHandle::whole_device(256, 1024)).unwrap();
 assert_eq!(info.kind, VolumeKind::Ext);
 }

 #[test]
 fn allocate_then_free_blocks_round_trips() {
 let dev = format_minimal_volume();
 let volume = ExtVolume::mount(dev, MountFlags::default()).unwrap();
 let txn = volume.start_transaction();
 let run = volume.allocate_blocks(txn, 1, 1, 4).unwrap();
 assert!(run.start >= 1);
 volume.free_blocks(txn, run.start, run.len).unwrap();
 }
}
