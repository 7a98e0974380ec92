//! `BtrfsVolume`: the mounted Btrfs filesystem — system chunk map, chunk
//! tree, root tree, the FS tree and extent tree it resolves through the
//! root tree, and the per-block-group [`ExtentAllocator`].

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes};
use spin::Mutex;

use crate::block_cache::{BlockCache, TransactionId};
use crate::btrfs::alloc::{BlockGroup, ExtentAllocator};
use crate::btrfs::dir;
use crate::btrfs::inode::BtrfsInode;
use crate::btrfs::layout::{
 BlockGroupItem, ChunkItemHeader, ChunkStripe, InodeItem, Key, RootItem, Superblock, BTRFS_SUPER_INFO_OFFSET,
 CHUNK_ITEM_HEADER_LEN, CHUNK_STRIPE_LEN, CHUNK_TREE_OBJECTID, EXTENT_TREE_OBJECTID, FIRST_CHUNK_TREE_OBJECTID,
 FS_TREE_OBJECTID, KEY_BLOCK_GROUP_ITEM, KEY_CHUNK_ITEM, KEY_ROOT_ITEM, ROOT_TREE_OBJECTID,
};
use crate::btrfs::tree::BTree;
use crate::btrfs::xattr;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::volume::partition::PartitionHandle;
use crate::volume::{FsInfo, MountFlags, Volume, VolumeKind};

/// One entry of the bootstrap system chunk map: a logical range mapped
/// onto a single physical range. Units are block numbers throughout this
/// engine (not byte offsets) — a simplifying departure from the on-disk
/// Btrfs wire format recorded in `DESIGN.md`, consistent with how
/// `CachedExtentTree`/`BlockGroup` already treat their own offsets.
#[derive(Clone, Copy, Debug)]
pub struct ChunkMapping {
 pub logical_start: u64,
 pub length: u64,
 pub physical_start: u64,
}

fn translate_with(chunks: &[ChunkMapping], logical: u64) -> Option<u64> {
 chunks
.iter()
.find(|c| logical >= c.logical_start && logical < c.logical_start + c.length)
.map(|c| c.physical_start + (logical - c.logical_start))
}

/// Parses the superblock's `sys_chunk_array` into the bootstrap chunk map
/// used before the chunk tree itself can be read.
fn parse_system_chunks(bytes: &[u8]) -> FsResult<Vec<ChunkMapping>> {
 let key_len = core::mem::size_of::<Key>();
 let mut out = Vec::new();
 let mut cursor = 0usize;
 while cursor + key_len + CHUNK_ITEM_HEADER_LEN <= bytes.len() {
 let key: Key = *from_bytes(&bytes[cursor..cursor + key_len]);
 if key.object_id == 0 {
 break;
 }
 cursor += key_len;
 let header: ChunkItemHeader = *from_bytes(&bytes[cursor..cursor + CHUNK_ITEM_HEADER_LEN]);
 cursor += CHUNK_ITEM_HEADER_LEN;
 let stripes_len = header.num_stripes as usize * CHUNK_STRIPE_LEN;
 if cursor + stripes_len > bytes.len() || header.num_stripes == 0 {
 return Err(Error::BadData);
 }
 let stripe: ChunkStripe = *from_bytes(&bytes[cursor..cursor + CHUNK_STRIPE_LEN]);
 cursor += stripes_len;
 out.push(ChunkMapping {
 logical_start: key.offset,
 length: header.length,
 physical_start: stripe.offset,
 });
 }
 Ok(out)
}

/// Encodes one system-chunk entry the way [`parse_system_chunks`] expects
/// to read it back — used by mkfs-style test fixtures.
#[must_use]
pub fn encode_system_chunk(logical_start: u64, length: u64, physical_start: u64) -> Vec<u8> {
 let mut buf = Vec::new();
 buf.extend_from_slice(bytes_of(&Key::new(FIRST_CHUNK_TREE_OBJECTID, KEY_CHUNK_ITEM, logical_start)));
 buf.extend_from_slice(bytes_of(&ChunkItemHeader {
 length,
 owner: CHUNK_TREE_OBJECTID,
 stripe_len: length,
 chunk_type: 0,
 io_align: 0,
 io_width: 0,
 sector_size: 0,
 num_stripes: 1,
 sub_stripes: 1,
 }));
 buf.extend_from_slice(bytes_of(&ChunkStripe {
 dev_id: 1,
 offset: physical_start,
 dev_uuid: [0; 16],
 }));
 buf
}

fn resolve_logical<D: BlockDevice>(
 cache: &BlockCache<D>,
 system_chunks: &[ChunkMapping],
 chunk_tree_root: u64,
 logical: u64) -> FsResult<u64> {
 if let Some(physical) = translate_with(system_chunks, logical) {
 return Ok(physical);
 }
 let chunk_tree = BTree::new(cache, chunk_tree_root, cache.block_size() as usize, CHUNK_TREE_OBJECTID);
 let (_, key, payload) =
 chunk_tree.find_previous(Key::new(FIRST_CHUNK_TREE_OBJECTID, KEY_CHUNK_ITEM, logical), KEY_CHUNK_ITEM)?;
 if key.object_id != FIRST_CHUNK_TREE_OBJECTID {
 return Err(Error::EntryNotFound);
 }
 if payload.len() < CHUNK_ITEM_HEADER_LEN + CHUNK_STRIPE_LEN {
 return Err(Error::BadData);
 }
 let header: ChunkItemHeader = *from_bytes(&payload[..CHUNK_ITEM_HEADER_LEN]);
 if logical >= key.offset + header.length {
 return Err(Error::EntryNotFound);
 }
 let stripe: ChunkStripe = *from_bytes(&payload[CHUNK_ITEM_HEADER_LEN..CHUNK_ITEM_HEADER_LEN + CHUNK_STRIPE_LEN]);
 Ok(stripe.offset + (logical - key.offset))
}

fn read_bytes<D: BlockDevice>(cache: &BlockCache<D>, byte_offset: u64, len: usize) -> FsResult<Vec<u8>> {
 let block_size = u64::from(cache.block_size());
 let first_block = byte_offset / block_size;
 let block_count = (byte_offset + len as u64).div_ceil(block_size) - first_block;
 let mut buf = Vec::with_capacity((block_count * block_size) as usize);
 for i in 0..block_count {
 buf.extend_from_slice(&cache.get(first_block + i)?);
 }
 let start = (byte_offset - first_block * block_size) as usize;
 Ok(buf[start..start + len].to_vec())
}

fn read_root_item<D: BlockDevice>(root_tree: &BTree<D>, object_id: u64) -> FsResult<RootItem> {
 let (_, payload) = root_tree.find_exact(Key::new(object_id, KEY_ROOT_ITEM, 0))?;
 if payload.len() < core::mem::size_of::<RootItem>() {
 return Err(Error::BadData);
 }
 Ok(*from_bytes(&payload[..core::mem::size_of::<RootItem>()]))
}

/// Probes `device` for the Btrfs magic at `BTRFS_SUPER_INFO_OFFSET`, per
///.
pub fn identify<D: BlockDevice>(device: &D, partition: PartitionHandle) -> FsResult<FsInfo> {
 let cache = BlockCache::new(Arc::new(ProbeDevice {
 inner: device,
 partition,
 }));
 let bytes = read_bytes(&cache, BTRFS_SUPER_INFO_OFFSET, core::mem::size_of::<Superblock>())?;
 let sb: Superblock = *from_bytes(&bytes);
 if !sb.valid_magic() {
 return Err(Error::BadData);
 }
 let name_end = sb.label.iter().position(|&b| b == 0).unwrap_or(sb.label.len());
 Ok(FsInfo {
 kind: VolumeKind::Btrfs,
 block_size: sb.sector_size,
 total_size: sb.total_bytes,
 volume_name: String::from_utf8_lossy(&sb.label[..name_end]).into_owned(),
 read_only: false,
 })
}

/// A thin `BlockDevice` shim that offsets every access by a partition's
/// starting block, used only during `identify` (which is handed a bare
/// `&D`, not an `Arc<D>`). [`BtrfsVolume::mount`] takes an already-scoped
/// `Arc<D>` from its caller instead.
struct ProbeDevice<'a, D: BlockDevice> {
 inner: &'a D,
 partition: PartitionHandle,
}

impl<D: BlockDevice> BlockDevice for ProbeDevice<'_, D> {
 fn block_size(&self) -> u32 {
 self.inner.block_size()
 }

 fn block_count(&self) -> u64 {
 self.partition.block_count
 }

 fn read(&self, block: u64, buf: &mut [u8]) -> CanFail {
 self.inner.read(block + self.partition.start_lba, buf)
 }

 fn write(&self, block: u64, buf: &[u8]) -> CanFail {
 self.inner.write(block + self.partition.start_lba, buf)
 }

 fn is_read_only(&self) -> bool {
 self.inner.is_read_only()
 }
}

pub struct BtrfsVolume<D: BlockDevice> {
 cache: Arc<BlockCache<D>>,
 system_chunks: Vec<ChunkMapping>,
 chunk_tree_root: u64,
 fs_tree_root: u64,
 extent_tree_root: u64,
 node_size: u32,
 root_dir_id: u64,
 allocator: Mutex<ExtentAllocator>,
 read_only: bool,
 label: String,
}

impl<D: BlockDevice> BtrfsVolume<D> {
 /// Mounts `device`, bootstrapping the system chunk map, chunk tree,
 /// root tree, FS/extent tree roots and the block-group allocator, per
 ///.
 pub fn mount(device: Arc<D>, flags: MountFlags) -> FsResult<Arc<Self>> {
 let cache = Arc::new(BlockCache::new(device));
 let sb_bytes = read_bytes(&cache, BTRFS_SUPER_INFO_OFFSET, core::mem::size_of::<Superblock>())?;
 let sb: Superblock = *from_bytes(&sb_bytes);
 if !sb.valid_magic() {
 return Err(Error::BadData);
 }
 let read_only = flags.read_only || cache.is_read_only();

 let system_chunks = parse_system_chunks(&sb.sys_chunk_array[..sb.sys_chunk_array_size as usize])?;
 let chunk_tree_root = translate_with(&system_chunks, sb.chunk_root).ok_or(Error::BadData)?;
 let root_tree_root = resolve_logical(&cache, &system_chunks, chunk_tree_root, sb.root)?;
 let root_tree = BTree::new(&cache, root_tree_root, sb.node_size as usize, ROOT_TREE_OBJECTID);

 let fs_root_item = read_root_item(&root_tree, FS_TREE_OBJECTID)?;
 let fs_tree_root = resolve_logical(&cache, &system_chunks, chunk_tree_root, fs_root_item.byte_nr)?;
 let extent_root_item = read_root_item(&root_tree, EXTENT_TREE_OBJECTID)?;
 let extent_tree_root = resolve_logical(&cache, &system_chunks, chunk_tree_root, extent_root_item.byte_nr)?;

 let extent_tree = BTree::new(&cache, extent_tree_root, sb.node_size as usize, EXTENT_TREE_OBJECTID);
 let mut groups = Vec::new();
 let mut cursor = Key::new(0, 0, 0);
 loop {
 let Ok((_, key, payload)) = extent_tree.find_next(cursor, KEY_BLOCK_GROUP_ITEM) else {
 break;
 };
 if payload.len() < core::mem::size_of::<BlockGroupItem>() {
 return Err(Error::BadData);
 }
 let item: BlockGroupItem = *from_bytes(&payload[..core::mem::size_of::<BlockGroupItem>()]);
 let mut group = BlockGroup::new(key.object_id, key.object_id + key.offset, item);
 group.load_extent(&extent_tree, u64::from(sb.node_size), true)?;
 groups.push(group);
 cursor = Key::new(key.object_id, key.item_type, key.offset.wrapping_add(1));
 }
 let allocator = ExtentAllocator::new(groups, u64::from(sb.sector_size));

 let name_end = sb.label.iter().position(|&b| b == 0).unwrap_or(sb.label.len());
 let label = String::from_utf8_lossy(&sb.label[..name_end]).into_owned();

 Ok(Arc::new(Self {
 cache,
 system_chunks,
 chunk_tree_root,
 fs_tree_root,
 extent_tree_root,
 node_size: sb.node_size,
 root_dir_id: fs_root_item.root_dirid,
 allocator: Mutex::new(allocator),
 read_only,
 label,
 }))
 }

 #[must_use]
 pub fn label(&self) -> &str {
 &self.label
 }

 fn fs_tree(&self) -> BTree<'_, D> {
 BTree::new(&self.cache, self.fs_tree_root, self.node_size as usize, FS_TREE_OBJECTID)
 }

 fn extent_tree(&self) -> BTree<'_, D> {
 BTree::new(&self.cache, self.extent_tree_root, self.node_size as usize, EXTENT_TREE_OBJECTID)
 }

 pub fn read_inode(&self, object_id: u64) -> FsResult<BtrfsInode> {
 BtrfsInode::load(&self.fs_tree(), object_id)
 }

 pub fn read_at(&self, inode: &BtrfsInode, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
 let tree = self.fs_tree();
 inode.read_at(&tree, &self.cache, offset, buf, |logical| self.find_block(logical))
 }

 pub fn lookup(&self, parent: u64, name: &[u8]) -> FsResult<Key> {
 dir::lookup(&self.fs_tree(), parent, name)
 }

 pub fn readdir(&self, parent: u64) -> FsResult<Vec<(Vec<u8>, Key, u8)>> {
 let parent_of = if parent == self.root_dir_id {
 parent
 } else {
 BtrfsInode::parent_of(&self.fs_tree(), parent).unwrap_or(self.root_dir_id)
 };
 dir::readdir(&self.fs_tree(), parent, parent_of)
 }

 pub fn get_xattr(&self, owner: u64, name: &[u8]) -> FsResult<Vec<u8>> {
 xattr::find(&self.fs_tree(), owner, name)
 }

 pub fn list_xattrs(&self, owner: u64) -> FsResult<Vec<xattr::Xattr>> {
 xattr::list(&self.fs_tree(), owner)
 }

 /// Allocates `min..=max` blocks of space.
 pub fn allocate_blocks(&self, min: u64, max: u64, data: bool) -> FsResult<(u64, u64)> {
 if self.read_only {
 return Err(Error::ReadOnlyDevice);
 }
 self.allocator.lock().allocate(min, max, data)
 }

 pub fn free_blocks(&self, start: u64, len: u64) -> CanFail {
 if self.read_only {
 return Err(Error::ReadOnlyDevice);
 }
 self.allocator.lock().free(start, len)
 }

 pub fn start_transaction(&self) -> TransactionId {
 self.cache.start_transaction()
 }

 pub fn commit(&self, txn: TransactionId) -> CanFail {
 self.cache.end_transaction(txn)
 }

 #[must_use]
 pub fn root_inode(&self) -> FsResult<InodeItem> {
 Ok(self.read_inode(self.root_dir_id)?.item)
 }
}

impl<D: BlockDevice> Volume for BtrfsVolume<D> {
 fn kind(&self) -> VolumeKind {
 VolumeKind::Btrfs
 }

 fn block_size(&self) -> u32 {
 self.cache.block_size()
 }

 fn is_read_only(&self) -> bool {
 self.read_only
 }

 fn root_inode_id(&self) -> u64 {
 self.root_dir_id
 }

 /// Btrfs logical→physical translation: first the pre-loaded system
 /// chunks, then a backward lookup of `(FIRST_CHUNK_TREE, CHUNK_ITEM,
 /// offset=logical)` in the chunk tree.
 fn find_block(&self, logical: u64) -> FsResult<u64> {
 resolve_logical(&self.cache, &self.system_chunks, self.chunk_tree_root, logical)
 }

 fn unmount(&self) -> FsResult<()> {
 self.cache.sync()
 }
}

#[cfg(test)]
mod tests {
 use alloc::sync::Arc;

 use super::*;
 use crate::btrfs::layout::{
 DevItem, InodeTimespec, BLOCK_GROUP_METADATA, BTRFS_MAGIC_FRESH, KEY_INODE_ITEM, S_IFDIR,
 };
 use crate::device::MemBlockDevice;
 use bytemuck::Zeroable;

 fn build_fixture() -> Arc<MemBlockDevice> {
 let node_size = 4096u32;
 let dev = Arc::new(MemBlockDevice::new(node_size, 4096));

 // Layout (in blocks): 0 unused, 16 superblock (0x10000 / 4096),
 // 20 chunk tree root, 21 root tree root, 22 fs tree root, 23 extent tree root.
 let chunk_block = 20u64;
 let root_block = 21u64;
 let fs_block = 22u64;
 let extent_block = 23u64;

 let cache = BlockCache::new(dev.clone());

 // Chunk tree: a single leaf covering the whole fixture identity-mapped.
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, &cache, chunk_block, CHUNK_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();

 // Root tree: ROOT_ITEM(FS_TREE) -> fs_block, ROOT_ITEM(EXTENT_TREE) -> extent_block.
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, &cache, root_block, ROOT_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 let mut root_tree = BTree::new(&cache, root_block, node_size as usize, ROOT_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(200u64);
 let mut alloc_block = || -> FsResult<u64> {
 let b = next.get();
 next.set(b + 1);
 Ok(b)
 };
 let mut fs_root_item: RootItem = Zeroable::zeroed();
 fs_root_item.byte_nr = fs_block;
 fs_root_item.root_dirid = 256;
 root_tree
.insert_item(txn, Key::new(FS_TREE_OBJECTID, KEY_ROOT_ITEM, 0), bytes_of(&fs_root_item), &mut alloc_block)
.unwrap();
 let mut extent_root_item: RootItem = Zeroable::zeroed();
 extent_root_item.byte_nr = extent_block;
 root_tree
.insert_item(txn, Key::new(EXTENT_TREE_OBJECTID, KEY_ROOT_ITEM, 0), bytes_of(&extent_root_item), &mut alloc_block)
.unwrap();
 cache.end_transaction(txn).unwrap();

 // FS tree: root directory inode 256.
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, &cache, fs_block, FS_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 let mut fs_tree = BTree::new(&cache, fs_block, node_size as usize, FS_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let mut root_inode: InodeItem = Zeroable::zeroed();
 root_inode.mode = S_IFDIR | 0o755;
 root_inode.num_links = 1;
 root_inode.atime = InodeTimespec::zeroed();
 root_inode.ctime = InodeTimespec::zeroed();
 root_inode.mtime = InodeTimespec::zeroed();
 root_inode.otime = InodeTimespec::zeroed();
 fs_tree
.insert_item(txn, Key::new(256, KEY_INODE_ITEM, 0), bytes_of(&root_inode), &mut alloc_block)
.unwrap();
 cache.end_transaction(txn).unwrap();

 // Extent tree: one block group covering blocks [200, 4096).
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, &cache, extent_block, EXTENT_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 let mut extent_tree = BTree::new(&cache, extent_block, node_size as usize, EXTENT_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let mut bg_item: BlockGroupItem = Zeroable::zeroed();
 bg_item.flags = BLOCK_GROUP_METADATA;
 extent_tree
.insert_item(txn, Key::new(300, KEY_BLOCK_GROUP_ITEM, 3796), bytes_of(&bg_item), &mut alloc_block)
.unwrap();
 cache.end_transaction(txn).unwrap();

 // Superblock, with a system chunk array identity-mapping the whole fixture.
 let mut sb: Superblock = Zeroable::zeroed();
 sb.magic = BTRFS_MAGIC_FRESH;
 sb.root = root_block;
 sb.chunk_root = chunk_block;
 sb.node_size = node_size;
 sb.sector_size = node_size;
 sb.leaf_size = node_size;
 sb.total_bytes = u64::from(node_size) * 4096;
 sb.dev_item = DevItem::zeroed();
 let chunk_entry = encode_system_chunk(0, 4096, 0);
 sb.sys_chunk_array[..chunk_entry.len()].copy_from_slice(&chunk_entry);
 sb.sys_chunk_array_size = chunk_entry.len() as u32;
 sb.label = [0u8; 256];
 sb.label[..4].copy_from_slice(b"test");

 let sb_bytes = bytes_of(&sb).to_vec();
 dev.with_bytes(|bytes| {
 let off = BTRFS_SUPER_INFO_OFFSET as usize;
 bytes[off..off + sb_bytes.len()].copy_from_slice(&sb_bytes);
 });
 dev
 }

 #[test]
 fn mount_resolves_fs_and_extent_trees() {
 let dev = build_fixture();
 let volume = BtrfsVolume::mount(dev, MountFlags::default()).unwrap();
 assert_eq!(volume.label, "test");
 assert_eq!(volume.root_inode_id(), 256);
 let root = volume.root_inode().unwrap();
 assert!(root.is_dir());
 }

 #[test]
 fn find_block_resolves_through_system_chunks() {
 let dev = build_fixture();
 let volume = BtrfsVolume::mount(dev, MountFlags::default()).unwrap();
 assert_eq!(volume.find_block(42).unwrap(), 42);
 }

 #[test]
 fn allocate_blocks_reports_from_loaded_group() {
 let dev = build_fixture();
 let volume = BtrfsVolume::mount(dev, MountFlags::default()).unwrap();
 let (start, len) = volume.allocate_blocks(4096, 4096, true).unwrap();
 assert!(start >= 300);
 assert_eq!(len, 4096);
 }
}
