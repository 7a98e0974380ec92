//! `BtrfsInode`: the FS-tree view of one object — `INODE_ITEM` plus the
//! read path over its `EXTENT_DATA` items.
//!
//! Per Open Questions, the reviewed VFS shim's Btrfs write vector
//! is `NULL` even though the tree/allocator primitives used to build a
//! write path all exist; this engine makes the same call and reports
//! [`Error::ReadOnlyDevice`] from [`BtrfsInode::write_at`] rather than
//! fabricate an unreviewed write pipeline.

use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes};

use crate::block_cache::{BlockCache, TransactionId};
use crate::btrfs::layout::{
 FileExtentHeader, FileExtentRegular, InodeItem, InodeRefHeader, Key, FILE_EXTENT_HEADER_LEN, FILE_EXTENT_INLINE,
 FILE_EXTENT_REGULAR_LEN, INODE_REF_HEADER_LEN, KEY_EXTENT_DATA, KEY_INODE_ITEM, KEY_INODE_REF,
};
use crate::btrfs::tree::BTree;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

pub struct BtrfsInode {
 pub object_id: u64,
 pub item: InodeItem,
}

impl BtrfsInode {
 /// Reads the `INODE_ITEM` for `object_id` out of the FS tree.
 pub fn load<D: BlockDevice>(tree: &BTree<D>, object_id: u64) -> FsResult<Self> {
 let (_, payload) = tree.find_exact(Key::new(object_id, KEY_INODE_ITEM, 0))?;
 if payload.len() < core::mem::size_of::<InodeItem>() {
 return Err(Error::BadData);
 }
 let item: InodeItem = *from_bytes(&payload[..core::mem::size_of::<InodeItem>()]);
 Ok(Self {
 object_id,
 item,
 })
 }

 #[must_use]
 pub fn size(&self) -> u64 {
 self.item.size
 }

 /// Reads up to `buf.len()` bytes at `offset`, inflating inline extents
 /// directly from the FS tree and resolving regular extents through
 /// `resolve_physical` (typically the volume's `find_block`), per spec
 /// §4.3.
 pub fn read_at<D: BlockDevice>(
 &self,
 tree: &BTree<D>,
 cache: &BlockCache<D>,
 offset: u64,
 buf: &mut [u8],
 mut resolve_physical: impl FnMut(u64) -> FsResult<u64>) -> FsResult<usize> {
 if offset >= self.item.size {
 return Ok(0);
 }
 let to_read = buf.len().min((self.item.size - offset) as usize);
 let mut done = 0usize;
 let mut cursor = offset;

 while done < to_read {
 let (_, key, payload) = match tree.find_previous(Key::new(self.object_id, KEY_EXTENT_DATA, cursor), KEY_EXTENT_DATA) {
 Ok(v) => v,
 Err(_) => break,
 };
 if key.object_id != self.object_id || key.item_type != KEY_EXTENT_DATA {
 break;
 }
 let extent_start = key.offset;
 if payload.len() < FILE_EXTENT_HEADER_LEN {
 return Err(Error::BadData);
 }
 let header: FileExtentHeader = *from_bytes(&payload[..FILE_EXTENT_HEADER_LEN]);

 if header.item_type == FILE_EXTENT_INLINE {
 let inline = &payload[FILE_EXTENT_HEADER_LEN..];
 let in_extent = (cursor - extent_start) as usize;
 if in_extent >= inline.len() {
 break;
 }
 let chunk = (inline.len() - in_extent).min(to_read - done);
 buf[done..done + chunk].copy_from_slice(&inline[in_extent..in_extent + chunk]);
 done += chunk;
 cursor += chunk as u64;
 continue;
 }

 if payload.len() < FILE_EXTENT_HEADER_LEN + FILE_EXTENT_REGULAR_LEN {
 return Err(Error::BadData);
 }
 let regular: FileExtentRegular =
 *from_bytes(&payload[FILE_EXTENT_HEADER_LEN..FILE_EXTENT_HEADER_LEN + FILE_EXTENT_REGULAR_LEN]);
 let extent_end = extent_start + regular.num_bytes;
 if cursor >= extent_end {
 // Sparse hole past this extent up to the next one (or EOF).
 let chunk = (extent_end.saturating_sub(cursor)).min((to_read - done) as u64) as usize;
 let hole = if chunk == 0 { to_read - done } else { chunk };
 buf[done..done + hole].fill(0);
 done += hole;
 cursor += hole as u64;
 continue;
 }
 if regular.disk_bytenr == 0 {
 let chunk = ((extent_end - cursor) as usize).min(to_read - done);
 buf[done..done + chunk].fill(0);
 done += chunk;
 cursor += chunk as u64;
 continue;
 }

 let in_extent = cursor - extent_start + regular.offset;
 let physical_byte = regular.disk_bytenr + in_extent;
 let block_size = u64::from(cache.block_size());
 let block_no = resolve_physical(physical_byte / block_size)?;
 let in_block = (physical_byte % block_size) as usize;
 let chunk = ((block_size as usize) - in_block).min(to_read - done).min((extent_end - cursor) as usize);
 let data = cache.get(block_no)?;
 buf[done..done + chunk].copy_from_slice(&data[in_block..in_block + chunk]);
 done += chunk;
 cursor += chunk as u64;
 }
 Ok(done)
 }

 /// See the module doc: the write path is intentionally unimplemented.
 pub fn write_at(&self, _txn: TransactionId, _offset: u64, _buf: &[u8]) -> CanFail {
 Err(Error::ReadOnlyDevice)
 }

 /// Inserts the three FS-tree items one new hard link needs in a single
 /// transaction — `INODE_REF(child, parent)`, `DIR_ITEM`, `DIR_INDEX` —
 /// `make_reference`. The directory-item insertion itself
 /// lives in [`crate::btrfs::dir`]; this just lays down the link record.
 pub fn make_reference<D: BlockDevice>(
 tree: &mut BTree<D>,
 txn: TransactionId,
 child: u64,
 parent: u64,
 name: &[u8],
 index: u64,
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let mut payload = Vec::with_capacity(INODE_REF_HEADER_LEN + name.len());
 payload.extend_from_slice(bytes_of(&InodeRefHeader {
 index,
 name_len: name.len() as u16,
 pad0: [0; 6],
 }));
 payload.extend_from_slice(name);
 tree.insert_item(txn, Key::new(child, KEY_INODE_REF, parent), &payload, alloc_block)
 }

 /// Resolves the parent object id of `child` via its `INODE_REF`,
 /// used to answer `".."` lookups.
 pub fn parent_of<D: BlockDevice>(tree: &BTree<D>, child: u64) -> FsResult<u64> {
 let (_, key, _) = tree.find_next(Key::new(child, KEY_INODE_REF, 0), KEY_INODE_REF)?;
 if key.object_id != child {
 return Err(Error::EntryNotFound);
 }
 Ok(key.offset)
 }

 /// Writes `item` back as this object's `INODE_ITEM`.
 pub fn store<D: BlockDevice>(tree: &mut BTree<D>, txn: TransactionId, object_id: u64, item: &InodeItem, alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let key = Key::new(object_id, KEY_INODE_ITEM, 0);
 let _ = tree.remove_entry(txn, key, alloc_block);
 tree.insert_item(txn, key, bytes_of(item), alloc_block)
 }
}

#[cfg(test)]
mod tests {
 use alloc::sync::Arc;

 use super::*;
 use crate::btrfs::layout::{FileExtentHeader, COMPRESSION_NONE, FILE_EXTENT_INLINE};
 use crate::device::MemBlockDevice;
 use bytemuck::Zeroable;

 fn fresh_tree(cache: &BlockCache<MemBlockDevice>, root: u64) -> BTree<'_, MemBlockDevice> {
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, cache, root, crate::btrfs::layout::FS_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 BTree::new(cache, root, cache.block_size() as usize, crate::btrfs::layout::FS_TREE_OBJECTID)
 }

 #[test]
 fn reads_inline_extent_data() {
 let dev = Arc::new(MemBlockDevice::new(4096, 32));
 let cache = BlockCache::new(dev);
 let mut tree = fresh_tree(&cache, 5);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(10u64);
 let mut alloc_block = || -> FsResult<u64> {
 let b = next.get();
 next.set(b + 1);
 Ok(b)
 };

 let mut item: InodeItem = Zeroable::zeroed();
 item.size = 5;
 BtrfsInode::store(&mut tree, txn, 256, &item, &mut alloc_block).unwrap();

 let mut payload = Vec::new();
 payload.extend_from_slice(bytes_of(&FileExtentHeader {
 generation: 1,
 ram_bytes: 5,
 compression: COMPRESSION_NONE,
 encryption: 0,
 other_encoding: 0,
 item_type: FILE_EXTENT_INLINE,
 pad0: [0; 3],
 }));
 payload.extend_from_slice(b"hello");
 tree.insert_item(txn, Key::new(256, KEY_EXTENT_DATA, 0), &payload, &mut alloc_block).unwrap();
 cache.end_transaction(txn).unwrap();

 let inode = BtrfsInode::load(&tree, 256).unwrap();
 let mut buf = [0u8; 5];
 let n = inode.read_at(&tree, &cache, 0, &mut buf, |b| Ok(b)).unwrap();
 assert_eq!(n, 5);
 assert_eq!(&buf, b"hello");
 }

 #[test]
 fn write_at_is_read_only() {
 let item: InodeItem = Zeroable::zeroed();
 let inode = BtrfsInode {
 object_id: 256,
 item,
 };
 assert_eq!(inode.write_at(1, 0, b"x").unwrap_err(), Error::ReadOnlyDevice);
 }
}
