//! `XATTR_ITEM` lookup and enumeration — an extended
//! attribute is just a `DIR_ITEM`-shaped record (same header, same packed
//! multi-entry-per-hash layout) keyed by `KEY_XATTR_ITEM` instead of
//! `KEY_DIR_ITEM`, with the attribute value carried in the header's `data`
//! tail rather than resolving to another tree key.

use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes};

use crate::block_cache::TransactionId;
use crate::btrfs::layout::{DirItemHeader, Key, DIR_ITEM_HEADER_LEN, FT_XATTR, KEY_XATTR_ITEM};
use crate::btrfs::tree::BTree;
use crate::checksum::btrfs_name_hash;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

pub struct Xattr {
 pub name: Vec<u8>,
 pub value: Vec<u8>,
}

fn parse_entries(payload: &[u8]) -> FsResult<Vec<Xattr>> {
 let mut out = Vec::new();
 let mut cursor = 0usize;
 while cursor < payload.len() {
 if cursor + DIR_ITEM_HEADER_LEN > payload.len() {
 return Err(Error::BadData);
 }
 let header: DirItemHeader = *from_bytes(&payload[cursor..cursor + DIR_ITEM_HEADER_LEN]);
 let name_start = cursor + DIR_ITEM_HEADER_LEN;
 let name_end = name_start.checked_add(header.name_len as usize).ok_or(Error::BadData)?;
 let data_end = name_end.checked_add(header.data_len as usize).ok_or(Error::BadData)?;
 if data_end > payload.len() {
 return Err(Error::BadData);
 }
 out.push(Xattr {
 name: payload[name_start..name_end].to_vec(),
 value: payload[name_end..data_end].to_vec(),
 });
 cursor = data_end;
 }
 Ok(out)
}

fn encode_entry(owner: u64, name: &[u8], value: &[u8]) -> Vec<u8> {
 let mut buf = Vec::with_capacity(DIR_ITEM_HEADER_LEN + name.len() + value.len());
 buf.extend_from_slice(bytes_of(&DirItemHeader {
 location: Key::new(owner, KEY_XATTR_ITEM, 0),
 transid: 0,
 data_len: value.len() as u16,
 name_len: name.len() as u16,
 file_type: FT_XATTR,
 pad0: [0; 3],
 }));
 buf.extend_from_slice(name);
 buf.extend_from_slice(value);
 buf
}

/// Resolves the value of `name` on inode `owner`, scanning any hash
/// collisions packed into the same item.
pub fn find<D: BlockDevice>(tree: &BTree<D>, owner: u64, name: &[u8]) -> FsResult<Vec<u8>> {
 let hash = u64::from(btrfs_name_hash(name));
 let (_, payload) = tree.find_exact(Key::new(owner, KEY_XATTR_ITEM, hash))?;
 for entry in parse_entries(&payload)? {
 if entry.name == name {
 return Ok(entry.value);
 }
 }
 Err(Error::EntryNotFound)
}

/// Lists every extended attribute attached to `owner`.
pub fn list<D: BlockDevice>(tree: &BTree<D>, owner: u64) -> FsResult<Vec<Xattr>> {
 let mut out = Vec::new();
 let mut cursor = Key::new(owner, KEY_XATTR_ITEM, 0);
 loop {
 let (_, key, payload) = match tree.find_next(cursor, KEY_XATTR_ITEM) {
 Ok(v) => v,
 Err(Error::EntryNotFound) => break,
 Err(e) => return Err(e),
 };
 if key.object_id != owner || key.item_type != KEY_XATTR_ITEM {
 break;
 }
 out.extend(parse_entries(&payload)?);
 cursor = Key::new(owner, KEY_XATTR_ITEM, key.offset.wrapping_add(1));
 }
 Ok(out)
}

/// Sets (creating or overwriting) the value of `name` on inode `owner`.
pub fn set<D: BlockDevice>(
 tree: &mut BTree<D>,
 txn: TransactionId,
 owner: u64,
 name: &[u8],
 value: &[u8],
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let hash = u64::from(btrfs_name_hash(name));
 let item_key = Key::new(owner, KEY_XATTR_ITEM, hash);
 let existing = tree.find_exact(item_key).ok().map(|(_, payload)| payload);
 let mut combined: Vec<u8> = match existing {
 Some(payload) => parse_entries(&payload)?
.into_iter()
.filter(|e| e.name != name)
.flat_map(|e| encode_entry(owner, &e.name, &e.value))
.collect(),
 None => Vec::new(),
 };
 combined.extend_from_slice(&encode_entry(owner, name, value));
 let _ = tree.remove_entry(txn, item_key, alloc_block);
 tree.insert_item(txn, item_key, &combined, alloc_block)
}

/// Removes `name` from inode `owner`.
pub fn remove<D: BlockDevice>(
 tree: &mut BTree<D>,
 txn: TransactionId,
 owner: u64,
 name: &[u8],
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let hash = u64::from(btrfs_name_hash(name));
 let item_key = Key::new(owner, KEY_XATTR_ITEM, hash);
 let payload = tree.remove_entry(txn, item_key, alloc_block)?;
 let remaining: Vec<u8> = parse_entries(&payload)?
.into_iter()
.filter(|e| e.name != name)
.flat_map(|e| encode_entry(owner, &e.name, &e.value))
.collect();
 if !remaining.is_empty() {
 tree.insert_item(txn, item_key, &remaining, alloc_block)?;
 }
 Ok(())
}

#[cfg(test)]
mod tests {
 use alloc::sync::Arc;

 use super::*;
 use crate::block_cache::BlockCache;
 use crate::btrfs::layout::FS_TREE_OBJECTID;
 use crate::device::MemBlockDevice;

 fn fresh_tree(cache: &BlockCache<MemBlockDevice>, root: u64) -> BTree<'_, MemBlockDevice> {
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, cache, root, FS_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 BTree::new(cache, root, cache.block_size() as usize, FS_TREE_OBJECTID)
 }

 #[test]
 fn set_then_find_round_trips() {
 let dev = Arc::new(MemBlockDevice::new(4096, 32));
 let cache = BlockCache::new(dev);
 let mut tree = fresh_tree(&cache, 10);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(20u64);
 let mut alloc_block = || -> FsResult<u64> {
 let b = next.get();
 next.set(b + 1);
 Ok(b)
 };
 set(&mut tree, txn, 256, b"user.comment", b"hello", &mut alloc_block).unwrap();
 cache.end_transaction(txn).unwrap();

 assert_eq!(find(&tree, 256, b"user.comment").unwrap(), b"hello");
 assert_eq!(find(&tree, 256, b"user.other").unwrap_err(), Error::EntryNotFound);
 }

 #[test]
 fn remove_drops_value() {
 let dev = Arc::new(MemBlockDevice::new(4096, 32));
 let cache = BlockCache::new(dev);
 let mut tree = fresh_tree(&cache, 10);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(20u64);
 let mut alloc_block = || -> FsResult<u64> {
 let b = next.get();
 next.set(b + 1);
 Ok(b)
 };
 set(&mut tree, txn, 256, b"user.a", b"1", &mut alloc_block).unwrap();
 remove(&mut tree, txn, 256, b"user.a", &mut alloc_block).unwrap();
 cache.end_transaction(txn).unwrap();
 assert_eq!(find(&tree, 256, b"user.a").unwrap_err(), Error::EntryNotFound);
 }
}
