//! Directory lookup and iteration: `DIR_ITEM`/`DIR_INDEX` entries keyed by
//! `crc32c` name hash.
//!
//! A `DIR_ITEM` key is `(parent, KEY_DIR_ITEM, hash(name))`; when two names
//! collide on the same hash, Btrfs packs both entries as a sequence of
//! `(DirItemHeader, name, data)` records inside the single item at that key
//! rather than allocating a second item — `lookup` and `insert_entry` both
//! walk that packed sequence.

use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes};

use crate::block_cache::TransactionId;
use crate::btrfs::layout::{DirItemHeader, Key, DIR_ITEM_HEADER_LEN, KEY_DIR_INDEX, KEY_DIR_ITEM};
use crate::btrfs::tree::BTree;
use crate::checksum::btrfs_name_hash;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

/// One packed entry read out of a `DIR_ITEM`/`DIR_INDEX` payload.
pub struct DirEntry {
 pub location: Key,
 pub file_type: u8,
 pub name: Vec<u8>,
}

fn parse_entries(payload: &[u8]) -> FsResult<Vec<DirEntry>> {
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
 out.push(DirEntry {
 location: header.location,
 file_type: header.file_type,
 name: payload[name_start..name_end].to_vec(),
 });
 cursor = data_end;
 }
 Ok(out)
}

fn encode_entry(location: Key, file_type: u8, name: &[u8]) -> Vec<u8> {
 let mut buf = Vec::with_capacity(DIR_ITEM_HEADER_LEN + name.len());
 buf.extend_from_slice(bytes_of(&DirItemHeader {
 location,
 transid: 0,
 data_len: 0,
 name_len: name.len() as u16,
 file_type,
 pad0: [0; 3],
 }));
 buf.extend_from_slice(name);
 buf
}

/// Resolves `name` inside directory `parent` directory
/// lookup.
pub fn lookup<D: BlockDevice>(tree: &BTree<D>, parent: u64, name: &[u8]) -> FsResult<Key> {
 let hash = u64::from(btrfs_name_hash(name));
 let (_, payload) = tree.find_exact(Key::new(parent, KEY_DIR_ITEM, hash))?;
 for entry in parse_entries(&payload)? {
 if entry.name == name {
 return Ok(entry.location);
 }
 }
 Err(Error::EntryNotFound)
}

/// Iterates `parent`'s `DIR_INDEX` entries in index order, synthesizing
/// `.` and `..` first readdir. `parent_of` resolves `..`
/// (the FS tree root has no `INODE_REF`, so the caller passes its own id
/// back for that case).
pub fn readdir<D: BlockDevice>(
 tree: &BTree<D>,
 parent: u64,
 parent_of: u64) -> FsResult<Vec<(Vec<u8>, Key, u8)>> {
 use crate::btrfs::layout::{FT_DIR, KEY_INODE_ITEM};

 let mut out = Vec::new();
 out.push((alloc::vec![b'.'], Key::new(parent, KEY_INODE_ITEM, 0), FT_DIR));
 out.push((alloc::vec![b'.', b'.'], Key::new(parent_of, KEY_INODE_ITEM, 0), FT_DIR));

 let mut cursor = Key::new(parent, KEY_DIR_INDEX, 0);
 loop {
 let (_, key, payload) = match tree.find_next(cursor, KEY_DIR_INDEX) {
 Ok(v) => v,
 Err(Error::EntryNotFound) => break,
 Err(e) => return Err(e),
 };
 if key.object_id != parent || key.item_type != KEY_DIR_INDEX {
 break;
 }
 let entries = parse_entries(&payload)?;
 if let Some(entry) = entries.into_iter().next() {
 out.push((entry.name, entry.location, entry.file_type));
 }
 cursor = Key::new(parent, KEY_DIR_INDEX, key.offset.wrapping_add(1));
 }
 Ok(out)
}

/// Adds one name to directory `parent`, writing both the hash-keyed
/// `DIR_ITEM` (appending to any existing same-hash entry) and the
/// index-ordered `DIR_INDEX` link creation.
pub fn insert_entry<D: BlockDevice>(
 tree: &mut BTree<D>,
 txn: TransactionId,
 parent: u64,
 name: &[u8],
 location: Key,
 file_type: u8,
 index: u64,
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let hash = u64::from(btrfs_name_hash(name));
 let item_key = Key::new(parent, KEY_DIR_ITEM, hash);

 let existing = tree.find_exact(item_key).ok().map(|(_, payload)| payload);
 if let Some(payload) = &existing {
 for entry in parse_entries(payload)? {
 if entry.name == name {
 return Err(Error::FileExists);
 }
 }
 }

 let mut combined = existing.unwrap_or_default();
 combined.extend_from_slice(&encode_entry(location, file_type, name));
 let _ = tree.remove_entry(txn, item_key, alloc_block);
 tree.insert_item(txn, item_key, &combined, alloc_block)?;

 let index_payload = encode_entry(location, file_type, name);
 tree.insert_item(txn, Key::new(parent, KEY_DIR_INDEX, index), &index_payload, alloc_block)
}

/// Removes `name` from directory `parent`, dropping its `DIR_ITEM` entry
/// (or the whole item if it was the only one sharing that hash) and its
/// `DIR_INDEX` record.
pub fn remove_entry<D: BlockDevice>(
 tree: &mut BTree<D>,
 txn: TransactionId,
 parent: u64,
 name: &[u8],
 index: u64,
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let hash = u64::from(btrfs_name_hash(name));
 let item_key = Key::new(parent, KEY_DIR_ITEM, hash);
 let payload = tree.remove_entry(txn, item_key, alloc_block)?;
 let remaining: Vec<u8> = parse_entries(&payload)?
.into_iter()
.filter(|e| e.name != name)
.flat_map(|e| encode_entry(e.location, e.file_type, &e.name))
.collect();
 if !remaining.is_empty() {
 tree.insert_item(txn, item_key, &remaining, alloc_block)?;
 }
 let _ = tree.remove_entry(txn, Key::new(parent, KEY_DIR_INDEX, index), alloc_block);
 Ok(())
}

#[cfg(test)]
mod tests {
 use alloc::sync::Arc;

 use super::*;
 use crate::block_cache::BlockCache;
 use crate::btrfs::layout::{FS_TREE_OBJECTID, FT_REG_FILE, KEY_INODE_ITEM};
 use crate::device::MemBlockDevice;

 fn fresh_tree(cache: &BlockCache<MemBlockDevice>, root: u64) -> BTree<'_, MemBlockDevice> {
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, cache, root, FS_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 BTree::new(cache, root, cache.block_size() as usize, FS_TREE_OBJECTID)
 }

 #[test]
 fn insert_then_lookup_round_trips() {
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
 let child = Key::new(257, KEY_INODE_ITEM, 0);
 insert_entry(&mut tree, txn, 256, b"foo.txt", child, FT_REG_FILE, 2, &mut alloc_block).unwrap();
 cache.end_transaction(txn).unwrap();

 let found = lookup(&tree, 256, b"foo.txt").unwrap();
 assert_eq!(found, child);
 assert_eq!(lookup(&tree, 256, b"missing").unwrap_err(), Error::EntryNotFound);
 }

 #[test]
 fn readdir_synthesizes_dot_entries() {
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
 let child = Key::new(257, KEY_INODE_ITEM, 0);
 insert_entry(&mut tree, txn, 256, b"a", child, FT_REG_FILE, 2, &mut alloc_block).unwrap();
 cache.end_transaction(txn).unwrap();

 let entries = readdir(&tree, 256, 5).unwrap();
 assert_eq!(entries[0].0, b".");
 assert_eq!(entries[1].0, b"..");
 assert_eq!(entries[2].0, b"a");
 }
}
