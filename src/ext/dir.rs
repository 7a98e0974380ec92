//! Directory contents: a linear run of [`DirEntryHeader`] records per
//! block, optionally indexed by an HTree rooted in the directory's first
//! block.

use alloc::string::String;
use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes};

use crate::block_cache::BlockCache;
use crate::checksum::HashVersion;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::ext::inode::Inode;
use crate::ext::layout::{
 DirEntryHeader, FILE_TYPE_DIR, FILE_TYPE_REG, FILE_TYPE_SYMLINK, FILE_TYPE_UNKNOWN, DIR_ENTRY_HEADER_LEN,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
 pub inode: u32,
 pub file_type: u8,
 pub name: String,
}

impl DirEntry {
 #[must_use]
 pub fn is_dir(&self) -> bool {
 self.file_type == FILE_TYPE_DIR
 }
}

pub fn file_type_byte(mode_is_dir: bool, mode_is_symlink: bool) -> u8 {
 if mode_is_dir {
 FILE_TYPE_DIR
 } else if mode_is_symlink {
 FILE_TYPE_SYMLINK
 } else {
 FILE_TYPE_REG
 }
}

/// Parses every live entry out of one directory block (ignores deleted
/// entries, recognized by `inode == 0`, and the trailing metadata-checksum
/// tail record if present).
#[must_use]
pub fn entries_in_block(block: &[u8], filetype_feature: bool) -> Vec<DirEntry> {
 let mut out = Vec::new();
 let mut offset = 0usize;
 while offset + DIR_ENTRY_HEADER_LEN <= block.len() {
 let header: DirEntryHeader = *from_bytes(&block[offset..offset + DIR_ENTRY_HEADER_LEN]);
 if header.rec_len < DIR_ENTRY_HEADER_LEN as u16 {
 break;
 }
 let name_end = offset + DIR_ENTRY_HEADER_LEN + header.name_len as usize;
 if header.inode != 0 && name_end <= block.len() {
 let name_bytes = &block[offset + DIR_ENTRY_HEADER_LEN..name_end];
 if let Ok(name) = core::str::from_utf8(name_bytes) {
 out.push(DirEntry {
 inode: header.inode,
 file_type: if filetype_feature {
 header.file_type
 } else {
 FILE_TYPE_UNKNOWN
 },
 name: String::from(name),
 });
 }
 }
 offset += header.rec_len as usize;
 }
 out
}

/// Looks up `name` by linear scan of `block`, returning the matching entry.
#[must_use]
pub fn lookup_in_block(block: &[u8], name: &str) -> Option<DirEntry> {
 entries_in_block(block, true).into_iter().find(|e| e.name == name)
}

/// Rewrites `block` inserting a new entry `(inode, file_type, name)` into
/// the first gap (a deleted entry or padding) large enough to hold it,
/// splitting that gap's `rec_len` in two. Returns `Err(Error::DeviceFull)`
/// if no entry in the block has enough slack.
/// Formats a freshly-allocated, all-zero directory block into the single
/// dummy record [`insert_in_block`] expects to find: `{inode: 0, rec_len:
/// block.len(),...}`, spanning the whole block as one gap.
pub fn format_empty_block(block: &mut [u8]) {
 let header = DirEntryHeader {
 inode: 0,
 rec_len: block.len() as u16,
 name_len: 0,
 file_type: 0,
 };
 block[..DIR_ENTRY_HEADER_LEN].copy_from_slice(bytes_of(&header));
}

/// Whether `block` is still in its as-allocated, never-written state (no
/// dummy record has been laid down yet).
#[must_use]
pub fn is_virgin_block(block: &[u8]) -> bool {
 block.len() < DIR_ENTRY_HEADER_LEN || u16::from_le_bytes(block[4..6].try_into().unwrap()) == 0
}

pub fn insert_in_block(block: &mut [u8], inode: u32, file_type: u8, name: &str) -> CanFail {
 let name_len = name.len();
 if name_len > crate::ext::layout::EXT2_NAME_MAX {
 return Err(Error::BadValue);
 }
 let needed = align4(DIR_ENTRY_HEADER_LEN + name_len);
 let mut offset = 0usize;
 while offset + DIR_ENTRY_HEADER_LEN <= block.len() {
 let header: DirEntryHeader = *from_bytes(&block[offset..offset + DIR_ENTRY_HEADER_LEN]);
 if header.rec_len < DIR_ENTRY_HEADER_LEN as u16 {
 break;
 }
 let used = if header.inode == 0 {
 0
 } else {
 align4(DIR_ENTRY_HEADER_LEN + header.name_len as usize)
 };
 let slack = header.rec_len as usize - used;
 if slack >= needed {
 if used > 0 {
 let new_header = DirEntryHeader {
 inode: header.inode,
 rec_len: used as u16,
 name_len: header.name_len,
 file_type: header.file_type,
 };
 block[offset..offset + DIR_ENTRY_HEADER_LEN].copy_from_slice(bytes_of(&new_header));
 offset += used;
 }
 let new_entry = DirEntryHeader {
 inode,
 rec_len: slack as u16,
 name_len: name_len as u8,
 file_type,
 };
 block[offset..offset + DIR_ENTRY_HEADER_LEN].copy_from_slice(bytes_of(&new_entry));
 block[offset + DIR_ENTRY_HEADER_LEN..offset + DIR_ENTRY_HEADER_LEN + name_len]
.copy_from_slice(name.as_bytes());
 return Ok(());
 }
 offset += header.rec_len as usize;
 }
 Err(Error::DeviceFull)
}

/// Marks the entry named `name` as deleted (`inode = 0`) by merging its
/// `rec_len` into the previous live entry so the block stays walkable.
pub fn remove_from_block(block: &mut [u8], name: &str) -> CanFail {
 let mut offset = 0usize;
 let mut prev_offset: Option<usize> = None;
 while offset + DIR_ENTRY_HEADER_LEN <= block.len() {
 let header: DirEntryHeader = *from_bytes(&block[offset..offset + DIR_ENTRY_HEADER_LEN]);
 if header.rec_len < DIR_ENTRY_HEADER_LEN as u16 {
 break;
 }
 let name_end = offset + DIR_ENTRY_HEADER_LEN + header.name_len as usize;
 let matches = header.inode != 0
 && name_end <= block.len()
 && core::str::from_utf8(&block[offset + DIR_ENTRY_HEADER_LEN..name_end]) == Ok(name);
 if matches {
 if let Some(prev) = prev_offset {
 let mut prev_header: DirEntryHeader = *from_bytes(&block[prev..prev + DIR_ENTRY_HEADER_LEN]);
 prev_header.rec_len += header.rec_len;
 block[prev..prev + DIR_ENTRY_HEADER_LEN].copy_from_slice(bytes_of(&prev_header));
 } else {
 let mut zeroed = header;
 zeroed.inode = 0;
 block[offset..offset + DIR_ENTRY_HEADER_LEN].copy_from_slice(bytes_of(&zeroed));
 }
 return Ok(());
 }
 prev_offset = Some(offset);
 offset += header.rec_len as usize;
 }
 Err(Error::EntryNotFound)
}

fn align4(n: usize) -> usize {
 (n + 3) & !3
}

/// The root of an HTree directory index: a fake "." and ".." entry pair
/// occupying the same space a linear directory's first two entries would,
/// followed by `{reserved, hash_version, info_length, indirect_levels}` and
/// then `{limit, count}` plus `count - 1` `(hash, block)` entries, per spec
/// §4.4.
#[derive(Clone, Copy, Debug)]
pub struct HTreeRootInfo {
 pub hash_version: HashVersion,
 pub indirect_levels: u8,
 pub limit: u16,
 pub count: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HTreeEntry {
 pub hash: u32,
 pub block: u32,
}

const HTREE_ROOT_INFO_OFFSET: usize = 8 + 12 + 8;

impl HTreeRootInfo {
 /// Parses the root-info structure out of a directory's first block,
 /// which begins with dummy `.`/`..` entries occupying the first 24
 /// bytes, matching the on-disk convention old readers rely on to treat
 /// an indexed directory as an ordinary one.
 pub fn parse(block: &[u8]) -> FsResult<Self> {
 if block.len() < HTREE_ROOT_INFO_OFFSET + 8 {
 return Err(Error::BadData);
 }
 let hash_version = block[HTREE_ROOT_INFO_OFFSET + 1];
 let indirect_levels = block[HTREE_ROOT_INFO_OFFSET + 3];
 let limit = u16::from_le_bytes(block[HTREE_ROOT_INFO_OFFSET + 8..HTREE_ROOT_INFO_OFFSET + 10].try_into().unwrap());
 let count = u16::from_le_bytes(block[HTREE_ROOT_INFO_OFFSET + 10..HTREE_ROOT_INFO_OFFSET + 12].try_into().unwrap());
 Ok(Self {
 hash_version: HashVersion::from_disk(hash_version).ok_or(Error::BadData)?,
 indirect_levels,
 limit,
 count,
 })
 }

 #[must_use]
 pub fn entries_offset(&self) -> usize {
 HTREE_ROOT_INFO_OFFSET + 12
 }

 pub fn write(&self, block: &mut [u8]) {
 block[HTREE_ROOT_INFO_OFFSET] = 0;
 block[HTREE_ROOT_INFO_OFFSET + 1] = self.hash_version.to_disk();
 block[HTREE_ROOT_INFO_OFFSET + 2] = 8;
 block[HTREE_ROOT_INFO_OFFSET + 3] = self.indirect_levels;
 block[HTREE_ROOT_INFO_OFFSET + 8..HTREE_ROOT_INFO_OFFSET + 10].copy_from_slice(&self.limit.to_le_bytes());
 block[HTREE_ROOT_INFO_OFFSET + 10..HTREE_ROOT_INFO_OFFSET + 12].copy_from_slice(&self.count.to_le_bytes());
 }
}

/// Parses the `(hash, block)` entry array following either the root-info
/// struct (depth 0) or a `{fake_inode=0, rec_len=blocksize}` internal-node
/// header (depth > 0).
#[must_use]
pub fn htree_entries(block: &[u8], offset: usize, count: u16) -> Vec<HTreeEntry> {
 let mut out = Vec::with_capacity(count as usize);
 for i in 0..count as usize {
 let start = offset + i * 8;
 if start + 8 > block.len() {
 break;
 }
 let hash = u32::from_le_bytes(block[start..start + 4].try_into().unwrap());
 let blk = u32::from_le_bytes(block[start + 4..start + 8].try_into().unwrap());
 out.push(HTreeEntry {
 hash,
 block: blk,
 });
 }
 out
}

pub fn write_htree_entries(block: &mut [u8], offset: usize, entries: &[HTreeEntry]) {
 for (i, e) in entries.iter().enumerate() {
 let start = offset + i * 8;
 block[start..start + 4].copy_from_slice(&e.hash.to_le_bytes());
 block[start + 4..start + 8].copy_from_slice(&e.block.to_le_bytes());
 }
}

/// Finds the leaf directory block that should contain `hash`: the last
/// entry whose own hash is `<= hash` (entry 0's hash is implicitly
/// `u32::MIN` and always matches), per its HTree descent rule.
#[must_use]
pub fn htree_descend(entries: &[HTreeEntry], hash: u32) -> Option<u32> {
 entries.iter().rev().find(|e| e.hash <= hash).map(|e| e.block).or_else(|| entries.first().map(|e| e.block))
}

/// Splits a full leaf/internal node's `entries` at its midpoint for an
/// HTree insert that found no room, preserving hash-collision runs intact
/// on one side rather than splitting a collision group.
#[must_use]
pub fn htree_split_point(entries: &[HTreeEntry]) -> usize {
 let mid = entries.len() / 2;
 let split_hash = entries[mid].hash;
 let mut point = mid;
 while point > 0 && entries[point - 1].hash == split_hash {
 point -= 1;
 }
 if point == 0 {
 mid
 } else {
 point
 }
}

/// Reads logical directory block `block_index` through the directory
/// inode's own stream (extent tree, legacy indirect blocks, or sparse
/// zero-fill), the same path a regular file's contents are read through.
fn read_block<D: BlockDevice>(cache: &BlockCache<D>, dir_inode: &Inode, block_index: u64) -> FsResult<Vec<u8>> {
 let block_size = cache.block_size() as usize;
 let mut buf = alloc::vec![0u8; block_size];
 dir_inode.read_at(cache, block_index * block_size as u64, &mut buf)?;
 Ok(buf)
}

/// Linear scan of every block of `dir_inode` for `name`'s
/// unindexed directory lookup.
pub fn linear_lookup<D: BlockDevice>(cache: &BlockCache<D>, dir_inode: &Inode) -> FsResult<Vec<DirEntry>> {
 linear_iter(cache, dir_inode, true)
}

/// Concatenates every live entry across every block of `dir_inode`, in
/// on-disk order (used by both unindexed `readdir` and as the fallback
/// read path for an indexed directory's content, block by block).
pub fn linear_iter<D: BlockDevice>(cache: &BlockCache<D>, dir_inode: &Inode, filetype_feature: bool) -> FsResult<Vec<DirEntry>> {
 let block_size = u64::from(cache.block_size());
 let num_blocks = dir_inode.size().div_ceil(block_size);
 let mut out = Vec::new();
 for b in 0..num_blocks {
 let block = read_block(cache, dir_inode, b)?;
 out.extend(entries_in_block(&block, filetype_feature));
 }
 Ok(out)
}

/// Reads the `{limit, count}` pair of an internal HTree node, which sits
/// immediately after the node's fake zero-length directory-entry header
/// (the same 8-byte shape the root uses to stay walkable by old readers).
fn internal_node_entries(block: &[u8]) -> FsResult<Vec<HTreeEntry>> {
 if block.len() < 12 {
 return Err(Error::BadData);
 }
 let count = u16::from_le_bytes(block[10..12].try_into().unwrap());
 Ok(htree_entries(block, 12, count))
}

/// Resolves the leaf block that should hold `hash`, descending through at
/// most one indirection level.
fn htree_leaf_block<D: BlockDevice>(cache: &BlockCache<D>, dir_inode: &Inode, root_block: &[u8], hash: u32) -> FsResult<u32> {
 let root = HTreeRootInfo::parse(root_block)?;
 let root_entries = htree_entries(root_block, root.entries_offset(), root.count);
 let first = htree_descend(&root_entries, hash).ok_or(Error::BadData)?;
 if root.indirect_levels == 0 {
 return Ok(first);
 }
 let index_block = read_block(cache, dir_inode, u64::from(first))?;
 let index_entries = internal_node_entries(&index_block)?;
 htree_descend(&index_entries, hash).ok_or(Error::BadData)
}

/// HTree-indexed lookup: hashes `name`, descends the index, then linear
/// scans the resolved leaf block.
pub fn htree_lookup<D: BlockDevice>(
 cache: &BlockCache<D>,
 dir_inode: &Inode,
 name: &str,
 hash_version: HashVersion,
 hash_seed: [u32; 4]) -> FsResult<Option<DirEntry>> {
 let root_block = read_block(cache, dir_inode, 0)?;
 let hash = hash_version.hash(name.as_bytes()) ^ fold_seed(hash_seed);
 let leaf = htree_leaf_block(cache, dir_inode, &root_block, hash)?;
 let leaf_block = read_block(cache, dir_inode, u64::from(leaf))?;
 Ok(lookup_in_block(&leaf_block, name))
}

/// HTree root and leaf blocks carry real `.`/`..` entries on block 0 only;
/// every other leaf holds ordinary name entries directly, so a full
/// listing is block 0's two dummy entries plus every leaf block's
/// contents.
pub fn htree_iter<D: BlockDevice>(cache: &BlockCache<D>, dir_inode: &Inode, filetype_feature: bool) -> FsResult<Vec<DirEntry>> {
 let root_block = read_block(cache, dir_inode, 0)?;
 let mut out = entries_in_block(&root_block, filetype_feature);
 let root = HTreeRootInfo::parse(&root_block)?;
 let root_entries = htree_entries(&root_block, root.entries_offset(), root.count);

 let mut leaves = Vec::new();
 if root.indirect_levels == 0 {
 leaves.extend(root_entries.iter().map(|e| e.block));
 } else {
 for e in &root_entries {
 let index_block = read_block(cache, dir_inode, u64::from(e.block))?;
 leaves.extend(internal_node_entries(&index_block)?.iter().map(|s| s.block));
 }
 }
 for leaf in leaves {
 let block = read_block(cache, dir_inode, u64::from(leaf))?;
 out.extend(entries_in_block(&block, filetype_feature));
 }
 Ok(out)
}

/// XORs a hash seed down to one `u32` the way `ext4_fname_hash` combines
/// the four-word secondary seed before mixing it into the hash, so a
/// volume that sets a nonzero `hash_seed` still changes the hash but
/// `from_disk`'s default all-zero seed is a no-op.
#[must_use]
fn fold_seed(seed: [u32; 4]) -> u32 {
 seed[0] ^ seed[1] ^ seed[2] ^ seed[3]
}

#[cfg(test)]
mod tests {
 use super::*;

 fn empty_block(size: usize) -> Vec<u8> {
 let mut block = alloc::vec![0u8; size];
 let header = DirEntryHeader {
 inode: 0,
 rec_len: size as u16,
 name_len: 0,
 file_type: 0,
 };
 block[..DIR_ENTRY_HEADER_LEN].copy_from_slice(bytes_of(&header));
 block
 }

 #[test]
 fn insert_then_lookup_round_trips() {
 let mut block = empty_block(64);
 insert_in_block(&mut block, 15, FILE_TYPE_REG, "hello.txt").unwrap();
 let found = lookup_in_block(&block, "hello.txt").unwrap();
 assert_eq!(found.inode, 15);
 assert_eq!(found.file_type, FILE_TYPE_REG);
 }

 #[test]
 fn insert_twice_then_remove_first_merges_gap() {
 let mut block = empty_block(64);
 insert_in_block(&mut block, 15, FILE_TYPE_REG, "a").unwrap();
 insert_in_block(&mut block, 16, FILE_TYPE_REG, "b").unwrap();
 remove_from_block(&mut block, "a").unwrap();
 let entries = entries_in_block(&block, true);
 assert_eq!(entries.len(), 1);
 assert_eq!(entries[0].name, "b");
 }

 #[test]
 fn insert_fails_when_block_is_full() {
 let mut block = empty_block(24);
 insert_in_block(&mut block, 15, FILE_TYPE_REG, "exactly-sixteen!").unwrap();
 assert_eq!(insert_in_block(&mut block, 16, FILE_TYPE_REG, "x").unwrap_err(), Error::DeviceFull);
 }

 #[test]
 fn htree_descend_picks_greatest_entry_not_exceeding_hash() {
 let entries = alloc::vec![
 HTreeEntry { hash: 0, block: 3 },
 HTreeEntry { hash: 100, block: 4 },
 HTreeEntry { hash: 200, block: 5 },
 ];
 assert_eq!(htree_descend(&entries, 150), Some(4));
 assert_eq!(htree_descend(&entries, 250), Some(5));
 }

 #[test]
 fn htree_split_keeps_collision_run_together() {
 let entries = alloc::vec![
 HTreeEntry { hash: 1, block: 0 },
 HTreeEntry { hash: 5, block: 1 },
 HTreeEntry { hash: 5, block: 2 },
 HTreeEntry { hash: 9, block: 3 },
 ];
 let point = htree_split_point(&entries);
 assert_eq!(point, 1);
 }
}
