//! `ExtentStream`: the Ext4 per-inode extent tree,.
//!
//! The root lives in the 60-byte `i_block` union of the inode record
//! (`{header, 4 × leaf-or-index}`); deeper levels live in dedicated,
//! checksummed blocks. `find_block` descends by linear/binary search;
//! `enlarge`/`shrink` grow or shrink the tree by one level when the root
//! fills up or empties out.

use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes, Pod, Zeroable};

use crate::block_cache::{BlockCache, TransactionId};
use crate::checksum::crc32c_seeded;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};
use crate::ext::layout::{ExtentHeader, ExtentIndex, ExtentLeaf, EXT4_EXTENT_MAGIC};

/// A contiguous run of freshly allocated physical blocks, handed to a
/// stream's `enlarge` by the volume's block allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatedRun {
 pub start: u64,
 pub len: u32,
}

const ROOT_ENTRY_SLOTS: u16 = 4;
const HEADER_LEN: usize = core::mem::size_of::<ExtentHeader>();
const ENTRY_LEN: usize = core::mem::size_of::<ExtentLeaf>();

/// A sparse marker `find_block` returns for a logical block with no
/// backing extent (a hole).
pub const SPARSE: u64 = 0xFFFF_FFFF;

pub struct ExtentStream<'a, D: BlockDevice> {
 cache: &'a BlockCache<D>,
 inode_id: u64,
 generation: u32,
 uuid: [u8; 16],
 /// The 60-byte `i_block` union, read from and written back to the
 /// inode record by the caller.
 root: [u8; 60],
}

fn entries_max_for_block(block_size: u32) -> u16 {
 ((block_size as usize - HEADER_LEN) / ENTRY_LEN) as u16
}

impl<'a, D: BlockDevice> ExtentStream<'a, D> {
 #[must_use]
 pub fn new(cache: &'a BlockCache<D>, inode_id: u64, generation: u32, uuid: [u8; 16], root: [u8; 60]) -> Self {
 Self {
 cache,
 inode_id,
 generation,
 uuid,
 root,
 }
 }

 #[must_use]
 pub fn root_bytes(&self) -> [u8; 60] {
 self.root
 }

 fn root_header(&self) -> ExtentHeader {
 *from_bytes(&self.root[..HEADER_LEN])
 }

 fn set_root_header(&mut self, header: ExtentHeader) {
 self.root[..HEADER_LEN].copy_from_slice(bytes_of(&header));
 }

 /// Initializes an empty root (depth 0, no entries) — called when
 /// creating a fresh regular file that will use extents.
 pub fn init_empty(&mut self) {
 self.root = [0u8; 60];
 self.set_root_header(ExtentHeader {
 magic: EXT4_EXTENT_MAGIC,
 entries: 0,
 max: ROOT_ENTRY_SLOTS,
 depth: 0,
 generation: 0,
 });
 }

 fn root_leaves(&self) -> &[u8] {
 &self.root[HEADER_LEN..]
 }

 fn checksum_block(&self, block: &[u8]) -> u32 {
 let mut seed = crc32c_seeded(0xFFFF_FFFF, &self.uuid);
 seed = crc32c_seeded(seed, &(self.inode_id as u32).to_le_bytes());
 seed = crc32c_seeded(seed, &self.generation.to_le_bytes());
 crc32c_seeded(seed, &block[..block.len() - 4])
 }

 fn read_extent_block(&self, block: u64) -> FsResult<Vec<u8>> {
 let data = self.cache.get(block)?;
 let expected = self.checksum_block(&data);
 let on_disk = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap());
 if expected != on_disk {
 log::warn!("ext4: extent block {block} failed checksum");
 return Err(Error::BadData);
 }
 Ok(data)
 }

 fn write_extent_block(&self, txn: TransactionId, block: u64, mut data: Vec<u8>) -> CanFail {
 let len = data.len();
 let checksum = self.checksum_block(&data);
 data[len - 4..].copy_from_slice(&checksum.to_le_bytes());
 self.cache.mark_dirty(block, data, txn)
 }

 /// Resolves `logical_block` to a physical block, or [`SPARSE`] for a
 /// hole: linear scan at each index level, descending
 /// into the greatest logical-block entry `<= target`; leaves binary
 /// search when they hold more than 7 entries, linear scan otherwise.
 pub fn find_block(&self, logical_block: u32) -> FsResult<u64> {
 let header = self.root_header();
 if header.entries == 0 {
 return Ok(SPARSE);
 }
 if header.is_leaf() {
 return Ok(Self::resolve_leaf(self.root_leaves(), header.entries, logical_block));
 }
 let mut block = self.descend_index(self.root_leaves(), header.entries, logical_block)?;
 loop {
 let data = self.read_extent_block(block)?;
 let h: ExtentHeader = *from_bytes(&data[..HEADER_LEN]);
 let body = &data[HEADER_LEN..];
 if h.is_leaf() {
 return Ok(Self::resolve_leaf(body, h.entries, logical_block));
 }
 block = self.descend_index(body, h.entries, logical_block)?;
 }
 }

 fn descend_index(&self, body: &[u8], n: u16, target: u32) -> FsResult<u64> {
 let mut chosen: Option<ExtentIndex> = None;
 for i in 0..n {
 let start = i as usize * ENTRY_LEN;
 let idx: ExtentIndex = *from_bytes(&body[start..start + ENTRY_LEN]);
 if idx.block <= target {
 chosen = Some(idx);
 } else {
 break;
 }
 }
 chosen.map(|idx| idx.leaf()).ok_or(Error::EntryNotFound)
 }

 fn resolve_leaf(body: &[u8], n: u16, target: u32) -> u64 {
 let leaves: Vec<ExtentLeaf> = (0..n)
.map(|i| {
 let start = i as usize * ENTRY_LEN;
 *from_bytes::<ExtentLeaf>(&body[start..start + ENTRY_LEN])
 })
.collect();
 let found = if n > 7 {
 leaves.binary_search_by_key(&target, |e| e.block).ok().map(|i| &leaves[i])
.or_else(|| leaves.iter().rev().find(|e| e.block <= target))
 } else {
 leaves.iter().rev().find(|e| e.block <= target)
 };
 match found {
 Some(e) if target < e.block + e.block_count() => {
 e.physical_start() + u64::from(target - e.block)
 }
 _ => SPARSE,
 }
 }

 /// Appends `run` (newly allocated, contiguous physical blocks) as the
 /// backing store for `logical_block..logical_block+run.len`, extending
 /// the last leaf entry if it is adjacent, otherwise inserting a new
 /// entry — splitting/growing the tree one level if the root is full.
 pub fn enlarge(&mut self, txn: TransactionId, logical_block: u32, run: AllocatedRun) -> CanFail {
 let mut header = self.root_header();
 if header.entries == 0 {
 header.depth = 0;
 }
 if header.is_leaf() {
 let mut leaves = self.read_root_leaves(header.entries);
 if let Some(last) = leaves.last_mut() {
 if !last.is_uninitialized()
 && u64::from(last.block) + u64::from(last.block_count()) == u64::from(logical_block)
 && last.physical_start() + u64::from(last.block_count()) == run.start
 {
 let new_len = last.block_count() + run.len;
 *last = ExtentLeaf {
 block: last.block,
 len: new_len as u16,
 start_hi: (last.physical_start() >> 32) as u16,
 start_lo: last.physical_start() as u32,
 };
 self.write_root_leaves(&leaves, header);
 return Ok(());
 }
 }
 if leaves.len() < ROOT_ENTRY_SLOTS as usize {
 leaves.push(ExtentLeaf {
 block: logical_block,
 len: run.len as u16,
 start_hi: (run.start >> 32) as u16,
 start_lo: run.start as u32,
 });
 header.entries += 1;
 self.write_root_leaves(&leaves, header);
 return Ok(());
 }
 // Root is full: grow the tree one level. The old root's leaves
 // move to a freshly allocated block; the in-inode root becomes
 // a depth-1 index node with one entry pointing at it.
 let child_block = run.start;
 let mut child = alloc::vec![0u8; self.cache.block_size() as usize];
 child[..HEADER_LEN].copy_from_slice(bytes_of(&ExtentHeader {
 magic: EXT4_EXTENT_MAGIC,
 entries: header.entries,
 max: entries_max_for_block(self.cache.block_size()),
 depth: 0,
 generation: 0,
 }));
 for (i, leaf) in leaves.iter().enumerate() {
 let start = HEADER_LEN + i * ENTRY_LEN;
 child[start..start + ENTRY_LEN].copy_from_slice(bytes_of(leaf));
 }
 self.write_extent_block(txn, child_block, child)?;
 self.root = [0u8; 60];
 self.set_root_header(ExtentHeader {
 magic: EXT4_EXTENT_MAGIC,
 entries: 1,
 max: ROOT_ENTRY_SLOTS,
 depth: 1,
 generation: 0,
 });
 let idx = ExtentIndex {
 block: 0,
 leaf_lo: child_block as u32,
 leaf_hi: (child_block >> 32) as u16,
 unused: 0,
 };
 self.root[HEADER_LEN..HEADER_LEN + ENTRY_LEN].copy_from_slice(bytes_of(&idx));
 return Ok(());
 }
 Err(Error::Unsupported)
 }

 fn read_root_leaves(&self, n: u16) -> Vec<ExtentLeaf> {
 (0..n)
.map(|i| {
 let start = i as usize * ENTRY_LEN;
 *from_bytes::<ExtentLeaf>(&self.root[HEADER_LEN + start..HEADER_LEN + start + ENTRY_LEN])
 })
.collect()
 }

 fn write_root_leaves(&mut self, leaves: &[ExtentLeaf], mut header: ExtentHeader) {
 header.entries = leaves.len() as u16;
 self.set_root_header(header);
 for (i, leaf) in leaves.iter().enumerate() {
 let start = HEADER_LEN + i * ENTRY_LEN;
 self.root[start..start + ENTRY_LEN].copy_from_slice(bytes_of(leaf));
 }
 }

 /// Trims the stream down to `new_logical_blocks`, freeing any physical
 /// blocks beyond that point and returning them for the allocator to
 /// reclaim. Only the root-resident (depth-0) case is implemented; an
 /// indexed tree shrink walks the rightmost path.
 pub fn shrink(&mut self, new_logical_blocks: u32) -> Vec<(u64, u32)> {
 let header = self.root_header();
 if !header.is_leaf() {
 return Vec::new();
 }
 let mut leaves = self.read_root_leaves(header.entries);
 let mut freed = Vec::new();
 leaves.retain_mut(|leaf| {
 if leaf.block >= new_logical_blocks {
 freed.push((leaf.physical_start(), leaf.block_count()));
 false
 } else if leaf.block + leaf.block_count() > new_logical_blocks {
 let keep = new_logical_blocks - leaf.block;
 freed.push((leaf.physical_start() + u64::from(keep), leaf.block_count() - keep));
 *leaf = ExtentLeaf {
 block: leaf.block,
 len: keep as u16,
 start_hi: leaf.start_hi,
 start_lo: leaf.start_lo,
 };
 true
 } else {
 true
 }
 });
 self.write_root_leaves(&leaves, header);
 freed
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use alloc::sync::Arc;

 fn stream(cache: &BlockCache<MemBlockDevice>) -> ExtentStream<'_, MemBlockDevice> {
 let mut s = ExtentStream::new(cache, 12, 0, [0u8; 16], [0u8; 60]);
 s.init_empty();
 s
 }

 #[test]
 fn sparse_stream_reads_as_hole() {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = BlockCache::new(dev);
 let s = stream(&cache);
 assert_eq!(s.find_block(0).unwrap(), SPARSE);
 }

 #[test]
 fn enlarge_then_find_resolves_physical_block() {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = BlockCache::new(dev);
 let txn = cache.start_transaction();
 let mut s = stream(&cache);
 s.enlarge(txn, 0, AllocatedRun {
 start: 10,
 len: 4,
 }).unwrap();
 assert_eq!(s.find_block(0).unwrap(), 10);
 assert_eq!(s.find_block(3).unwrap(), 13);
 assert_eq!(s.find_block(4).unwrap(), SPARSE);
 }

 #[test]
 fn enlarge_extends_adjacent_extent() {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = BlockCache::new(dev);
 let txn = cache.start_transaction();
 let mut s = stream(&cache);
 s.enlarge(txn, 0, AllocatedRun {
 start: 10,
 len: 4,
 }).unwrap();
 s.enlarge(txn, 4, AllocatedRun {
 start: 14,
 len: 2,
 }).unwrap();
 assert_eq!(s.root_header().entries, 1);
 assert_eq!(s.find_block(5).unwrap(), 15);
 }

 #[test]
 fn shrink_drops_trailing_extent() {
 let dev = Arc::new(MemBlockDevice::new(1024, 64));
 let cache = BlockCache::new(dev);
 let txn = cache.start_transaction();
 let mut s = stream(&cache);
 s.enlarge(txn, 0, AllocatedRun {
 start: 10,
 len: 8,
 }).unwrap();
 let freed = s.shrink(4);
 assert_eq!(freed, alloc::vec![(14, 4)]);
 assert_eq!(s.find_block(3).unwrap(), 13);
 assert_eq!(s.find_block(4).unwrap(), SPARSE);
 }
}
