//! The copy-on-write B+-tree: [`Node`]/[`Path`] decoding and the
//! find/insert/remove operations of, keyed by `(object_id, type,
//! offset)` per §4.2.2.
//!
//! Every core Btrfs tree (FS tree, extent tree, chunk tree, root tree,
//! checksum tree, dev tree) is one of these, distinguished only by its
//! root block and `owner` id — there is exactly one tree engine, matching
//! the reference implementation's single `BTree` type reused across all of
//! them.

use alloc::vec::Vec;

use bytemuck::{bytes_of, from_bytes, Zeroable};

use crate::block_cache::{BlockCache, TransactionId};
use crate::btrfs::layout::{
 ItemHeader, Key, KeyPtr, NodeHeader, BTRFS_MAX_TREE_DEPTH, ITEM_HEADER_LEN, KEY_PTR_LEN, KEY_TYPE_ANY,
 NODE_HEADER_LEN,
};
use crate::checksum::crc32c;
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

/// A decoded tree node body: a leaf's `(header, payload)` items growing
/// down from the top, or an internal node's key pointers
/// "Tree node".
#[derive(Clone)]
pub enum NodeBody {
 Leaf(Vec<(ItemHeader, Vec<u8>)>),
 Internal(Vec<KeyPtr>),
}

#[derive(Clone)]
pub struct Node {
 pub header: NodeHeader,
 pub body: NodeBody,
}

impl Node {
 #[must_use]
 pub fn is_leaf(&self) -> bool {
 matches!(self.body, NodeBody::Leaf(_))
 }

 #[must_use]
 pub fn item_count(&self) -> usize {
 match &self.body {
 NodeBody::Leaf(items) => items.len(),
 NodeBody::Internal(ptrs) => ptrs.len(),
 }
 }

 /// The key of slot `i` — an item's key for a leaf, a key-pointer's key
 /// for an internal node.
 #[must_use]
 pub fn key_at(&self, i: usize) -> Option<Key> {
 match &self.body {
 NodeBody::Leaf(items) => items.get(i).map(|(h, _)| h.key),
 NodeBody::Internal(ptrs) => ptrs.get(i).map(|p| p.key),
 }
 }

 /// `space_used(leaf) = entry_size × n + (top_of_data − bottom_of_data)`,
 ///; for an internal node, just the key-pointer array.
 #[must_use]
 pub fn space_used(&self) -> usize {
 match &self.body {
 NodeBody::Leaf(items) => items.iter().map(|(_, data)| ITEM_HEADER_LEN + data.len()).sum(),
 NodeBody::Internal(ptrs) => ptrs.len() * KEY_PTR_LEN,
 }
 }

 #[must_use]
 pub fn space_left(&self, node_size: usize) -> usize {
 node_size.saturating_sub(NODE_HEADER_LEN).saturating_sub(self.space_used())
 }

 /// Leaf binary search for `key`; returns `Ok(slot)` on exact match,
 /// `Err(slot)` of where it would be inserted otherwise.
 fn binary_search_leaf(items: &[(ItemHeader, Vec<u8>)], key: Key) -> Result<usize, usize> {
 items.binary_search_by_key(&key, |(h, _)| h.key)
 }

 /// Internal-node search: the greatest index whose key is `<= target`
 ///.
 fn descend_slot(ptrs: &[KeyPtr], target: Key) -> usize {
 match ptrs.binary_search_by_key(&target, |p| p.key) {
 Ok(i) => i,
 Err(0) => 0,
 Err(i) => i - 1,
 }
 }

 fn parse(bytes: &[u8]) -> FsResult<Self> {
 if bytes.len() < NODE_HEADER_LEN {
 return Err(Error::BadData);
 }
 let header: NodeHeader = *from_bytes(&bytes[..NODE_HEADER_LEN]);
 let data = &bytes[NODE_HEADER_LEN..];
 let body = if header.is_leaf() {
 let mut items = Vec::with_capacity(header.item_count as usize);
 for i in 0..header.item_count as usize {
 let off = i * ITEM_HEADER_LEN;
 if off + ITEM_HEADER_LEN > data.len() {
 return Err(Error::BadData);
 }
 let ih: ItemHeader = *from_bytes(&data[off..off + ITEM_HEADER_LEN]);
 let start = ih.data_offset as usize;
 let end = start.checked_add(ih.data_size as usize).ok_or(Error::BadData)?;
 if end > data.len() {
 return Err(Error::BadData);
 }
 items.push((ih, data[start..end].to_vec()));
 }
 NodeBody::Leaf(items)
 } else {
 let mut ptrs = Vec::with_capacity(header.item_count as usize);
 for i in 0..header.item_count as usize {
 let off = i * KEY_PTR_LEN;
 if off + KEY_PTR_LEN > data.len() {
 return Err(Error::BadData);
 }
 ptrs.push(*from_bytes::<KeyPtr>(&data[off..off + KEY_PTR_LEN]));
 }
 NodeBody::Internal(ptrs)
 };
 Ok(Self {
 header,
 body,
 })
 }

 fn serialize(&self, node_size: usize) -> Vec<u8> {
 let mut out = alloc::vec![0u8; node_size];
 let mut header = self.header;
 header.item_count = self.item_count() as u32;
 let data = &mut out[NODE_HEADER_LEN..];
 match &self.body {
 NodeBody::Leaf(items) => {
 // Item headers grow from the top of the data area; payload
 // grows from the bottom.
 let mut data_top = data.len();
 for (i, (ih, payload)) in items.iter().enumerate() {
 data_top -= payload.len();
 let mut ih = *ih;
 ih.data_offset = data_top as u32;
 ih.data_size = payload.len() as u32;
 data[data_top..data_top + payload.len()].copy_from_slice(payload);
 let off = i * ITEM_HEADER_LEN;
 data[off..off + ITEM_HEADER_LEN].copy_from_slice(bytes_of(&ih));
 }
 }
 NodeBody::Internal(ptrs) => {
 for (i, p) in ptrs.iter().enumerate() {
 let off = i * KEY_PTR_LEN;
 data[off..off + KEY_PTR_LEN].copy_from_slice(bytes_of(p));
 }
 }
 }
 out[..NODE_HEADER_LEN].copy_from_slice(bytes_of(&header));
 let csum = crc32c(&out[32..]);
 out[..4].copy_from_slice(&csum.to_le_bytes());
 out
 }
}

/// One level of a descent from root to leaf: the block this level lives
/// in, its decoded node, and which slot the search chose there.
#[derive(Clone)]
pub struct PathLevel {
 pub block: u64,
 pub node: Node,
 pub slot: usize,
}

/// A root-to-leaf descent, owning up to [`BTRFS_MAX_TREE_DEPTH`] levels,
/// "Ownership". `levels[0]` is the root, `levels.last` the
/// leaf.
#[derive(Clone, Default)]
pub struct Path {
 pub levels: Vec<PathLevel>,
}

impl Path {
 #[must_use]
 pub fn leaf(&self) -> Option<&PathLevel> {
 self.levels.last()
 }

 #[must_use]
 pub fn leaf_slot(&self) -> Option<usize> {
 self.leaf().map(|l| l.slot)
 }
}

/// How a search should behave when `key` is not present at the leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindMode {
 Exact,
 /// Nudge one slot forward if the exact key is missing.
 Next,
 /// Nudge one slot backward if the exact key is missing.
 Previous,
}

/// One of the core trees (FS, extent, chunk, root, checksum, dev), keyed
/// by `(object_id, type, offset)`.
pub struct BTree<'a, D: BlockDevice> {
 cache: &'a BlockCache<D>,
 root: u64,
 node_size: usize,
 owner: u64,
}

impl<'a, D: BlockDevice> BTree<'a, D> {
 #[must_use]
 pub fn new(cache: &'a BlockCache<D>, root: u64, node_size: usize, owner: u64) -> Self {
 Self {
 cache,
 root,
 node_size,
 owner,
 }
 }

 #[must_use]
 pub fn root_block(&self) -> u64 {
 self.root
 }

 fn read_node(&self, block: u64) -> FsResult<Node> {
 let bytes = self.cache.get(block)?;
 if bytes.len() < self.node_size {
 return Err(Error::BadData);
 }
 Node::parse(&bytes[..self.node_size])
 }

 fn write_node(&self, txn: TransactionId, block: u64, node: &Node) -> CanFail {
 let bytes = node.serialize(self.node_size);
 self.cache.mark_dirty(block, bytes, txn)
 }

 /// Descends from the root, choosing at each internal level the
 /// greatest key-pointer `<= target`.
 fn search(&self, key: Key, item_type_filter: u8, mode: FindMode) -> FsResult<Path> {
 let mut path = Path::default();
 let mut block = self.root;
 loop {
 if path.levels.len() >= BTRFS_MAX_TREE_DEPTH {
 return Err(Error::Bug("btrfs tree exceeds BTRFS_MAX_TREE_DEPTH"));
 }
 let node = self.read_node(block)?;
 match &node.body {
 NodeBody::Internal(ptrs) => {
 if ptrs.is_empty() {
 return Err(Error::EntryNotFound);
 }
 let slot = Node::descend_slot(ptrs, key);
 let next_block = ptrs[slot].block_ptr;
 path.levels.push(PathLevel {
 block,
 node,
 slot,
 });
 block = next_block;
 }
 NodeBody::Leaf(items) => {
 let slot = match Node::binary_search_leaf(items, key) {
 Ok(i) => i,
 Err(i) => match mode {
 FindMode::Exact => {
 path.levels.push(PathLevel {
 block,
 node,
 slot: i,
 });
 return Err(Error::EntryNotFound);
 }
 FindMode::Next => i,
 FindMode::Previous => {
 if i == 0 {
 path.levels.push(PathLevel {
 block,
 node,
 slot: 0,
 });
 return Err(Error::EntryNotFound);
 }
 i - 1
 }
 },
 };
 if slot >= items.len() {
 path.levels.push(PathLevel {
 block,
 node,
 slot,
 });
 return Err(Error::EntryNotFound);
 }
 if item_type_filter != KEY_TYPE_ANY && items[slot].0.key.item_type != item_type_filter {
 path.levels.push(PathLevel {
 block,
 node,
 slot,
 });
 return Err(Error::EntryNotFound);
 }
 path.levels.push(PathLevel {
 block,
 node,
 slot,
 });
 return Ok(path);
 }
 }
 }
 }

 /// Exact lookup: the payload at `key`, plus the path that found it.
 pub fn find_exact(&self, key: Key) -> FsResult<(Path, Vec<u8>)> {
 let path = self.search(key, KEY_TYPE_ANY, FindMode::Exact)?;
 let leaf = path.leaf().expect("search always pushes a leaf level");
 let NodeBody::Leaf(items) = &leaf.node.body else {
 return Err(Error::Bug("search returned non-leaf as leaf level"));
 };
 Ok((path.clone(), items[leaf.slot].1.clone()))
 }

 /// As [`BTree::find_exact`] but nudges forward one slot when `key` is
 /// absent, verifying the type matches `item_type` (or [`KEY_TYPE_ANY`]).
 pub fn find_next(&self, key: Key, item_type: u8) -> FsResult<(Path, Key, Vec<u8>)> {
 let path = self.search(key, item_type, FindMode::Next)?;
 let leaf = path.leaf().expect("search always pushes a leaf level");
 let NodeBody::Leaf(items) = &leaf.node.body else {
 return Err(Error::Bug("search returned non-leaf as leaf level"));
 };
 let (ih, payload) = &items[leaf.slot];
 Ok((path.clone(), ih.key, payload.clone()))
 }

 pub fn find_previous(&self, key: Key, item_type: u8) -> FsResult<(Path, Key, Vec<u8>)> {
 let path = self.search(key, item_type, FindMode::Previous)?;
 let leaf = path.leaf().expect("search always pushes a leaf level");
 let NodeBody::Leaf(items) = &leaf.node.body else {
 return Err(Error::Bug("search returned non-leaf as leaf level"));
 };
 let (ih, payload) = &items[leaf.slot];
 Ok((path.clone(), ih.key, payload.clone()))
 }

 /// Walks `path` up until a left sibling is available, then descends to
 /// the rightmost leaf of that subtree.
 pub fn previous_leaf(&self, path: &Path) -> FsResult<Path> {
 let mut levels = path.levels.clone();
 loop {
 let Some(level) = levels.pop() else {
 return Err(Error::EntryNotFound);
 };
 if level.slot == 0 {
 continue;
 }
 let parent_slot = level.slot - 1;
 levels.push(PathLevel {
 slot: parent_slot,
..level
 });
 break;
 }
 self.descend_to_edge(levels, false)
 }

 /// As [`BTree::previous_leaf`], descending to the leftmost leaf of the
 /// next sibling subtree.
 pub fn next_leaf(&self, path: &Path) -> FsResult<Path> {
 let mut levels = path.levels.clone();
 loop {
 let Some(level) = levels.pop() else {
 return Err(Error::EntryNotFound);
 };
 let sibling = level.slot + 1;
 if sibling >= level.node.item_count() {
 continue;
 }
 levels.push(PathLevel {
 slot: sibling,
..level
 });
 break;
 }
 self.descend_to_edge(levels, true)
 }

 fn descend_to_edge(&self, mut levels: Vec<PathLevel>, leftmost: bool) -> FsResult<Path> {
 loop {
 let top = levels.last().expect("caller pushed at least one level");
 let NodeBody::Internal(ptrs) = &top.node.body else {
 return Ok(Path {
 levels,
 });
 };
 let block = ptrs[top.slot].block_ptr;
 let node = self.read_node(block)?;
 let slot = if leftmost { 0 } else { node.item_count().saturating_sub(1) };
 levels.push(PathLevel {
 block,
 node,
 slot,
 });
 }
 }

 /// Ensures every node on `path`, from leaf to root, is owned by `txn`
 /// — in place if the cache already says so, otherwise allocated fresh
 /// and the parent's key-pointer re-pointed, recursively toward the
 /// root. `alloc_block` hands out a free logical
 /// block number (the volume's extent allocator).
 fn cow_path(
 &mut self,
 txn: TransactionId,
 path: &Path,
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> FsResult<Path> {
 let mut new_levels = Vec::with_capacity(path.levels.len());
 let mut child_new_block: Option<u64> = None;

 for (depth, level) in path.levels.iter().enumerate().rev() {
 let mut node = level.node.clone();
 if let (Some(new_child), NodeBody::Internal(ptrs)) = (child_new_block, &mut node.body) {
 ptrs[level.slot].block_ptr = new_child;
 }

 let already_owned = self.cache.has_block_in_transaction(txn, level.block);
 let block = if already_owned {
 level.block
 } else {
 let fresh = alloc_block()?;
 node.header.logical_addr = fresh;
 fresh
 };
 node.header.generation = node.header.generation.max(1);
 node.header.owner = self.owner;
 self.write_node(txn, block, &node)?;

 new_levels.push(PathLevel {
 block,
 node,
 slot: level.slot,
 });
 child_new_block = if already_owned { None } else { Some(block) };
 let _ = depth;
 }
 new_levels.reverse();

 if let Some(new_root) = new_levels.first().map(|l| l.block) {
 if new_root != self.root {
 self.root = new_root;
 }
 }
 Ok(Path {
 levels: new_levels,
 })
 }

 /// Opens `n` empty slots at the leaf reached by a forward traversal
 /// from `start_key`, CoW-ing the path first. No
 /// push-or-split is implemented — like the reference read-write paths
 /// this engine exercises, an oversize insert simply fails
 /// [`Error::DeviceFull`] rather than splitting the leaf.
 pub fn make_entries(
 &mut self,
 txn: TransactionId,
 start_key: Key,
 lengths: &[u32],
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> FsResult<Path> {
 let search_path = match self.search(start_key, KEY_TYPE_ANY, FindMode::Next) {
 Ok(p) => p,
 Err(Error::EntryNotFound) => self.search(start_key, KEY_TYPE_ANY, FindMode::Previous).or_else(|_| {
 // Empty tree: synthesize a path pointing at the root leaf slot 0.
 let node = self.read_node(self.root)?;
 Ok(Path {
 levels: alloc::vec![PathLevel {
 block: self.root,
 node,
 slot: 0,
 }],
 })
 })?,
 Err(e) => return Err(e),
 };

 let total_len: usize = lengths.iter().map(|l| *l as usize).sum();
 let leaf = search_path.leaf().expect("path always has a leaf");
 if total_len + lengths.len() * ITEM_HEADER_LEN >= leaf.node.space_left(self.node_size) {
 return Err(Error::DeviceFull);
 }

 let mut path = self.cow_path(txn, &search_path, alloc_block)?;
 let leaf_level = path.levels.last_mut().expect("path always has a leaf");
 let NodeBody::Leaf(items) = &mut leaf_level.node.body else {
 return Err(Error::Bug("leaf path level held an internal node"));
 };

 // Slot may now point one past an item whose key is < start_key
 // (Next-mode nudge); re-pin it precisely to the insertion point.
 let slot = match items.binary_search_by_key(&start_key, |(h, _)| h.key) {
 Ok(i) | Err(i) => i,
 };
 let placeholder = ItemHeader::zeroed();
 for (i, _) in lengths.iter().enumerate() {
 items.insert(slot + i, (placeholder, Vec::new()));
 }
 leaf_level.slot = slot;
 self.write_node(txn, leaf_level.block, &leaf_level.node)?;
 Ok(path)
 }

 /// Inserts `(key, data)` pairs at the slot [`BTree::make_entries`]
 /// opened.
 pub fn insert_entries(
 &mut self,
 txn: TransactionId,
 start_key: Key,
 entries: &[(Key, Vec<u8>)],
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 let lengths: Vec<u32> = entries.iter().map(|(_, d)| d.len() as u32).collect();
 let mut path = self.make_entries(txn, start_key, &lengths, alloc_block)?;
 let leaf_level = path.levels.last_mut().expect("make_entries always returns a leaf");
 let NodeBody::Leaf(items) = &mut leaf_level.node.body else {
 return Err(Error::Bug("leaf path level held an internal node"));
 };
 let slot = leaf_level.slot;
 for (i, (key, data)) in entries.iter().enumerate() {
 items[slot + i] = (
 ItemHeader {
 key: *key,
 data_offset: 0,
 data_size: data.len() as u32,
 },
 data.clone());
 }
 self.write_node(txn, leaf_level.block, &leaf_level.node)
 }

 /// Removes the entry at `key`, returning its payload.
 pub fn remove_entry(
 &mut self,
 txn: TransactionId,
 key: Key,
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> FsResult<Vec<u8>> {
 let search_path = self.search(key, KEY_TYPE_ANY, FindMode::Exact)?;
 let mut path = self.cow_path(txn, &search_path, alloc_block)?;
 let leaf_level = path.levels.last_mut().expect("path always has a leaf");
 let NodeBody::Leaf(items) = &mut leaf_level.node.body else {
 return Err(Error::Bug("leaf path level held an internal node"));
 };
 if leaf_level.slot >= items.len() {
 return Err(Error::EntryNotFound);
 }
 let (_, payload) = items.remove(leaf_level.slot);
 self.write_node(txn, leaf_level.block, &leaf_level.node)?;
 Ok(payload)
 }

 /// Inserts a single item at its sorted position without a pre-fetched
 /// search path — the common case callers (inode/dir/xattr) use.
 pub fn insert_item(
 &mut self,
 txn: TransactionId,
 key: Key,
 data: &[u8],
 alloc_block: &mut dyn FnMut() -> FsResult<u64>) -> CanFail {
 self.insert_entries(txn, key, &[(key, data.to_vec())], alloc_block)
 }

 /// Builds a single fresh leaf node as the root of a brand-new, empty
 /// tree (used at mkfs time / Non-goal-adjacent test fixtures).
 pub fn init_empty_root(txn: TransactionId, cache: &BlockCache<D>, root_block: u64, owner: u64) -> CanFail {
 let node = Node {
 header: NodeHeader {
 checksum: [0; 32],
 fsid: [0; 16],
 logical_addr: root_block,
 flags: 0,
 chunk_tree_uuid: [0; 16],
 generation: 1,
 owner,
 item_count: 0,
 level: 0,
 pad0: [0; 3],
 },
 body: NodeBody::Leaf(Vec::new()),
 };
 let bytes = node.serialize(cache.block_size() as usize);
 cache.mark_dirty(root_block, bytes, txn)
 }
}

#[cfg(test)]
mod tests {
 use alloc::sync::Arc;

 use super::*;
 use crate::btrfs::layout::{KEY_DIR_ITEM, KEY_INODE_ITEM};
 use crate::device::MemBlockDevice;

 fn fresh_tree(cache: &BlockCache<MemBlockDevice>, root_block: u64) {
 let txn = cache.start_transaction();
 BTree::init_empty_root(txn, cache, root_block, crate::btrfs::layout::FS_TREE_OBJECTID).unwrap();
 cache.end_transaction(txn).unwrap();
 }

 fn alloc_from(next: &core::cell::Cell<u64>) -> impl FnMut() -> FsResult<u64> + '_ {
 move || {
 let b = next.get();
 next.set(b + 1);
 Ok(b)
 }
 }

 #[test]
 fn insert_then_find_exact_round_trips() {
 let dev = Arc::new(MemBlockDevice::new(4096, 64));
 let cache = BlockCache::new(dev);
 fresh_tree(&cache, 10);
 let mut tree = BTree::new(&cache, 10, 4096, crate::btrfs::layout::FS_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(20u64);
 let key = Key::new(256, KEY_INODE_ITEM, 0);
 tree.insert_item(txn, key, b"inode-payload", &mut alloc_from(&next)).unwrap();
 cache.end_transaction(txn).unwrap();

 let (_, payload) = tree.find_exact(key).unwrap();
 assert_eq!(payload, b"inode-payload");
 }

 #[test]
 fn find_next_nudges_past_missing_key() {
 let dev = Arc::new(MemBlockDevice::new(4096, 64));
 let cache = BlockCache::new(dev);
 fresh_tree(&cache, 10);
 let mut tree = BTree::new(&cache, 10, 4096, crate::btrfs::layout::FS_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(20u64);
 tree.insert_item(txn, Key::new(256, KEY_DIR_ITEM, 5), b"a", &mut alloc_from(&next)).unwrap();
 tree.insert_item(txn, Key::new(256, KEY_DIR_ITEM, 15), b"b", &mut alloc_from(&next)).unwrap();
 cache.end_transaction(txn).unwrap();

 let (_, found, payload) = tree.find_next(Key::new(256, KEY_DIR_ITEM, 10), KEY_DIR_ITEM).unwrap();
 assert_eq!(found.offset, 15);
 assert_eq!(payload, b"b");
 }

 #[test]
 fn remove_entry_drops_item() {
 let dev = Arc::new(MemBlockDevice::new(4096, 64));
 let cache = BlockCache::new(dev);
 fresh_tree(&cache, 10);
 let mut tree = BTree::new(&cache, 10, 4096, crate::btrfs::layout::FS_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(20u64);
 let key = Key::new(5, KEY_INODE_ITEM, 0);
 tree.insert_item(txn, key, b"x", &mut alloc_from(&next)).unwrap();
 let removed = tree.remove_entry(txn, key, &mut alloc_from(&next)).unwrap();
 cache.end_transaction(txn).unwrap();
 assert_eq!(removed, b"x");
 assert_eq!(tree.find_exact(key).unwrap_err(), Error::EntryNotFound);
 }

 #[test]
 fn oversize_insert_reports_device_full() {
 let dev = Arc::new(MemBlockDevice::new(4096, 64));
 let cache = BlockCache::new(dev);
 fresh_tree(&cache, 10);
 let mut tree = BTree::new(&cache, 10, 4096, crate::btrfs::layout::FS_TREE_OBJECTID);
 let txn = cache.start_transaction();
 let next = core::cell::Cell::new(20u64);
 let huge = alloc::vec![0u8; 8192];
 let err = tree.insert_item(txn, Key::new(1, KEY_INODE_ITEM, 0), &huge, &mut alloc_from(&next)).unwrap_err();
 assert_eq!(err, Error::DeviceFull);
 }
}
