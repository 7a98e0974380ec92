//! The block-cache contract consumed by the core.
//!
//! The real kernel block-cache module is out of scope (§1); this crate only
//! depends on the interface it exposes to filesystem drivers: pinned
//! get/get_writable/get_empty, transactional commit with listener callbacks,
//! and `has_block_in_transaction` for copy-on-write decisions. `BlockCache`
//! here is that interface, backed by a [`crate::device::BlockDevice`] and a
//! `hashbrown::HashMap` dirty-block index the same way the reference ext4
//! driver tracks a block group's state under a `spin::RwLock`.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::{Mutex, RwLock};

use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

pub type TransactionId = u64;

/// Reasons a [`TransactionListener`] is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionEvent {
 /// The block cache went quiescent; the journal uses this to flush a
 /// transaction that reached its size threshold.
 Idle,
 /// The transaction's blocks were durably written.
 Written,
 /// The transaction was aborted; listeners must roll back their
 /// in-memory state to what it was before the transaction started.
 Aborted,
}

/// Registered on a transaction; fired on commit/abort so allocators and
/// group descriptors can confirm or roll back their speculative counters.
pub trait TransactionListener: Send + Sync {
 fn transaction_done(&self, event: TransactionEvent, success: bool);
}

struct DirtyBlock {
 data: Vec<u8>,
 txn: TransactionId,
}

struct Transaction {
 id: TransactionId,
 parent: Option<TransactionId>,
 blocks: Vec<u64>,
 listeners: Vec<Arc<dyn TransactionListener>>,
 detached: bool,
}

/// A block cache over a [`BlockDevice`], implementing the transactional
/// get/put contract the journal and tree engines are written against.
pub struct BlockCache<D: BlockDevice> {
 device: Arc<D>,
 block_size: u32,
 dirty: RwLock<HashMap<u64, DirtyBlock>>,
 transactions: Mutex<HashMap<TransactionId, Transaction>>,
 next_txn_id: AtomicU64,
 read_only: bool,
}

impl<D: BlockDevice> BlockCache<D> {
 #[must_use]
 pub fn new(device: Arc<D>) -> Self {
 let block_size = device.block_size();
 let read_only = device.is_read_only();
 Self {
 device,
 block_size,
 dirty: RwLock::new(HashMap::new()),
 transactions: Mutex::new(HashMap::new()),
 next_txn_id: AtomicU64::new(1),
 read_only,
 }
 }

 #[must_use]
 pub fn block_size(&self) -> u32 {
 self.block_size
 }

 #[must_use]
 pub fn is_read_only(&self) -> bool {
 self.read_only
 }

 /// Reads a block, preferring a dirty in-cache copy over the device.
 pub fn get(&self, block: u64) -> FsResult<Vec<u8>> {
 if let Some(entry) = self.dirty.read().get(&block) {
 return Ok(entry.data.clone());
 }
 let mut buf = vec![0u8; self.block_size() as usize];
 self.device.read(block, &mut buf).map_err(|_| Error::IoError)?;
 Ok(buf)
 }

 /// Returns a writable copy of `block` bound to `txn`. The caller mutates
 /// the returned buffer and calls [`BlockCache::mark_dirty`] to commit it
 /// back into the cache.
 pub fn get_writable(&self, block: u64, txn: TransactionId) -> FsResult<Vec<u8>> {
 if self.read_only {
 return Err(Error::ReadOnlyDevice);
 }
 self.get(block)
 }

 /// Returns a zeroed buffer bound to `txn`, for blocks being allocated
 /// fresh rather than read-modify-written.
 pub fn get_empty(&self, txn: TransactionId) -> FsResult<Vec<u8>> {
 if self.read_only {
 return Err(Error::ReadOnlyDevice);
 }
 let _ = txn;
 Ok(vec![0u8; self.block_size() as usize])
 }

 /// Records `data` as the dirty contents of `block` under `txn`.
 pub fn mark_dirty(&self, block: u64, data: Vec<u8>, txn: TransactionId) -> CanFail {
 if self.read_only {
 return Err(Error::ReadOnlyDevice);
 }
 if data.len() != self.block_size() as usize {
 return Err(Error::BadValue);
 }
 self.dirty.write().insert(block, DirtyBlock {
 data,
 txn,
 });
 let mut txns = self.transactions.lock();
 if let Some(t) = txns.get_mut(&txn) {
 if !t.blocks.contains(&block) {
 t.blocks.push(block);
 }
 }
 Ok(())
 }

 /// Whether `block` is currently dirty under `txn` specifically — the
 /// predicate copy-on-write uses to decide in-place vs. allocate.
 #[must_use]
 pub fn has_block_in_transaction(&self, txn: TransactionId, block: u64) -> bool {
 self.dirty.read().get(&block).is_some_and(|e| e.txn == txn)
 }

 #[must_use]
 pub fn blocks_in_transaction(&self, txn: TransactionId) -> Vec<u64> {
 self.transactions
.lock()
.get(&txn)
.map(|t| t.blocks.clone())
.unwrap_or_default()
 }

 pub fn start_transaction(&self) -> TransactionId {
 let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
 self.transactions.lock().insert(id, Transaction {
 id,
 parent: None,
 blocks: Vec::new(),
 listeners: Vec::new(),
 detached: false,
 });
 id
 }

 pub fn start_sub_transaction(&self, parent: TransactionId) -> TransactionId {
 let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
 self.transactions.lock().insert(id, Transaction {
 id,
 parent: Some(parent),
 blocks: Vec::new(),
 listeners: Vec::new(),
 detached: false,
 });
 id
 }

 /// Peels a sub-transaction's blocks off into a freshly detached
 /// transaction, used when the journal must commit the main transaction
 /// without an oversized sub-transaction riding along.
 pub fn detach_sub_transaction(&self, txn: TransactionId) -> FsResult<TransactionId> {
 let mut txns = self.transactions.lock();
 let sub = txns.get_mut(&txn).ok_or(Error::BadValue)?;
 sub.detached = true;
 Ok(sub.id)
 }

 pub fn add_transaction_listener(&self, txn: TransactionId, listener: Arc<dyn TransactionListener>) -> CanFail {
 let mut txns = self.transactions.lock();
 let t = txns.get_mut(&txn).ok_or(Error::BadValue)?;
 t.listeners.push(listener);
 Ok(())
 }

 /// Writes every dirty block of `txn` to the device, fires `Written`
 /// then drops the transaction's bookkeeping. Blocks remain cached as
 /// clean reads.
 pub fn end_transaction(&self, txn: TransactionId) -> CanFail {
 let (blocks, listeners) = {
 let mut txns = self.transactions.lock();
 let t = txns.remove(&txn).ok_or(Error::BadValue)?;
 (t.blocks, t.listeners)
 };
 let dirty = self.dirty.read();
 for block in &blocks {
 if let Some(entry) = dirty.get(block) {
 self.device.write(*block, &entry.data).map_err(|_| Error::IoError)?;
 }
 }
 drop(dirty);
 for listener in &listeners {
 listener.transaction_done(TransactionEvent::Written, true);
 }
 Ok(())
 }

 /// Discards every dirty block of `txn`, firing `Aborted` so listeners
 /// roll back their speculative in-memory state.
 pub fn abort_transaction(&self, txn: TransactionId) -> CanFail {
 let (blocks, listeners) = {
 let mut txns = self.transactions.lock();
 let t = txns.remove(&txn).ok_or(Error::BadValue)?;
 (t.blocks, t.listeners)
 };
 let mut dirty = self.dirty.write();
 for block in &blocks {
 dirty.remove(block);
 }
 drop(dirty);
 for listener in &listeners {
 listener.transaction_done(TransactionEvent::Aborted, false);
 }
 Ok(())
 }

 pub fn sync(&self) -> CanFail {
 let dirty = self.dirty.read();
 for (block, entry) in dirty.iter() {
 self.device.write(*block, &entry.data).map_err(|_| Error::IoError)?;
 }
 drop(dirty);
 self.device.sync()
 }
}

/// A FIFO of committed-but-not-checkpointed transactions, the shape the
/// journal's idle-flush and checkpoint logic walks.
#[derive(Default)]
pub struct PendingCommits {
 queue: VecDeque<(TransactionId, u64)>,
}

impl PendingCommits {
 #[must_use]
 pub fn new() -> Self {
 Self::default()
 }

 pub fn push(&mut self, txn: TransactionId, commit_id: u64) {
 self.queue.push_back((txn, commit_id));
 }

 pub fn pop_front(&mut self) -> Option<(TransactionId, u64)> {
 self.queue.pop_front()
 }

 #[must_use]
 pub fn is_empty(&self) -> bool {
 self.queue.is_empty()
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;

 #[test]
 fn writes_become_visible_after_commit() {
 let dev = Arc::new(MemBlockDevice::new(512, 16));
 let cache = BlockCache::new(dev);
 let txn = cache.start_transaction();
 let mut buf = cache.get_writable(3, txn).unwrap();
 buf.fill(0x7A);
 cache.mark_dirty(3, buf, txn).unwrap();
 assert!(cache.has_block_in_transaction(txn, 3));
 cache.end_transaction(txn).unwrap();
 assert_eq!(cache.get(3).unwrap(), vec![0x7Au8; 512]);
 }

 #[test]
 fn abort_discards_dirty_blocks() {
 let dev = Arc::new(MemBlockDevice::new(512, 16));
 let cache = BlockCache::new(dev);
 let txn = cache.start_transaction();
 let mut buf = cache.get_writable(1, txn).unwrap();
 buf.fill(0xFF);
 cache.mark_dirty(1, buf, txn).unwrap();
 cache.abort_transaction(txn).unwrap();
 assert_eq!(cache.get(1).unwrap(), vec![0u8; 512]);
 }

 #[test]
 fn read_only_cache_rejects_writable_get() {
 let dev = Arc::new(MemBlockDevice::new(512, 16).read_only());
 let cache = BlockCache::new(dev);
 let txn = cache.start_transaction();
 assert_eq!(cache.get_writable(0, txn).unwrap_err(), Error::ReadOnlyDevice);
 }
}
