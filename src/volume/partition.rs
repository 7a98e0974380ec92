//! The minimal partition seam.
//!
//! Partition-table parsing (MBR/GPT) is an external collaborator's job
//! (out of scope, per the purpose-and-scope notes this engine is built
//! against) — the reference `BTRFSAddOn`/`Ext4Fs::mount` don't parse a
//! partition table either, they receive a `partition_data` pointer already
//! resolved to a byte range. `PartitionHandle` is that same minimal seam,
//! populated by the host and handed to [`crate::volume::Volume::mount`].

/// The byte range of a partition on a device, as resolved by an external
/// partition-table parser before this crate ever sees the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionHandle {
 /// First logical block of the partition, in the device's own sectors.
 pub start_lba: u64,
 /// Length of the partition, in the device's own sectors.
 pub block_count: u64,
 /// The device's sector size; not necessarily the filesystem block size.
 pub logical_block_size: u32,
}

impl PartitionHandle {
 /// A handle covering an entire device — used when no partition table
 /// sits between the raw device and the filesystem.
 #[must_use]
 pub fn whole_device(block_count: u64, logical_block_size: u32) -> Self {
 Self {
 start_lba: 0,
 block_count,
 logical_block_size,
 }
 }

 #[must_use]
 pub fn byte_offset(&self) -> u64 {
 self.start_lba * u64::from(self.logical_block_size)
 }

 #[must_use]
 pub fn byte_len(&self) -> u64 {
 self.block_count * u64::from(self.logical_block_size)
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn whole_device_starts_at_zero() {
 let handle = PartitionHandle::whole_device(2048, 512);
 assert_eq!(handle.start_lba, 0);
 assert_eq!(handle.byte_len(), 2048 * 512);
 }
}
