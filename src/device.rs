//! The block-device seam.
//!
//! `DeviceOpener` — the open+geometry+block-cache wrapper a host uses to
//! turn a raw fd/handle into something this engine can mount — is out of
//! scope for this crate; only the interface it must satisfy is specified
//! here, the same way the reference drivers depend on a `DiskDevice` trait
//! implemented elsewhere (by `SataDevice`, wrapping the AHCI/IDE backends)
//! rather than talking to hardware themselves.

use crate::error::{CanFail, Error};

/// A fixed-size block device, addressed by block number.
///
/// `BlockDevice` is the *only* way this engine ever touches storage. Every
/// read and write the volume, tree, allocator and journal code issue goes
/// through a [`crate::block_cache::BlockCache`] wrapping one of these.
pub trait BlockDevice: Send + Sync {
 /// The device's block size, in bytes. Fixed for the lifetime of the
 /// device; re-opening at a different block size is the host's problem.
 fn block_size(&self) -> u32;

 /// Total number of addressable blocks.
 fn block_count(&self) -> u64;

 /// Reads exactly `buf.len()` bytes starting at block `block` into
 /// `buf`. `buf.len()` must be a multiple of [`BlockDevice::block_size`].
 fn read(&self, block: u64, buf: &mut [u8]) -> CanFail;

 /// Writes exactly `buf.len()` bytes starting at block `block`.
 /// `buf.len()` must be a multiple of [`BlockDevice::block_size`].
 ///
 /// # Errors
 /// Returns [`Error::ReadOnlyDevice`] if the device was opened read-only.
 fn write(&self, block: u64, buf: &[u8]) -> CanFail;

 /// Whether the device was opened read-only (as opposed to the volume
 /// choosing to mount read-only a device that supports writes).
 fn is_read_only(&self) -> bool;

 /// Flushes any host-side write buffering below this engine's own block
 /// cache. A no-op for devices with no such buffering.
 fn sync(&self) -> CanFail {
 Ok(())
 }
}

/// An in-memory [`BlockDevice`], used by tests and by hosts that want to
/// stage an image before committing it to real storage.
#[cfg(any(test, feature = "std-test"))]
pub struct MemBlockDevice {
 block_size: u32,
 read_only: bool,
 data: spin::Mutex<alloc::vec::Vec<u8>>,
}

#[cfg(any(test, feature = "std-test"))]
impl MemBlockDevice {
 #[must_use]
 pub fn new(block_size: u32, block_count: u64) -> Self {
 Self {
 block_size,
 read_only: false,
 data: spin::Mutex::new(alloc::vec![0u8; (block_size as u64 * block_count) as usize]),
 }
 }

 #[must_use]
 pub fn read_only(mut self) -> Self {
 self.read_only = true;
 self
 }

 /// Direct, lock-scoped access for test setup (seeding an on-disk image).
 pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
 f(&mut self.data.lock())
 }
}

#[cfg(any(test, feature = "std-test"))]
impl BlockDevice for MemBlockDevice {
 fn block_size(&self) -> u32 {
 self.block_size
 }

 fn block_count(&self) -> u64 {
 self.data.lock().len() as u64 / u64::from(self.block_size())
 }

 fn read(&self, block: u64, buf: &mut [u8]) -> CanFail {
 let data = self.data.lock();
 let offset = block as usize * self.block_size() as usize;
 let end = offset.checked_add(buf.len()).ok_or(Error::BadValue)?;
 if end > data.len() {
 return Err(Error::IoError);
 }
 buf.copy_from_slice(&data[offset..end]);
 Ok(())
 }

 fn write(&self, block: u64, buf: &[u8]) -> CanFail {
 if self.read_only {
 return Err(Error::ReadOnlyDevice);
 }
 let mut data = self.data.lock();
 let offset = block as usize * self.block_size() as usize;
 let end = offset.checked_add(buf.len()).ok_or(Error::BadValue)?;
 if end > data.len() {
 return Err(Error::IoError);
 }
 data[offset..end].copy_from_slice(buf);
 Ok(())
 }

 fn is_read_only(&self) -> bool {
 self.read_only
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn mem_device_round_trips() {
 let dev = MemBlockDevice::new(512, 16);
 dev.write(2, &[0xAAu8; 512]).unwrap();
 let mut buf = [0u8; 512];
 dev.read(2, &mut buf).unwrap();
 assert_eq!(buf, [0xAAu8; 512]);
 }

 #[test]
 fn read_only_device_rejects_write() {
 let dev = MemBlockDevice::new(512, 16).read_only();
 assert_eq!(dev.write(0, &[0u8; 512]).unwrap_err(), Error::ReadOnlyDevice);
 }
}
