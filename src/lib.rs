//! A shared on-disk filesystem engine for three drivers: read/write Btrfs,
//! read/write Ext2/3/4, and read-only ISO9660.
//!
//! This crate is the *core* that a host (a kernel module, or a userland
//! filesystem server in the vein of Haiku's `userlandfs`) links against. It
//! never opens a device and never owns a thread: callers hand it a
//! [`device::BlockDevice`], drive every operation from their own threads, and
//! translate its [`vfs`] contract to whatever vnode ABI the host exposes.
//!
//! # Layout
//!
//! - [`error`] — the crate-wide error taxonomy.
//! - [`checksum`] — CRC-16, CRC-32C and the three HTree hash variants.
//! - [`time`] — the on-disk Unix timestamp encoding and a host-supplied clock.
//! - [`config`] — parsing of the small `"key value;..."` mount argument strings.
//! - [`device`] — the block-device seam (`DeviceOpener`'s interface, not its implementation).
//! - [`block_cache`] — pinning, transactions, and the block-level cache every volume shares.
//! - [`volume`] — the `Volume` contract common to all three filesystems.
//! - [`btrfs`] — the copy-on-write B+-tree filesystem.
//! - [`ext`] — the Ext2/3/4 family (bitmap allocation, extent/indirect streams, HTree, journal).
//! - [`iso9660`] — the read-only ISO9660/Joliet/Rock Ridge driver.
//! - [`vfs`] — the generic shim translating any of the above to a vnode call table.

#![no_std]
#![allow(clippy::module_name_repetitions)]

extern crate alloc;

pub mod block_cache;
pub mod btrfs;
pub mod checksum;
pub mod config;
pub mod device;
pub mod error;
pub mod ext;
pub mod iso9660;
pub mod time;
pub mod vfs;
pub mod volume;

pub use error::{Error, FsResult};
