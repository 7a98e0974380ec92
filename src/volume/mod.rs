//! The shared volume contract: mount/unmount, block translation, feature
//! gating, allocation entry points.
//!
//! Each filesystem (`btrfs`, `ext`, `iso9660`) provides a concrete type
//! implementing [`Volume`]; this module holds the contract itself plus the
//! bits that are genuinely shared — feature-gate evaluation and the
//! mount-time probe dispatch, mirroring the reference's per-filesystem
//! `identify` hooks registered against a common disk-system-add-on
//! surface (`conquer_once::OnceCell` in place of that registration table,
//! since this crate has no module-load-time hook to run it from).

pub mod partition;

use alloc::string::String;
use alloc::sync::Arc;

use conquer_once::spin::OnceCell;

use crate::device::BlockDevice;
use crate::error::FsResult;
use crate::volume::partition::PartitionHandle;

/// Which on-disk format a mounted volume is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeKind {
 Btrfs,
 Ext,
 Iso9660,
}

/// What `identify` reports before a full mount is attempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsInfo {
 pub kind: VolumeKind,
 pub block_size: u32,
 pub total_size: u64,
 pub volume_name: String,
 pub read_only: bool,
}

/// Mount-time flags, independent of any filesystem-specific argument
/// string (`src/config.rs` parses those).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MountFlags {
 pub read_only: bool,
}

/// The operations every mounted volume supports, matching 
/// one-for-one. Allocation/orphan-list calls that don't apply to a given
/// filesystem (Btrfs has no orphan list; ISO9660 allocates nothing) return
/// [`crate::error::Error::Unsupported`].
pub trait Volume: Send + Sync {
 fn kind(&self) -> VolumeKind;
 fn block_size(&self) -> u32;
 fn is_read_only(&self) -> bool;
 fn root_inode_id(&self) -> u64;

 /// Translates a filesystem-logical block number into a physical device
 /// block number. Identity for Ext; chunk-tree lookup for Btrfs.
 fn find_block(&self, logical: u64) -> FsResult<u64>;

 fn unmount(&self) -> FsResult<()>;
}

/// Probes a device for a recognised filesystem, trying each magic at its
/// standard offset the way the reference disk-system registration walks
/// every registered add-on's `identify` until one claims the device.
pub fn identify<D: BlockDevice>(device: &D, partition: PartitionHandle) -> FsResult<FsInfo> {
 if let Ok(info) = crate::btrfs::identify(device, partition) {
 return Ok(info);
 }
 if let Ok(info) = crate::ext::identify(device, partition) {
 return Ok(info);
 }
 crate::iso9660::identify(device, partition)
}

/// Global registry of mounted volumes, keyed by an opaque mount id,
/// published once per process the same way the reference's
/// `gExt2VolumeOps`/`gExt2VnodeOps` dispatch tables are module-level
/// statics rather than per-call allocations.
pub struct VolumeRegistry {
 cell: OnceCell<spin::RwLock<hashbrown::HashMap<u64, Arc<dyn Volume>>>>,
}

impl VolumeRegistry {
 pub const fn new() -> Self {
 Self {
 cell: OnceCell::uninit(),
 }
 }

 fn map(&self) -> &spin::RwLock<hashbrown::HashMap<u64, Arc<dyn Volume>>> {
 self.cell.get_or_init(|| spin::RwLock::new(hashbrown::HashMap::new()))
 }

 pub fn register(&self, mount_id: u64, volume: Arc<dyn Volume>) {
 self.map().write().insert(mount_id, volume);
 }

 #[must_use]
 pub fn get(&self, mount_id: u64) -> Option<Arc<dyn Volume>> {
 self.map().read().get(&mount_id).cloned()
 }

 pub fn unregister(&self, mount_id: u64) -> Option<Arc<dyn Volume>> {
 self.map().write().remove(&mount_id)
 }
}

impl Default for VolumeRegistry {
 fn default() -> Self {
 Self::new()
 }
}

lazy_static::lazy_static! {
 /// The process-wide mounted-volume registry the VFS shim dispatches
 /// vnode calls through.
 pub static ref VOLUMES: VolumeRegistry = VolumeRegistry::new();
}
