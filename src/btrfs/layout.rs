//! On-disk record layout for the Btrfs tree engine: superblock, tree-node
//! header, item/key-pointer arrays, and the handful of item payloads this
//! engine interprets (inode, inode-ref, dir-item/dir-index, extent-data,
//! root-item, extent/metadata-item, chunk-item, xattr).
//!
//! As with the Ext family, every struct here is `#[repr(C)] + Pod` and read
//! straight out of a block buffer rather than parsed field-by-field. Fields
//! this engine never inspects (the device-item embedded in the superblock,
//! the root-backup slots) are kept as `reserved` byte arrays so `size_of`
//! still matches the on-disk record length.

use bytemuck::{Pod, Zeroable};

pub const BTRFS_MAGIC: [u8; 8] = *b"_BHRfS_M";
pub const BTRFS_MAGIC_FRESH: [u8; 8] = *b"!BHRfS_M";
pub const BTRFS_SUPER_INFO_OFFSET: u64 = 0x1_0000;
pub const BTRFS_SUPER_INFO_SIZE: usize = 4096;
pub const BTRFS_CSUM_SIZE: usize = 32;
pub const BTRFS_FSID_SIZE: usize = 16;
pub const BTRFS_LABEL_SIZE: usize = 256;
pub const BTRFS_SYSTEM_CHUNK_ARRAY_SIZE: usize = 2048;

pub const BTRFS_MAX_TREE_DEPTH: usize = 8;
pub const BTRFS_CSUM_TYPE_CRC32: u16 = 0;

// Well-known object ids (spec glossary / ctree.h).
pub const ROOT_TREE_OBJECTID: u64 = 1;
pub const EXTENT_TREE_OBJECTID: u64 = 2;
pub const CHUNK_TREE_OBJECTID: u64 = 3;
pub const DEV_TREE_OBJECTID: u64 = 4;
pub const FS_TREE_OBJECTID: u64 = 5;
pub const CSUM_TREE_OBJECTID: u64 = 7;
pub const FIRST_CHUNK_TREE_OBJECTID: u64 = 256;
pub const FIRST_FREE_OBJECTID: u64 = 256;

// Key types.
pub const KEY_INODE_ITEM: u8 = 1;
pub const KEY_INODE_REF: u8 = 12;
pub const KEY_XATTR_ITEM: u8 = 24;
pub const KEY_DIR_ITEM: u8 = 84;
pub const KEY_DIR_INDEX: u8 = 96;
pub const KEY_EXTENT_DATA: u8 = 108;
pub const KEY_ROOT_ITEM: u8 = 132;
pub const KEY_EXTENT_ITEM: u8 = 168;
pub const KEY_METADATA_ITEM: u8 = 169;
pub const KEY_BLOCK_GROUP_ITEM: u8 = 192;
pub const KEY_CHUNK_ITEM: u8 = 228;

/// A B-tree key, ordered lexicographically by `(object_id, type, offset)`,
/// all unsigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Key {
 pub object_id: u64,
 pub item_type: u8,
 pad0: [u8; 7],
 pub offset: u64,
}

impl Key {
 #[must_use]
 pub const fn new(object_id: u64, item_type: u8, offset: u64) -> Self {
 Self {
 object_id,
 item_type,
 pad0: [0; 7],
 offset,
 }
 }
}

/// Any-type wildcard used by `find_next`/`find_previous` when the caller
/// only cares about the key, not the item type ").
pub const KEY_TYPE_ANY: u8 = 0xFF;

/// Fixed-size header at the start of every tree node (leaf or internal),
/// "Tree node".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct NodeHeader {
 pub checksum: [u8; BTRFS_CSUM_SIZE],
 pub fsid: [u8; BTRFS_FSID_SIZE],
 pub logical_addr: u64,
 pub flags: u64,
 pub chunk_tree_uuid: [u8; BTRFS_FSID_SIZE],
 pub generation: u64,
 pub owner: u64,
 pub item_count: u32,
 pub level: u8,
 pub pad0: [u8; 3],
}

pub const NODE_HEADER_LEN: usize = core::mem::size_of::<NodeHeader>();

impl NodeHeader {
 #[must_use]
 pub fn is_leaf(&self) -> bool {
 self.level == 0
 }
}

/// A leaf's item directory entry: `(key, data_offset, data_size)`. The
/// offset is relative to the end of the node header, i.e. the start of the
/// data area; data grows downward from the end of the block as items are
/// inserted from low slot numbers upward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ItemHeader {
 pub key: Key,
 pub data_offset: u32,
 pub data_size: u32,
}

pub const ITEM_HEADER_LEN: usize = core::mem::size_of::<ItemHeader>();

/// An internal node's key-pointer entry: the key of the first item reachable
/// through `block_ptr`, plus its generation (used to decide if the child is
/// already CoWed by the running transaction).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct KeyPtr {
 pub key: Key,
 pub block_ptr: u64,
 pub generation: u64,
}

pub const KEY_PTR_LEN: usize = core::mem::size_of::<KeyPtr>();

/// The embedded device descriptor inside the superblock. Not interpreted
/// beyond mount-time bookkeeping (single-device volumes only, per the
/// Non-goals list excluding multi-device Btrfs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DevItem {
 pub devid: u64,
 pub total_bytes: u64,
 pub bytes_used: u64,
 pub io_align: u32,
 pub io_width: u32,
 pub sector_size: u32,
 pub pad0: [u8; 4],
 pub dev_type: u64,
 pub generation: u64,
 pub start_offset: u64,
 pub dev_group: u32,
 pub seek_speed: u8,
 pub bandwidth: u8,
 pub uuid: [u8; 16],
 pub fsid: [u8; 16],
 pub pad1: [u8; 2],
}

pub const DEV_ITEM_LEN: usize = core::mem::size_of::<DevItem>();

/// The primary Btrfs descriptor, read at `BTRFS_SUPER_INFO_OFFSET`.
///
/// Byte-offset-accurate up through `sys_chunk_array` (the system chunk
/// array this crate actually reads at mount time); the four root-backup
/// slots past it are kept as an opaque `reserved` tail since this engine
/// never consults them (no multi-root recovery, per the Non-goals list).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Superblock {
 pub checksum: [u8; BTRFS_CSUM_SIZE],
 pub fsid: [u8; BTRFS_FSID_SIZE],
 pub bytenr: u64,
 pub flags: u64,
 pub magic: [u8; 8],
 pub generation: u64,
 pub root: u64,
 pub chunk_root: u64,
 pub log_root: u64,
 pub log_root_transid: u64,
 pub total_bytes: u64,
 pub bytes_used: u64,
 pub root_dir_objectid: u64,
 pub num_devices: u64,
 pub sector_size: u32,
 pub node_size: u32,
 pub leaf_size: u32,
 pub stripe_size: u32,
 pub sys_chunk_array_size: u32,
 pub pad_a: [u8; 4], // aligns chunk_root_generation to its 8-byte boundary
 pub chunk_root_generation: u64,
 pub compat_flags: u64,
 pub compat_ro_flags: u64,
 pub incompat_flags: u64,
 pub csum_type: u16,
 pub root_level: u8,
 pub chunk_root_level: u8,
 pub log_root_level: u8,
 pub pad_b: [u8; 3], // aligns dev_item to its 8-byte boundary
 pub dev_item: DevItem,
 pub label: [u8; BTRFS_LABEL_SIZE],
 pub reserved_a: [u8; 100],
 pub sys_chunk_array: [u8; BTRFS_SYSTEM_CHUNK_ARRAY_SIZE],
 pub reserved_b: [u8; 676],
 // 936 = bytenr..num_devices (12 x 8B, incl. `magic`) + 5 u32s + pad_a
 // + the 4 trailing u64s (chunk_root_generation..incompat_flags) + csum_type
 // + the 3 level bytes + pad_b + reserved_a.
 pub padding_tail: [u8; BTRFS_SUPER_INFO_SIZE
 - BTRFS_CSUM_SIZE
 - BTRFS_FSID_SIZE
 - 936
 - DEV_ITEM_LEN
 - BTRFS_LABEL_SIZE
 - BTRFS_SYSTEM_CHUNK_ARRAY_SIZE
 - 676],
}

impl Superblock {
 #[must_use]
 pub fn is_fresh_magic(&self) -> bool {
 self.magic == BTRFS_MAGIC_FRESH
 }

 #[must_use]
 pub fn valid_magic(&self) -> bool {
 self.magic == BTRFS_MAGIC || self.is_fresh_magic()
 }
}

/// Fixed-size (not Pod: the `inline_data`/`block` union members the
/// reference code overlays onto the tail of the record are cast
/// individually) inode body, embedded as the payload of an `INODE_ITEM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InodeItem {
 pub generation: u64,
 pub transid: u64,
 pub size: u64,
 pub num_bytes: u64,
 pub block_group: u64,
 pub num_links: u32,
 pub uid: u32,
 pub gid: u32,
 pub mode: u32,
 pub rdev: u64,
 pub flags: u64,
 pub sequence: u64,
 pub reserved: [u64; 4],
 pub atime: InodeTimespec,
 pub ctime: InodeTimespec,
 pub mtime: InodeTimespec,
 pub otime: InodeTimespec,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InodeTimespec {
 pub seconds: u64,
 pub nanos: u32,
 pub pad0: [u8; 4],
}

pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFLNK: u32 = 0o120_000;

impl InodeItem {
 #[must_use]
 pub fn is_dir(&self) -> bool {
 self.mode & S_IFMT == S_IFDIR
 }

 #[must_use]
 pub fn is_symlink(&self) -> bool {
 self.mode & S_IFMT == S_IFLNK
 }

 #[must_use]
 pub fn file_type(&self) -> u8 {
 match self.mode & S_IFMT {
 S_IFDIR => 2,
 S_IFLNK => 7,
 _ => 1,
 }
 }
}

/// An `INODE_REF` payload: a variable-length record naming one hard-link's
/// parent and name; `name` follows immediately after this fixed header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InodeRefHeader {
 pub index: u64,
 pub name_len: u16,
 pub pad0: [u8; 6],
}

pub const INODE_REF_HEADER_LEN: usize = core::mem::size_of::<InodeRefHeader>();

/// Directory-entry types used by both `DIR_ITEM` and `DIR_INDEX` payloads.
pub const FT_UNKNOWN: u8 = 0;
pub const FT_REG_FILE: u8 = 1;
pub const FT_DIR: u8 = 2;
pub const FT_SYMLINK: u8 = 7;
pub const FT_XATTR: u8 = 8;

/// A `DIR_ITEM`/`DIR_INDEX`/`XATTR_ITEM` entry header: `data` (an embedded
/// key naming the item the name resolves to, plus name/data lengths);
/// `name` and an optional `data` blob (used by `XATTR_ITEM`) follow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DirItemHeader {
 pub location: Key,
 pub transid: u64,
 pub data_len: u16,
 pub name_len: u16,
 pub file_type: u8,
 pub pad0: [u8; 3],
}

pub const DIR_ITEM_HEADER_LEN: usize = core::mem::size_of::<DirItemHeader>();

/// An `EXTENT_DATA` header: inline data follows when `item_type ==
/// INLINE`; otherwise a [`FileExtentRegular`] follows describing the
/// out-of-line extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FileExtentHeader {
 pub generation: u64,
 pub ram_bytes: u64,
 pub compression: u8,
 pub encryption: u8,
 pub other_encoding: u16,
 pub item_type: u8,
 pub pad0: [u8; 3],
}

pub const FILE_EXTENT_HEADER_LEN: usize = core::mem::size_of::<FileExtentHeader>();

pub const FILE_EXTENT_INLINE: u8 = 0;
pub const FILE_EXTENT_REG: u8 = 1;
pub const FILE_EXTENT_PREALLOC: u8 = 2;

pub const COMPRESSION_NONE: u8 = 0;
pub const COMPRESSION_ZLIB: u8 = 1;

/// The fixed body of a non-inline `EXTENT_DATA` item, following a
/// [`FileExtentHeader`] when `item_type != INLINE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FileExtentRegular {
 pub disk_bytenr: u64,
 pub disk_num_bytes: u64,
 pub offset: u64,
 pub num_bytes: u64,
}

pub const FILE_EXTENT_REGULAR_LEN: usize = core::mem::size_of::<FileExtentRegular>();

/// A `ROOT_ITEM` payload: the root of a subvolume/core tree (FS tree,
/// extent tree, chunk tree,...), addressed by object id in the root tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RootItem {
 pub inode: InodeItem,
 pub generation: u64,
 pub root_dirid: u64,
 pub byte_nr: u64,
 pub byte_limit: u64,
 pub bytes_used: u64,
 pub last_snapshot: u64,
 pub flags: u64,
 pub refs: u32,
 pub pad0: [u8; 4],
 pub drop_progress: Key,
 pub drop_level: u8,
 pub level: u8,
 pub pad1: [u8; 6],
}

/// An `EXTENT_ITEM`/`METADATA_ITEM` payload: reference count plus flags
/// distinguishing data vs. tree-block extents "Extent".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ExtentItem {
 pub refs: u64,
 pub generation: u64,
 pub flags: u64,
}

pub const EXTENT_FLAG_DATA: u64 = 1 << 0;
pub const EXTENT_FLAG_TREE_BLOCK: u64 = 1 << 1;

/// A `BLOCK_GROUP_ITEM` payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BlockGroupItem {
 pub used: u64,
 pub chunk_objectid: u64,
 pub flags: u64,
}

pub const BLOCK_GROUP_DATA: u64 = 1 << 0;
pub const BLOCK_GROUP_SYSTEM: u64 = 1 << 1;
pub const BLOCK_GROUP_METADATA: u64 = 1 << 2;

/// A single stripe inside a `CHUNK_ITEM`: one physical device extent the
/// logical chunk maps onto. Single-device volumes only (Non-goals exclude
/// RAID profiles), so every chunk this engine reads has exactly one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkStripe {
 pub dev_id: u64,
 pub offset: u64,
 pub dev_uuid: [u8; 16],
}

pub const CHUNK_STRIPE_LEN: usize = core::mem::size_of::<ChunkStripe>();

/// A `CHUNK_ITEM` payload, mapping a logical range onto one or more
/// physical stripes; `stripe_count` [`ChunkStripe`]s follow this header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkItemHeader {
 pub length: u64,
 pub owner: u64,
 pub stripe_len: u64,
 pub chunk_type: u64,
 pub io_align: u32,
 pub io_width: u32,
 pub sector_size: u32,
 pub num_stripes: u16,
 pub sub_stripes: u16,
}

pub const CHUNK_ITEM_HEADER_LEN: usize = core::mem::size_of::<ChunkItemHeader>();

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn key_orders_by_object_then_type_then_offset() {
 let a = Key::new(5, KEY_DIR_ITEM, 10);
 let b = Key::new(5, KEY_DIR_ITEM, 20);
 let c = Key::new(5, KEY_DIR_INDEX, 0);
 let d = Key::new(6, KEY_INODE_ITEM, 0);
 assert!(a < b);
 assert!(b < c);
 assert!(c < d);
 }

 #[test]
 fn superblock_is_4096_bytes() {
 assert_eq!(core::mem::size_of::<Superblock>(), BTRFS_SUPER_INFO_SIZE);
 }

 #[test]
 fn inode_item_reports_mode_bits() {
 let mut item: InodeItem = Zeroable::zeroed();
 item.mode = S_IFDIR | 0o755;
 assert!(item.is_dir());
 assert_eq!(item.file_type(), 2);
 }
}
