//! On-disk record layout for the Ext2/3/4 family: superblock, group
//! descriptor, inode, directory entry, extent-tree nodes, journal records
//! and extended-attribute headers.
//!
//! Every struct here is `#[repr(C)] + Pod` and read directly out of a block
//! buffer with `bytemuck::from_bytes`/`pod_read_unaligned` rather than
//! parsed field-by-field, the same way the reference `ext4` driver's
//! `Ext4Superblock`/`GroupDescriptor`/`Inode` types do. Fields this engine
//! never inspects are kept as `reserved`/`_pad` arrays so the struct's
//! `size_of` still matches the on-disk record length.

use bytemuck::{Pod, Zeroable};

pub const EXT2_MAGIC: u16 = 0xEF53;
pub const EXT2_SUPERBLOCK_OFFSET: u64 = 1024;
pub const EXT2_ROOT_INODE: u32 = 2;
pub const EXT2_NAME_MAX: usize = 255;
pub const EXT4_EXTENT_MAGIC: u16 = 0xF30A;

pub const EXT4_DIR_ENTRY_TAIL_LEN: usize = 12;
pub const EXT4_DIR_ENTRY_TAIL_TWELVE: u8 = 12;
pub const EXT4_DIR_ENTRY_TAIL_HEXADE: u8 = 0xDE;

// feature_compat
pub const FEATURE_COMPAT_DIR_PREALLOC: u32 = 0x0001;
pub const FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;
pub const FEATURE_COMPAT_EXT_ATTR: u32 = 0x0008;
pub const FEATURE_COMPAT_RESIZE_INODE: u32 = 0x0010;
pub const FEATURE_COMPAT_DIR_INDEX: u32 = 0x0020;

// feature_incompat
pub const FEATURE_INCOMPAT_COMPRESSION: u32 = 0x0001;
pub const FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;
pub const FEATURE_INCOMPAT_RECOVER: u32 = 0x0004;
pub const FEATURE_INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
pub const FEATURE_INCOMPAT_META_BG: u32 = 0x0010;
pub const FEATURE_INCOMPAT_EXTENTS: u32 = 0x0040;
pub const FEATURE_INCOMPAT_64BIT: u32 = 0x0080;
pub const FEATURE_INCOMPAT_FLEX_BG: u32 = 0x0200;
pub const FEATURE_INCOMPAT_CSUM_SEED: u32 = 0x2000;

/// Incompat feature bits this engine understands; anything else fails
/// mount outright.
pub const SUPPORTED_INCOMPAT: u32 = FEATURE_INCOMPAT_FILETYPE
 | FEATURE_INCOMPAT_EXTENTS
 | FEATURE_INCOMPAT_64BIT
 | FEATURE_INCOMPAT_FLEX_BG
 | FEATURE_INCOMPAT_META_BG
 | FEATURE_INCOMPAT_RECOVER
 | FEATURE_INCOMPAT_JOURNAL_DEV
 | FEATURE_INCOMPAT_CSUM_SEED;

// feature_ro_compat
pub const FEATURE_RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
pub const FEATURE_RO_COMPAT_LARGE_FILE: u32 = 0x0002;
pub const FEATURE_RO_COMPAT_HUGE_FILE: u32 = 0x0008;
pub const FEATURE_RO_COMPAT_GDT_CSUM: u32 = 0x0010;
pub const FEATURE_RO_COMPAT_DIR_NLINK: u32 = 0x0020;
pub const FEATURE_RO_COMPAT_EXTRA_ISIZE: u32 = 0x0040;
pub const FEATURE_RO_COMPAT_METADATA_CSUM: u32 = 0x0400;

pub const SUPPORTED_RO_COMPAT: u32 = FEATURE_RO_COMPAT_SPARSE_SUPER
 | FEATURE_RO_COMPAT_LARGE_FILE
 | FEATURE_RO_COMPAT_HUGE_FILE
 | FEATURE_RO_COMPAT_GDT_CSUM
 | FEATURE_RO_COMPAT_DIR_NLINK
 | FEATURE_RO_COMPAT_EXTRA_ISIZE
 | FEATURE_RO_COMPAT_METADATA_CSUM;

/// The Ext2/3/4 primary superblock, 1024 bytes, at byte offset 1024.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct Superblock {
 pub inodes_count: u32,
 pub blocks_count_lo: u32,
 pub r_blocks_count_lo: u32,
 pub free_blocks_count_lo: u32,
 pub free_inodes_count: u32,
 pub first_data_block: u32,
 pub log_block_size: u32,
 pub log_cluster_size: u32,
 pub blocks_per_group: u32,
 pub clusters_per_group: u32,
 pub inodes_per_group: u32,
 pub mtime: u32,
 pub wtime: u32,
 pub mnt_count: u16,
 pub max_mnt_count: u16,
 pub magic: u16,
 pub state: u16,
 pub errors: u16,
 pub minor_rev_level: u16,
 pub lastcheck: u32,
 pub checkinterval: u32,
 pub creator_os: u32,
 pub rev_level: u32,
 pub def_resuid: u16,
 pub def_resgid: u16,
 // -- EXT2_DYNAMIC_REV --
 pub first_ino: u32,
 pub inode_size: u16,
 pub block_group_nr: u16,
 pub feature_compat: u32,
 pub feature_incompat: u32,
 pub feature_ro_compat: u32,
 pub uuid: [u8; 16],
 pub volume_name: [u8; 16],
 pub last_mounted: [u8; 64],
 pub algorithm_usage_bitmap: u32,
 pub prealloc_blocks: u8,
 pub prealloc_dir_blocks: u8,
 pub reserved_gdt_blocks: u16,
 pub journal_uuid: [u8; 16],
 pub journal_inum: u32,
 pub journal_dev: u32,
 pub last_orphan: u32,
 pub hash_seed: [u32; 4],
 pub def_hash_version: u8,
 pub jnl_backup_type: u8,
 pub desc_size: u16,
 pub default_mount_opts: u32,
 pub first_meta_bg: u32,
 pub mkfs_time: u32,
 pub jnl_blocks: [u32; 17],
 pub blocks_count_hi: u32,
 pub r_blocks_count_hi: u32,
 pub free_blocks_count_hi: u32,
 pub min_extra_isize: u16,
 pub want_extra_isize: u16,
 pub flags: u32,
 pub raid_stride: u16,
 pub mmp_interval: u16,
 pub mmp_block: u64,
 pub raid_stripe_width: u32,
 pub log_groups_per_flex: u8,
 pub checksum_type: u8,
 pub reserved_pad: u16,
 pub kbytes_written: u64,
 pub snapshot_inum: u32,
 pub snapshot_id: u32,
 pub snapshot_r_blocks_count: u64,
 pub snapshot_list: u32,
 pub error_count: u32,
 pub first_error_time: u32,
 pub first_error_ino: u32,
 pub first_error_block: u64,
 pub last_error_time: u32,
 pub last_error_ino: u32,
 pub last_error_block: u64,
 pub mount_opts: [u8; 64],
 pub usr_quota_inum: u32,
 pub grp_quota_inum: u32,
 pub overhead_clusters: u32,
 pub backup_bgs: [u32; 2],
 pub encrypt_algos: [u8; 4],
 pub encrypt_pw_salt: [u8; 16],
 pub lpf_ino: u32,
 pub prj_quota_inum: u32,
 pub checksum_seed: u32,
 pub reserved: [u8; 98 * 4],
 pub checksum: u32,
}

impl Superblock {
 #[must_use]
 pub fn block_size(&self) -> u32 {
 1024u32 << self.log_block_size
 }

 #[must_use]
 pub fn blocks_count(&self) -> u64 {
 (u64::from(self.blocks_count_hi) << 32) | u64::from(self.blocks_count_lo)
 }

 #[must_use]
 pub fn free_blocks_count(&self) -> u64 {
 (u64::from(self.free_blocks_count_hi) << 32) | u64::from(self.free_blocks_count_lo)
 }

 #[must_use]
 pub fn group_count(&self) -> u32 {
 let data_blocks = self.blocks_count() - u64::from(self.first_data_block);
 u32::try_from(data_blocks.div_ceil(u64::from(self.blocks_per_group))).unwrap_or(u32::MAX)
 }

 #[must_use]
 pub fn desc_size(&self) -> u16 {
 if self.feature_incompat & FEATURE_INCOMPAT_64BIT != 0 && self.desc_size > 32 {
 self.desc_size
 } else {
 32
 }
 }

 #[must_use]
 pub fn has_gdt_csum(&self) -> bool {
 self.feature_ro_compat & FEATURE_RO_COMPAT_GDT_CSUM != 0
 }

 #[must_use]
 pub fn has_metadata_csum(&self) -> bool {
 self.feature_ro_compat & FEATURE_RO_COMPAT_METADATA_CSUM != 0
 }

 #[must_use]
 pub fn uses_extents(&self) -> bool {
 self.feature_incompat & FEATURE_INCOMPAT_EXTENTS != 0
 }

 #[must_use]
 pub fn uses_htree(&self) -> bool {
 self.feature_compat & FEATURE_COMPAT_DIR_INDEX != 0
 }

 #[must_use]
 pub fn has_journal(&self) -> bool {
 self.feature_compat & FEATURE_COMPAT_HAS_JOURNAL != 0
 }

 /// Checks every incompat/ro-compat feature bit against what this engine
 /// supports: unknown incompat bits always fail mount,
 /// unknown ro-compat bits only fail a read-write mount.
 #[must_use]
 pub fn unsupported_features(&self, read_only: bool) -> bool {
 if self.feature_incompat & !SUPPORTED_INCOMPAT != 0 {
 return true;
 }
 if !read_only && self.feature_ro_compat & !SUPPORTED_RO_COMPAT != 0 {
 return true;
 }
 false
 }
}

/// A block-group descriptor, 32 or 64 bytes depending on `desc_size`.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct GroupDescriptor {
 pub block_bitmap_lo: u32,
 pub inode_bitmap_lo: u32,
 pub inode_table_lo: u32,
 pub free_blocks_count_lo: u16,
 pub free_inodes_count_lo: u16,
 pub used_dirs_count_lo: u16,
 pub flags: u16,
 pub exclude_bitmap_lo: u32,
 pub block_bitmap_csum_lo: u16,
 pub inode_bitmap_csum_lo: u16,
 pub itable_unused_lo: u16,
 pub checksum: u16,
 pub block_bitmap_hi: u32,
 pub inode_bitmap_hi: u32,
 pub inode_table_hi: u32,
 pub free_blocks_count_hi: u16,
 pub free_inodes_count_hi: u16,
 pub used_dirs_count_hi: u16,
 pub itable_unused_hi: u16,
 pub exclude_bitmap_hi: u32,
 pub block_bitmap_csum_hi: u16,
 pub inode_bitmap_csum_hi: u16,
 pub reserved: u32,
}

pub const GROUP_DESC_FLAG_INODE_UNINIT: u16 = 0x0001;
pub const GROUP_DESC_FLAG_BLOCK_UNINIT: u16 = 0x0002;
pub const GROUP_DESC_FLAG_INODE_ZEROED: u16 = 0x0004;

impl GroupDescriptor {
 #[must_use]
 pub fn block_bitmap(&self, wide: bool) -> u64 {
 if wide {
 (u64::from(self.block_bitmap_hi) << 32) | u64::from(self.block_bitmap_lo)
 } else {
 u64::from(self.block_bitmap_lo)
 }
 }

 #[must_use]
 pub fn inode_bitmap(&self, wide: bool) -> u64 {
 if wide {
 (u64::from(self.inode_bitmap_hi) << 32) | u64::from(self.inode_bitmap_lo)
 } else {
 u64::from(self.inode_bitmap_lo)
 }
 }

 #[must_use]
 pub fn inode_table(&self, wide: bool) -> u64 {
 if wide {
 (u64::from(self.inode_table_hi) << 32) | u64::from(self.inode_table_lo)
 } else {
 u64::from(self.inode_table_lo)
 }
 }

 #[must_use]
 pub fn free_blocks_count(&self, wide: bool) -> u32 {
 if wide {
 (u32::from(self.free_blocks_count_hi) << 16) | u32::from(self.free_blocks_count_lo)
 } else {
 u32::from(self.free_blocks_count_lo)
 }
 }

 #[must_use]
 pub fn free_inodes_count(&self, wide: bool) -> u32 {
 if wide {
 (u32::from(self.free_inodes_count_hi) << 16) | u32::from(self.free_inodes_count_lo)
 } else {
 u32::from(self.free_inodes_count_lo)
 }
 }

 #[must_use]
 pub fn block_uninit(&self) -> bool {
 self.flags & GROUP_DESC_FLAG_BLOCK_UNINIT != 0
 }

 #[must_use]
 pub fn inode_uninit(&self) -> bool {
 self.flags & GROUP_DESC_FLAG_INODE_UNINIT != 0
 }
}

/// File-type bits used by `i_mode` and the file-type byte of directory
/// entries (when `FILETYPE` is set).
pub const S_IFMT: u16 = 0xF000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFLNK: u16 = 0xA000;

pub const INODE_FLAG_INDEX: u32 = 0x0000_1000;
pub const INODE_FLAG_EXTENTS: u32 = 0x0008_0000;
pub const INODE_FLAG_INLINE_DATA: u32 = 0x1000_0000;
pub const INODE_FLAG_HUGE_FILE: u32 = 0x0004_0000;

/// The fixed 128-byte portion of an inode record common to every Ext2/3/4
/// revision; `inode_size` (usually 256) may carry additional bytes after
/// this which hold `osd2`'s high fields plus the extra-isize region the
/// attribute engine's inline xattrs live in (§4.10).
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct InodeRaw {
 pub mode: u16,
 pub uid_lo: u16,
 pub size_lo: u32,
 pub atime: u32,
 pub ctime: u32,
 pub mtime: u32,
 pub dtime: u32,
 pub gid_lo: u16,
 pub links_count: u16,
 pub blocks_lo: u32,
 pub flags: u32,
 pub osd1: u32,
 /// Either 12 direct + 1 single-indirect + 1 double-indirect +
 /// 1 triple-indirect block pointers (legacy), or an embedded extent
 /// tree root (`{header, 4 extents/indices}`), or up to 60 bytes of
 /// inline data/symlink target, all the same 60-byte union.
 pub block: [u8; 60],
 pub generation: u32,
 pub file_acl_lo: u32,
 pub size_hi: u32,
 pub obso_faddr: u32,
 pub blocks_hi: u16,
 pub file_acl_hi: u16,
 pub uid_hi: u16,
 pub gid_hi: u16,
 pub checksum_lo: u16,
 pub reserved: u16,
 pub extra_isize: u16,
 pub checksum_hi: u16,
 pub ctime_extra: u32,
 pub mtime_extra: u32,
 pub atime_extra: u32,
 pub crtime: u32,
 pub crtime_extra: u32,
 pub version_hi: u32,
 pub projid: u32,
}

pub const INODE_RAW_EXTRA_ISIZE_FIELDS_END: usize = 128;

impl InodeRaw {
 #[must_use]
 pub fn size(&self) -> u64 {
 (u64::from(self.size_hi) << 32) | u64::from(self.size_lo)
 }

 #[must_use]
 pub fn file_type(&self) -> u16 {
 self.mode & S_IFMT
 }

 #[must_use]
 pub fn is_dir(&self) -> bool {
 self.file_type() == S_IFDIR
 }

 #[must_use]
 pub fn is_symlink(&self) -> bool {
 self.file_type() == S_IFLNK
 }

 #[must_use]
 pub fn num_blocks_512(&self) -> u64 {
 if self.flags & INODE_FLAG_HUGE_FILE != 0 {
 (u64::from(self.blocks_hi) << 32) | u64::from(self.blocks_lo)
 } else {
 ((u64::from(self.blocks_hi) << 32) | u64::from(self.blocks_lo)) & 0x00FF_FFFF_FFFF
 }
 }
}

/// A variable-length directory entry: `{rec_len, name_len, file_type,
/// name}`, 4-byte aligned, the last entry of a block padded to block end
/// (minus the 12-byte tail checksum if metadata checksums are on).
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct DirEntryHeader {
 pub inode: u32,
 pub rec_len: u16,
 pub name_len: u8,
 pub file_type: u8,
}

pub const DIR_ENTRY_HEADER_LEN: usize = 8;
pub const DIR_ENTRY_MIN_LEN: usize = DIR_ENTRY_HEADER_LEN;

pub const FILE_TYPE_UNKNOWN: u8 = 0;
pub const FILE_TYPE_REG: u8 = 1;
pub const FILE_TYPE_DIR: u8 = 2;
pub const FILE_TYPE_SYMLINK: u8 = 7;

/// The 12-byte tail appended to the last directory entry of a block when
/// the metadata-checksum feature is on: `{reserved_zero=0, rec_len=12,
/// name_len=0 (so it reads as a tombstone to old readers), file_type=0xDE,
/// checksum}`.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct DirEntryTail {
 pub reserved_zero: u32,
 pub rec_len: u16,
 pub name_len: u8,
 pub file_type: u8,
 pub checksum: u32,
}

/// Header of an extent-tree block (either the 60-byte inode-embedded root
/// or a separately allocated index/leaf block).
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ExtentHeader {
 pub magic: u16,
 pub entries: u16,
 pub max: u16,
 pub depth: u16,
 pub generation: u32,
}

impl ExtentHeader {
 #[must_use]
 pub fn is_valid(&self) -> bool {
 self.magic == EXT4_EXTENT_MAGIC
 }

 #[must_use]
 pub fn is_leaf(&self) -> bool {
 self.depth == 0
 }
}

/// A leaf entry: `len`'s top bit marks an uninitialized (preallocated but
/// unwritten) extent, per the on-disk convention; the remaining 15 bits are
/// the block count (max 32768, halved to 32767 when uninitialized).
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ExtentLeaf {
 pub block: u32,
 pub len: u16,
 pub start_hi: u16,
 pub start_lo: u32,
}

impl ExtentLeaf {
 #[must_use]
 pub fn physical_start(&self) -> u64 {
 (u64::from(self.start_hi) << 32) | u64::from(self.start_lo)
 }

 #[must_use]
 pub fn is_uninitialized(&self) -> bool {
 self.len & 0x8000 != 0
 }

 #[must_use]
 pub fn block_count(&self) -> u32 {
 if self.is_uninitialized() {
 u32::from(self.len & 0x7FFF)
 } else {
 u32::from(self.len)
 }
 }
}

/// An index entry pointing at a child extent block one level down.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct ExtentIndex {
 pub block: u32,
 pub leaf_lo: u32,
 pub leaf_hi: u16,
 pub unused: u16,
}

impl ExtentIndex {
 #[must_use]
 pub fn leaf(&self) -> u64 {
 (u64::from(self.leaf_hi) << 32) | u64::from(self.leaf_lo)
 }
}

/// A four-byte magic number marking the start of an extended-attribute
/// region, both inline (inode tail) and in a dedicated attribute block.
pub const XATTR_MAGIC: u32 = 0xEA02_0000;

#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct XattrHeader {
 pub magic: u32,
 pub refcount: u32,
 pub blocks: u32,
 pub hash: u32,
 pub checksum: u32,
 pub reserved: [u32; 3],
}

/// An xattr entry; the value bytes live at the *end* of the block/inode
/// tail, growing backward, while entries grow forward from just after the
/// header — the mirror image of a Btrfs leaf's item/data layout.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct XattrEntry {
 pub name_len: u8,
 pub name_index: u8,
 pub value_offset: u16,
 pub value_block: u32,
 pub value_size: u32,
 pub hash: u32,
}

pub const XATTR_ENTRY_END: u8 = 0;

/// Maps `name_index` to the namespace prefix that, concatenated with the
/// raw on-disk name, forms the `linux.<index-name>.<raw-name>` attribute
/// name /SPEC_FULL §4.10 exposes to callers.
#[must_use]
pub fn xattr_index_name(index: u8) -> &'static str {
 match index {
 1 => "user",
 2 => "system.posix_acl_access",
 3 => "system.posix_acl_default",
 4 => "trusted",
 6 => "security",
 7 => "system",
 _ => "",
 }
}
