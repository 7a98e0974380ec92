//! `Iso9660Inode`: the vnode-facing view of one directory record —
//! everything [`crate::vfs`] needs to answer `read_stat`/`read`/`read_link`
//! without re-walking the parent directory.

use alloc::string::String;

use crate::iso9660::dir::{DirRecord, RockRidge};

#[derive(Clone, Debug)]
pub struct Iso9660Inode {
 pub vnode_id: u64,
 pub extent_lba: u32,
 pub data_length: u32,
 pub is_directory: bool,
 pub name: String,
 pub rock_ridge: RockRidge,
}

impl Iso9660Inode {
 #[must_use]
 pub fn from_record(record: &DirRecord) -> Self {
 Self {
 vnode_id: u64::from(record.extent_lba),
 extent_lba: record.extent_lba,
 data_length: record.data_length,
 is_directory: record.is_directory,
 name: record.name.clone(),
 rock_ridge: record.rock_ridge.clone(),
 }
 }

 #[must_use]
 pub fn size(&self) -> u64 {
 u64::from(self.data_length)
 }

 #[must_use]
 pub fn is_symlink(&self) -> bool {
 self.rock_ridge.is_symlink()
 }

 #[must_use]
 pub fn mode(&self) -> u32 {
 const DEFAULT_DIR_MODE: u32 = 0o040_555;
 const DEFAULT_FILE_MODE: u32 = 0o100_444;
 self.rock_ridge.mode.unwrap_or(if self.is_directory {
 DEFAULT_DIR_MODE
 } else {
 DEFAULT_FILE_MODE
 })
 }

 #[must_use]
 pub fn links(&self) -> u32 {
 self.rock_ridge.links.unwrap_or(1)
 }

 #[must_use]
 pub fn uid(&self) -> u32 {
 self.rock_ridge.uid.unwrap_or(0)
 }

 #[must_use]
 pub fn gid(&self) -> u32 {
 self.rock_ridge.gid.unwrap_or(0)
 }
}
