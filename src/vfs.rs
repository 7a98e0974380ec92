//! The generic VFS shim: translates the vnode contract of §6 into calls on
//! whichever concrete [`crate::volume::Volume`] is mounted, without binding
//! to any real kernel vnode ABI (that binding — registering a vnode-ops
//! table with an actual VFS, the way `gExt2VnodeOps` does in the reference
//! driver — is the out-of-scope "platform vnode shim" of; this
//! module is everything upstream of that boundary).
//!
//! Each filesystem gets its own thin submodule ([`ext`], [`btrfs`],
//! [`iso9660`]) rather than one trait object dispatched across all three,
//! because their native identifiers and return shapes genuinely differ
//! (Ext inode numbers are `u32`; Btrfs and ISO9660 object/vnode ids are
//! `u64`) and forcing them through one signature would cost more than the
//! dispatch it buys — the host already knows which filesystem it mounted.

use alloc::vec::Vec;

use crate::time::UnixTimestamp;

/// Which of `{size, mode, uid, gid, atime, mtime, ctime, crtime}` a
/// `write_stat` call should apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatMask(pub u32);

impl StatMask {
 pub const SIZE: u32 = 1 << 0;
 pub const MODE: u32 = 1 << 1;
 pub const UID: u32 = 1 << 2;
 pub const GID: u32 = 1 << 3;
 pub const ATIME: u32 = 1 << 4;
 pub const MTIME: u32 = 1 << 5;
 pub const CTIME: u32 = 1 << 6;
 pub const CRTIME: u32 = 1 << 7;

 #[must_use]
 pub fn has(self, bit: u32) -> bool {
 self.0 & bit != 0
 }
}

/// The `read_stat`/`write_stat` payload, normalized across all three
/// on-disk inode shapes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stat {
 pub size: u64,
 pub mode: u32,
 pub uid: u32,
 pub gid: u32,
 pub links: u32,
 pub atime: UnixTimestamp,
 pub mtime: UnixTimestamp,
 pub ctime: UnixTimestamp,
 pub crtime: UnixTimestamp,
 pub is_dir: bool,
 pub is_symlink: bool,
}

/// An opendir cookie: `start` is the listing position this handle began
/// at (stable across concurrent mutation of entries before it), `pos` is
/// how far the caller has already consumed `read_dir`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirCookie {
 pub start: u64,
 pub pos: u64,
}

/// Slices `entries[cookie.pos..]` down to at most `max` items, advancing
/// the cookie past what it returns. Every filesystem's `read_dir` reduces
/// to this once it has its own full, ordered entry list — none of the
/// three keep a dedicated on-disk iteration cursor.
fn paginate<T: Clone>(entries: &[T], cookie: &mut DirCookie, max: usize) -> Vec<T> {
 let start = cookie.pos as usize;
 if start >= entries.len() {
 return Vec::new();
 }
 let end = (start + max).min(entries.len());
 cookie.pos = end as u64;
 entries[start..end].to_vec()
}

/// The Ext2/3/4 shim.
pub mod ext {
 use alloc::string::String;
 use alloc::sync::Arc;
 use alloc::vec::Vec;

 use super::{paginate, DirCookie, Stat, StatMask};
 use crate::block_cache::TransactionId;
 use crate::device::BlockDevice;
 use crate::error::{CanFail, Error, FsResult};
 use crate::ext::dir;
 use crate::ext::inode::Inode;
 use crate::ext::layout::S_IFLNK;
 use crate::ext::volume::ExtVolume;
 use crate::volume::Volume;

 const INLINE_SYMLINK_MAX: usize = 60;

 #[must_use]
 pub fn stat_of(inode: &Inode) -> Stat {
 Stat {
 size: inode.size(),
 mode: u32::from(inode.mode()),
 uid: inode.uid(),
 gid: inode.gid(),
 links: u32::from(inode.links_count()),
 atime: inode.atime(),
 mtime: inode.mtime(),
 ctime: inode.ctime(),
 crtime: inode.crtime(),
 is_dir: inode.is_dir(),
 is_symlink: inode.is_symlink(),
 }
 }

 /// `lookup(parent, name) -> inode_id`.
 pub fn lookup<D: BlockDevice>(vol: &ExtVolume<D>, parent: &Inode, name: &str) -> FsResult<u32> {
 Ok(vol.dir_lookup(parent, name)?.inode)
 }

 /// `get_vnode(id)`; lazily materializes the inode record.
 pub fn get_vnode<D: BlockDevice>(vol: &ExtVolume<D>, id: u32) -> FsResult<Arc<Inode>> {
 vol.read_inode(id)
 }

 #[must_use]
 pub fn read_stat(inode: &Inode) -> Stat {
 stat_of(inode)
 }

 /// `write_stat(mask)`: size changes dispatch to resize
 /// (shrink frees blocks through the volume; grow leaves the new range
 /// sparse via [`Inode::fill_gap_with_zeros`], matching `write_at`'s own
 /// gap-filling so a later read of the grown range sees zeros without
 /// having actually allocated anything).
 pub fn write_stat<D: BlockDevice>(
 vol: &ExtVolume<D>,
 txn: TransactionId,
 inode: &Arc<Inode>,
 mask: StatMask,
 stat: &Stat) -> CanFail {
 if vol.is_read_only() {
 return Err(Error::ReadOnlyDevice);
 }
 if mask.has(StatMask::SIZE) {
 let old_size = inode.size();
 if stat.size < old_size {
 vol.truncate(txn, inode, stat.size)?;
 } else if stat.size > old_size {
 inode.fill_gap_with_zeros(old_size, stat.size);
 }
 }
 if mask.has(StatMask::MODE) {
 inode.set_mode(stat.mode as u16);
 }
 if mask.has(StatMask::UID) || mask.has(StatMask::GID) {
 let uid = if mask.has(StatMask::UID) { stat.uid } else { inode.uid() };
 let gid = if mask.has(StatMask::GID) { stat.gid } else { inode.gid() };
 inode.set_owner(uid, gid);
 }
 if mask.has(StatMask::ATIME) {
 inode.set_atime(stat.atime);
 }
 if mask.has(StatMask::MTIME) {
 inode.set_mtime(stat.mtime);
 }
 if mask.has(StatMask::CTIME) {
 inode.set_ctime(stat.ctime);
 }
 if mask.has(StatMask::CRTIME) {
 inode.set_crtime(stat.crtime);
 }
 vol.write_inode(txn, inode)
 }

 /// `read(pos, buf)`.
 pub fn read<D: BlockDevice>(vol: &ExtVolume<D>, inode: &Inode, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
 vol.read_file(inode, pos, buf)
 }

 /// `write(pos, buf)`: grows the file first if the
 /// write extends past its current size, then zero-fills the gap
 /// between the old size and `pos` exactly like `write_stat` growth
 /// does, before writing the caller's bytes.
 pub fn write<D: BlockDevice>(
 vol: &ExtVolume<D>,
 txn: TransactionId,
 inode: &Arc<Inode>,
 pos: u64,
 buf: &[u8]) -> CanFail {
 if vol.is_read_only() {
 return Err(Error::ReadOnlyDevice);
 }
 let old_size = inode.size();
 let new_size = pos + buf.len() as u64;
 if new_size > old_size && pos > old_size {
 inode.fill_gap_with_zeros(old_size, pos);
 }
 vol.write_file(txn, inode, pos, buf)?;
 vol.write_inode(txn, inode)
 }

 /// `read_dir(cookie)`; "." and ".." are ordinary on-disk
 /// entries for Ext, so no synthesis is needed here (see
 /// [`crate::ext::volume::ExtVolume::dir_iter`]).
 pub fn read_dir<D: BlockDevice>(
 vol: &ExtVolume<D>,
 dir_inode: &Inode,
 cookie: &mut DirCookie,
 max: usize) -> FsResult<Vec<(String, u32, u8)>> {
 let entries = vol.dir_iter(dir_inode)?;
 let triples: Vec<(String, u32, u8)> = entries.into_iter().map(|e| (e.name, e.inode, e.file_type)).collect();
 Ok(paginate(&triples, cookie, max))
 }

 /// `create(parent, name, mode, open_mode)`: allocates the
 /// inode, links it into `parent`, and for a directory lays down its own
 /// `.`/`..` entries and fixes up both link counts the way a fresh mkdir
 /// does on any Unix filesystem.
 pub fn create<D: BlockDevice>(
 vol: &ExtVolume<D>,
 txn: TransactionId,
 parent: &Arc<Inode>,
 name: &str,
 mode: u16,
 is_dir: bool) -> FsResult<Arc<Inode>> {
 if vol.is_read_only() {
 return Err(Error::ReadOnlyDevice);
 }
 if vol.dir_lookup(parent, name).is_ok() {
 return Err(Error::FileExists);
 }
 let preferred = vol.preferred_group(parent.id);
 let inode = vol.new_inode(txn, preferred, mode, is_dir)?;
 let file_type = dir::file_type_byte(is_dir, false);
 vol.dir_insert(txn, parent, inode.id, file_type, name)?;
 inode.link();

 if is_dir {
 let block_size = vol.cache().block_size() as usize;
 let mut block = alloc::vec![0u8; block_size];
 dir::format_empty_block(&mut block);
 dir::insert_in_block(&mut block, inode.id, dir::file_type_byte(true, false), ".")?;
 dir::insert_in_block(&mut block, parent.id, dir::file_type_byte(true, false), "..")?;
 vol.write_file(txn, &inode, 0, &block)?;
 inode.link();
 parent.link();
 vol.write_inode(txn, parent)?;
 }

 vol.write_inode(txn, &inode)?;
 Ok(inode)
 }

 /// `create_symlink(parent, name, target)`: inline storage
 /// (in the 60-byte `i_block` union) iff `target` is under 60 bytes,
 /// otherwise a regular one-block data stream.
 pub fn create_symlink<D: BlockDevice>(
 vol: &ExtVolume<D>,
 txn: TransactionId,
 parent: &Arc<Inode>,
 name: &str,
 target: &str) -> FsResult<Arc<Inode>> {
 if vol.is_read_only() {
 return Err(Error::ReadOnlyDevice);
 }
 if vol.dir_lookup(parent, name).is_ok() {
 return Err(Error::FileExists);
 }
 let preferred = vol.preferred_group(parent.id);
 let inode = vol.new_inode(txn, preferred, 0o777, false)?;
 inode.set_type_and_mode(S_IFLNK, 0o777);
 if target.len() < INLINE_SYMLINK_MAX {
 inode.set_inline_symlink(target.as_bytes())?;
 vol.write_inode(txn, &inode)?;
 } else {
 vol.write_inode(txn, &inode)?;
 vol.write_file(txn, &inode, 0, target.as_bytes())?;
 }
 vol.dir_insert(txn, parent, inode.id, dir::file_type_byte(false, true), name)?;
 inode.link();
 vol.write_inode(txn, &inode)?;
 Ok(inode)
 }

 /// `rename(old_parent, old_name, new_parent, new_name)`:
 /// rejects a rename that would make a directory its own descendant by
 /// walking `..` from `new_parent` back to the root, and if the moved
 /// entry is itself a directory, fixes up its `..` and both parents'
 /// link counts to match its new location.
 pub fn rename<D: BlockDevice>(
 vol: &ExtVolume<D>,
 txn: TransactionId,
 old_parent: &Arc<Inode>,
 old_name: &str,
 new_parent: &Arc<Inode>,
 new_name: &str) -> CanFail {
 if vol.is_read_only() {
 return Err(Error::ReadOnlyDevice);
 }
 let moving = vol.dir_lookup(old_parent, old_name)?;
 let moving_inode = vol.read_inode(moving.inode)?;

 if moving_inode.is_dir() {
 let mut cursor = new_parent.id;
 loop {
 if cursor == moving.inode {
 return Err(Error::BadValue);
 }
 if cursor == crate::ext::layout::EXT2_ROOT_INODE {
 break;
 }
 let cursor_inode = vol.read_inode(cursor)?;
 let dotdot = vol.dir_lookup(&cursor_inode, "..")?;
 if dotdot.inode == cursor {
 break;
 }
 cursor = dotdot.inode;
 }
 }

 if vol.dir_lookup(new_parent, new_name).is_ok() {
 vol.dir_remove(txn, new_parent, new_name)?;
 }
 vol.dir_insert(txn, new_parent, moving.inode, moving.file_type, new_name)?;
 vol.dir_remove(txn, old_parent, old_name)?;

 if moving_inode.is_dir() && !Arc::ptr_eq(old_parent, new_parent) {
 let block_size = vol.cache().block_size() as usize;
 let mut block = alloc::vec![0u8; block_size];
 moving_inode.read_at(vol.cache(), 0, &mut block)?;
 dir::remove_from_block(&mut block, "..")?;
 dir::insert_in_block(&mut block, new_parent.id, dir::file_type_byte(true, false), "..")?;
 vol.write_file(txn, &moving_inode, 0, &block)?;
 old_parent.unlink();
 new_parent.link();
 vol.write_inode(txn, old_parent)?;
 vol.write_inode(txn, new_parent)?;
 }
 Ok(())
 }

 /// `read_attr`/enumerate: merges the inline and
 /// external-block attribute regions.
 pub fn read_attr<D: BlockDevice>(vol: &ExtVolume<D>, inode: &Inode, name: &str) -> FsResult<Vec<u8>> {
 vol.read_xattrs(inode)?
.into_iter()
.find(|x| x.name == name)
.map(|x| x.value)
.ok_or(Error::EntryNotFound)
 }

 pub fn list_attrs<D: BlockDevice>(vol: &ExtVolume<D>, inode: &Inode) -> FsResult<Vec<String>> {
 Ok(vol.read_xattrs(inode)?.into_iter().map(|x| x.name).collect())
 }
}

/// The Btrfs shim. Per the design notes, the reviewed write vector
/// is `NULL`; this shim exposes only the read side and reports
/// [`Error::ReadOnlyDevice`] for every mutating call rather than build an
/// end-to-end write pipeline the reference never exercised.
pub mod btrfs {
 use alloc::string::String;
 use alloc::vec::Vec;

 use super::{paginate, DirCookie, Stat};
 use crate::btrfs::inode::BtrfsInode;
 use crate::btrfs::volume::BtrfsVolume;
 use crate::device::BlockDevice;
 use crate::error::{CanFail, Error, FsResult};
 use crate::time::UnixTimestamp;

 #[must_use]
 pub fn stat_of(inode: &BtrfsInode) -> Stat {
 let item = &inode.item;
 Stat {
 size: item.size,
 mode: item.mode,
 uid: item.uid,
 gid: item.gid,
 links: item.num_links,
 atime: UnixTimestamp::from_seconds_and_nanos(item.atime.seconds as i64, item.atime.nanos),
 mtime: UnixTimestamp::from_seconds_and_nanos(item.mtime.seconds as i64, item.mtime.nanos),
 ctime: UnixTimestamp::from_seconds_and_nanos(item.ctime.seconds as i64, item.ctime.nanos),
 crtime: UnixTimestamp::from_seconds_and_nanos(item.otime.seconds as i64, item.otime.nanos),
 is_dir: item.is_dir(),
 is_symlink: item.is_symlink(),
 }
 }

 /// `lookup(parent, name) -> inode_id`.
 pub fn lookup<D: BlockDevice>(vol: &BtrfsVolume<D>, parent: u64, name: &[u8]) -> FsResult<u64> {
 Ok(vol.lookup(parent, name)?.object_id)
 }

 pub fn get_vnode<D: BlockDevice>(vol: &BtrfsVolume<D>, id: u64) -> FsResult<BtrfsInode> {
 vol.read_inode(id)
 }

 #[must_use]
 pub fn read_stat(inode: &BtrfsInode) -> Stat {
 stat_of(inode)
 }

 /// Any `write_stat` mask is rejected outright: Btrfs mounts in this
 /// engine are read-only end to end.
 pub fn write_stat<D: BlockDevice>(_vol: &BtrfsVolume<D>, _id: u64, _mask: u32) -> CanFail {
 Err(Error::ReadOnlyDevice)
 }

 pub fn read<D: BlockDevice>(vol: &BtrfsVolume<D>, inode: &BtrfsInode, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
 vol.read_at(inode, pos, buf)
 }

 pub fn write<D: BlockDevice>(_vol: &BtrfsVolume<D>, _id: u64, _pos: u64, _buf: &[u8]) -> CanFail {
 Err(Error::ReadOnlyDevice)
 }

 /// `read_dir(cookie)`; `.`/`..` synthesis already happens
 /// inside [`BtrfsVolume::readdir`].
 pub fn read_dir<D: BlockDevice>(
 vol: &BtrfsVolume<D>,
 parent: u64,
 cookie: &mut DirCookie,
 max: usize) -> FsResult<Vec<(Vec<u8>, u64, u8)>> {
 let entries = vol.readdir(parent)?;
 let triples: Vec<(Vec<u8>, u64, u8)> = entries.into_iter().map(|(name, key, ft)| (name, key.object_id, ft)).collect();
 Ok(paginate(&triples, cookie, max))
 }

 pub fn create<D: BlockDevice>(_vol: &BtrfsVolume<D>, _parent: u64, _name: &[u8], _mode: u32, _is_dir: bool) -> FsResult<u64> {
 Err(Error::ReadOnlyDevice)
 }

 pub fn rename<D: BlockDevice>(
 _vol: &BtrfsVolume<D>,
 _old_parent: u64,
 _old_name: &[u8],
 _new_parent: u64,
 _new_name: &[u8]) -> CanFail {
 Err(Error::ReadOnlyDevice)
 }

 pub fn read_attr<D: BlockDevice>(vol: &BtrfsVolume<D>, owner: u64, name: &[u8]) -> FsResult<Vec<u8>> {
 vol.get_xattr(owner, name)
 }

 pub fn list_attrs<D: BlockDevice>(vol: &BtrfsVolume<D>, owner: u64) -> FsResult<Vec<String>> {
 Ok(vol
.list_xattrs(owner)?
.into_iter()
.map(|x| alloc::string::String::from_utf8_lossy(&x.name).into_owned())
.collect())
 }
}

/// The read-only ISO9660 shim.
pub mod iso9660 {
 use alloc::string::String;
 use alloc::vec::Vec;

 use super::{paginate, DirCookie, Stat};
 use crate::device::BlockDevice;
 use crate::error::{CanFail, Error, FsResult};
 use crate::iso9660::inode::Iso9660Inode;
 use crate::iso9660::volume::Iso9660Volume;
 use crate::time::UnixTimestamp;

 #[must_use]
 pub fn stat_of(inode: &Iso9660Inode) -> Stat {
 Stat {
 size: inode.size(),
 mode: inode.mode(),
 uid: inode.uid(),
 gid: inode.gid(),
 links: inode.links(),
 atime: UnixTimestamp::default(),
 mtime: UnixTimestamp::default(),
 ctime: UnixTimestamp::default(),
 crtime: UnixTimestamp::default(),
 is_dir: inode.is_directory,
 is_symlink: inode.is_symlink(),
 }
 }

 pub fn lookup<D: BlockDevice>(vol: &Iso9660Volume<D>, parent: u64, name: &str) -> FsResult<u64> {
 vol.lookup(parent, name)
 }

 pub fn get_vnode<D: BlockDevice>(vol: &Iso9660Volume<D>, id: u64) -> FsResult<Iso9660Inode> {
 vol.stat(id)
 }

 #[must_use]
 pub fn read_stat(inode: &Iso9660Inode) -> Stat {
 stat_of(inode)
 }

 pub fn write_stat<D: BlockDevice>(_vol: &Iso9660Volume<D>, _id: u64, _mask: u32) -> CanFail {
 Err(Error::ReadOnlyDevice)
 }

 pub fn read<D: BlockDevice>(vol: &Iso9660Volume<D>, id: u64, pos: u64, buf: &mut [u8]) -> FsResult<usize> {
 vol.read_at(id, pos, buf)
 }

 /// `read_dir(cookie)`; ISO9660's on-disk `.`/`..` records
 /// carry no decodable name, so [`Iso9660Volume::readdir`] drops them
 /// and the shim synthesizes the pair every other driver provides
 /// on-disk, matching the contract's "synthesises `.` and `..` first".
 pub fn read_dir<D: BlockDevice>(
 vol: &Iso9660Volume<D>,
 parent: u64,
 parent_of: u64,
 cookie: &mut DirCookie,
 max: usize) -> FsResult<Vec<(String, u64, bool)>> {
 let mut all = Vec::with_capacity(2);
 all.push((String::from("."), parent, true));
 all.push((String::from(".."), parent_of, true));
 all.extend(vol.readdir(parent)?);
 Ok(paginate(&all, cookie, max))
 }

 pub fn read_link<D: BlockDevice>(vol: &Iso9660Volume<D>, id: u64) -> FsResult<String> {
 vol.read_link(id)
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn stat_mask_bits_are_independent() {
 let mask = StatMask(StatMask::SIZE | StatMask::MTIME);
 assert!(mask.has(StatMask::SIZE));
 assert!(mask.has(StatMask::MTIME));
 assert!(!mask.has(StatMask::MODE));
 }

 #[test]
 fn paginate_advances_cookie_and_stops_at_end() {
 let entries: Vec<u32> = (0..5).collect();
 let mut cookie = DirCookie::default();
 let first = paginate(&entries, &mut cookie, 2);
 assert_eq!(first, alloc::vec![0, 1]);
 assert_eq!(cookie.pos, 2);
 let rest = paginate(&entries, &mut cookie, 10);
 assert_eq!(rest, alloc::vec![2, 3, 4]);
 assert_eq!(cookie.pos, 5);
 let exhausted = paginate(&entries, &mut cookie, 10);
 assert!(exhausted.is_empty());
 }
}
