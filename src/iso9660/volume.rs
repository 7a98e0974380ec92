//! `Iso9660Volume`: mount probing, directory lookup/iteration and file
//! reads over a CD9660 image. Read-only: no allocator, no
//! journal, and [`Volume::find_block`] is the identity since ISO9660 has
//! no indirection between logical and physical extents.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::RwLock;

use crate::block_cache::BlockCache;
use crate::config::Iso9660MountArgs;
use crate::device::BlockDevice;
use crate::error::{Error, FsResult};
use crate::iso9660::dir::{parse_records, DirRecord};
use crate::iso9660::inode::Iso9660Inode;
use crate::iso9660::layout::{
 read_le32, JOLIET_ESCAPE_SEQUENCES, ROOT_VNODE_ID, SECTOR_SIZE, STANDARD_IDENTIFIER, SYSTEM_AREA_SECTORS,
 VD_ESCAPE_SEQUENCE_LEN, VD_ESCAPE_SEQUENCE_OFFSET, VD_IDENTIFIER_OFFSET, VD_LOGICAL_BLOCK_SIZE_LE_OFFSET,
 VD_ROOT_DIRECTORY_RECORD_LEN, VD_ROOT_DIRECTORY_RECORD_OFFSET, VD_TYPE_OFFSET, VD_TYPE_PRIMARY,
 VD_TYPE_SUPPLEMENTARY, VD_TYPE_TERMINATOR, VD_VOLUME_ID_LEN, VD_VOLUME_ID_OFFSET, VD_VOLUME_SPACE_SIZE_LE_OFFSET,
};
use crate::volume::partition::PartitionHandle;
use crate::volume::{FsInfo, MountFlags, Volume, VolumeKind};

fn read_bytes<D: BlockDevice>(cache: &BlockCache<D>, byte_offset: u64, len: usize) -> FsResult<Vec<u8>> {
 let block_size = u64::from(cache.block_size());
 let first_block = byte_offset / block_size;
 let block_count = (byte_offset + len as u64).div_ceil(block_size) - first_block;
 let mut buf = Vec::with_capacity((block_count * block_size) as usize);
 for i in 0..block_count {
 buf.extend_from_slice(&cache.get(first_block + i)?);
 }
 let start = (byte_offset - first_block * block_size) as usize;
 Ok(buf[start..start + len].to_vec())
}

struct VolumeDescriptorInfo {
 volume_name: String,
 logical_block_size: u32,
 total_size: u64,
 root_record: DirRecord,
 joliet: bool,
}

/// Walks the Volume Descriptor Set starting at sector 16, preferring a
/// Joliet SVD over the PVD unless `no_joliet` was requested, per spec
/// §4.9.
fn scan_descriptors<D: BlockDevice>(
 cache: &BlockCache<D>,
 partition: PartitionHandle,
 no_joliet: bool) -> FsResult<VolumeDescriptorInfo> {
 let mut primary: Option<VolumeDescriptorInfo> = None;
 let mut joliet: Option<VolumeDescriptorInfo> = None;

 for i in 0.. {
 let offset = partition.byte_offset() + (SYSTEM_AREA_SECTORS + i) * u64::from(SECTOR_SIZE);
 let descriptor = read_bytes(cache, offset, SECTOR_SIZE as usize)?;
 if &descriptor[VD_IDENTIFIER_OFFSET..VD_IDENTIFIER_OFFSET + 5] != STANDARD_IDENTIFIER.as_slice() {
 return Err(Error::BadData);
 }
 let vd_type = descriptor[VD_TYPE_OFFSET];
 if vd_type == VD_TYPE_TERMINATOR {
 break;
 }
 if vd_type == VD_TYPE_PRIMARY && primary.is_none() {
 primary = Some(parse_descriptor(&descriptor, false)?);
 } else if vd_type == VD_TYPE_SUPPLEMENTARY {
 let escape = &descriptor[VD_ESCAPE_SEQUENCE_OFFSET..VD_ESCAPE_SEQUENCE_OFFSET + VD_ESCAPE_SEQUENCE_LEN];
 if JOLIET_ESCAPE_SEQUENCES.iter().any(|seq| escape.starts_with(seq)) {
 joliet = Some(parse_descriptor(&descriptor, true)?);
 }
 }
 if i > 32 {
 // A well-formed disc terminates the descriptor set long before
 // this; treat a runaway scan as corrupt media rather than loop
 // until the partition runs out.
 return Err(Error::BadData);
 }
 }

 if !no_joliet {
 if let Some(j) = joliet {
 return Ok(j);
 }
 }
 primary.ok_or(Error::BadData)
}

fn parse_descriptor(descriptor: &[u8], joliet: bool) -> FsResult<VolumeDescriptorInfo> {
 let name_end = descriptor[VD_VOLUME_ID_OFFSET..VD_VOLUME_ID_OFFSET + VD_VOLUME_ID_LEN]
.iter()
.rposition(|&b| b != b' ')
.map_or(0, |p| p + 1);
 let volume_name = if joliet {
 crate::iso9660::dir::decode_joliet_name(&descriptor[VD_VOLUME_ID_OFFSET..VD_VOLUME_ID_OFFSET + name_end])
 } else {
 String::from_utf8_lossy(&descriptor[VD_VOLUME_ID_OFFSET..VD_VOLUME_ID_OFFSET + name_end]).into_owned()
 };
 let logical_block_size = u32::from(crate::iso9660::layout::read_le16(
 &descriptor[VD_LOGICAL_BLOCK_SIZE_LE_OFFSET..]));
 let volume_space_size = read_le32(&descriptor[VD_VOLUME_SPACE_SIZE_LE_OFFSET..]);
 let root_bytes =
 &descriptor[VD_ROOT_DIRECTORY_RECORD_OFFSET..VD_ROOT_DIRECTORY_RECORD_OFFSET + VD_ROOT_DIRECTORY_RECORD_LEN];
 let root_record = parse_records(root_bytes, VD_ROOT_DIRECTORY_RECORD_LEN, joliet)
.into_iter()
.next()
.ok_or(Error::BadData)?;

 Ok(VolumeDescriptorInfo {
 volume_name,
 logical_block_size,
 total_size: u64::from(volume_space_size) * u64::from(logical_block_size),
 root_record,
 joliet,
 })
}

/// Probes `device` for the `"CD001"` standard identifier at the fixed
/// System Area offset.
pub fn identify<D: BlockDevice>(device: &D, partition: PartitionHandle) -> FsResult<FsInfo> {
 let offset = partition.byte_offset() + SYSTEM_AREA_SECTORS * u64::from(SECTOR_SIZE);
 let block_size = device.block_size();
 let first_block = offset / u64::from(block_size);
 let block_count = (offset + u64::from(SECTOR_SIZE)).div_ceil(u64::from(block_size)) - first_block;
 let mut buf = alloc::vec![0u8; (block_count * u64::from(block_size)) as usize];
 device.read(first_block, &mut buf).map_err(|_| Error::IoError)?;
 let start = (offset - first_block * u64::from(block_size)) as usize;
 let descriptor = &buf[start..start + SECTOR_SIZE as usize];

 if &descriptor[VD_IDENTIFIER_OFFSET..VD_IDENTIFIER_OFFSET + 5] != STANDARD_IDENTIFIER.as_slice()
 || descriptor[VD_TYPE_OFFSET] != VD_TYPE_PRIMARY
 {
 return Err(Error::BadData);
 }
 let info = parse_descriptor(descriptor, false)?;
 Ok(FsInfo {
 kind: VolumeKind::Iso9660,
 block_size: info.logical_block_size,
 total_size: info.total_size,
 volume_name: info.volume_name,
 read_only: true,
 })
}

pub struct Iso9660Volume<D: BlockDevice> {
 cache: Arc<BlockCache<D>>,
 volume_name: String,
 logical_block_size: u32,
 total_size: u64,
 root_record: DirRecord,
 joliet: bool,
 vnode_cache: RwLock<HashMap<u64, Iso9660Inode>>,
}

impl<D: BlockDevice> Iso9660Volume<D> {
 /// Mounts `device`, selecting Joliet over the PVD unless `args`
 /// disables it.
 pub fn mount(device: Arc<D>, partition: PartitionHandle, args: &Iso9660MountArgs, _flags: MountFlags) -> FsResult<Arc<Self>> {
 let cache = Arc::new(BlockCache::new(device));
 let info = scan_descriptors(&cache, partition, args.no_joliet)?;
 let mut vnode_cache = HashMap::new();
 vnode_cache.insert(ROOT_VNODE_ID, Iso9660Inode::from_record(&info.root_record));
 Ok(Arc::new(Self {
 cache,
 volume_name: info.volume_name,
 logical_block_size: info.logical_block_size,
 total_size: info.total_size,
 root_record: info.root_record,
 joliet: info.joliet,
 vnode_cache: RwLock::new(vnode_cache),
 }))
 }

 #[must_use]
 pub fn label(&self) -> &str {
 &self.volume_name
 }

 fn extent_for(&self, vnode_id: u64) -> FsResult<(u32, u32)> {
 if vnode_id == ROOT_VNODE_ID {
 return Ok((self.root_record.extent_lba, self.root_record.data_length));
 }
 let cache = self.vnode_cache.read();
 let inode = cache.get(&vnode_id).ok_or(Error::EntryNotFound)?;
 Ok((inode.extent_lba, inode.data_length))
 }

 fn read_directory(&self, vnode_id: u64) -> FsResult<Vec<DirRecord>> {
 let (extent_lba, data_length) = self.extent_for(vnode_id)?;
 let bytes = read_bytes(&self.cache, u64::from(extent_lba) * u64::from(self.logical_block_size), data_length as usize)?;
 Ok(parse_records(&bytes, self.logical_block_size as usize, self.joliet))
 }

 fn vnode_id_for(&self, record: &DirRecord) -> u64 {
 u64::from(record.extent_lba)
 }

 fn cache_record(&self, record: &DirRecord) -> u64 {
 let vnode_id = self.vnode_id_for(record);
 self.vnode_cache.write().insert(vnode_id, Iso9660Inode::from_record(record));
 vnode_id
 }

 /// Resolves `name` inside directory `parent`.
 pub fn lookup(&self, parent: u64, name: &str) -> FsResult<u64> {
 let records = self.read_directory(parent)?;
 let matched = records
.iter()
.find(|r| r.name == name)
.ok_or(Error::EntryNotFound)?;
 Ok(self.cache_record(matched))
 }

 /// Lists `parent`'s entries, skipping the on-disk `.`/`..` records
 /// (which carry no usable name once decoded) in favor of synthesizing
 /// them the way every other driver in this crate does.
 pub fn readdir(&self, parent: u64) -> FsResult<Vec<(String, u64, bool)>> {
 let records = self.read_directory(parent)?;
 let mut out = Vec::with_capacity(records.len());
 for record in &records {
 if record.name == "." || record.name == ".." {
 continue;
 }
 let vnode_id = self.cache_record(record);
 out.push((record.name.clone(), vnode_id, record.is_directory));
 }
 Ok(out)
 }

 /// Returns the cached metadata for `vnode_id` (populated by a prior
 /// `lookup`/`readdir`, or the root on mount).
 pub fn stat(&self, vnode_id: u64) -> FsResult<Iso9660Inode> {
 if vnode_id == ROOT_VNODE_ID {
 return Ok(Iso9660Inode {
 vnode_id: ROOT_VNODE_ID,
..Iso9660Inode::from_record(&self.root_record)
 });
 }
 self.vnode_cache.read().get(&vnode_id).cloned().ok_or(Error::EntryNotFound)
 }

 /// Reads up to `buf.len()` bytes of `vnode_id`'s data extent at
 /// `offset`.
 pub fn read_at(&self, vnode_id: u64, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
 let (extent_lba, data_length) = self.extent_for(vnode_id)?;
 if offset >= u64::from(data_length) {
 return Ok(0);
 }
 let to_read = buf.len().min((u64::from(data_length) - offset) as usize);
 let bytes = read_bytes(
 &self.cache,
 u64::from(extent_lba) * u64::from(self.logical_block_size) + offset,
 to_read)?;
 buf[..to_read].copy_from_slice(&bytes);
 Ok(to_read)
 }

 /// Resolves a symlink vnode's target, from its Rock Ridge `SL` entry.
 pub fn read_link(&self, vnode_id: u64) -> FsResult<String> {
 let inode = self.stat(vnode_id)?;
 inode.rock_ridge.symlink_target.ok_or(Error::BadValue)
 }
}

impl<D: BlockDevice> Volume for Iso9660Volume<D> {
 fn kind(&self) -> VolumeKind {
 VolumeKind::Iso9660
 }

 fn block_size(&self) -> u32 {
 self.logical_block_size
 }

 fn is_read_only(&self) -> bool {
 true
 }

 fn root_inode_id(&self) -> u64 {
 ROOT_VNODE_ID
 }

 fn find_block(&self, logical: u64) -> FsResult<u64> {
 Ok(logical)
 }

 fn unmount(&self) -> FsResult<()> {
 Ok(())
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::device::MemBlockDevice;
 use crate::iso9660::layout::{DIR_RECORD_HEADER_LEN, DR_EXTENT_LBA_BE_OFFSET, DR_EXTENT_LBA_LE_OFFSET, DR_FLAG_DIRECTORY};

 fn encode_record(extent_lba: u32, data_length: u32, is_dir: bool, name: &[u8]) -> Vec<u8> {
 let padded = name.len() + (name.len() % 2);
 let mut record = alloc::vec![0u8; DIR_RECORD_HEADER_LEN + padded];
 record[DR_EXTENT_LBA_LE_OFFSET..DR_EXTENT_LBA_LE_OFFSET + 4].copy_from_slice(&extent_lba.to_le_bytes());
 record[DR_EXTENT_LBA_BE_OFFSET..DR_EXTENT_LBA_BE_OFFSET + 4].copy_from_slice(&extent_lba.to_be_bytes());
 record[crate::iso9660::layout::DR_DATA_LENGTH_LE_OFFSET..crate::iso9660::layout::DR_DATA_LENGTH_LE_OFFSET + 4]
.copy_from_slice(&data_length.to_le_bytes());
 record[crate::iso9660::layout::DR_FLAGS_OFFSET] = if is_dir { DR_FLAG_DIRECTORY } else { 0 };
 record[crate::iso9660::layout::DR_NAME_LEN_OFFSET] = name.len() as u8;
 record[crate::iso9660::layout::DR_NAME_OFFSET..crate::iso9660::layout::DR_NAME_OFFSET + name.len()]
.copy_from_slice(name);
 record[0] = record.len() as u8;
 record
 }

 /// Builds a minimal single-file image: PVD at sector 16, a root
 /// directory extent at LBA 20 holding `.`/`..` plus one regular file
 /// `A.TXT`, and that file's data at LBA 21.
 fn build_fixture() -> Arc<MemBlockDevice> {
 let block_size = SECTOR_SIZE;
 let dev = Arc::new(MemBlockDevice::new(block_size, 32));

 let root_record = encode_record(20, SECTOR_SIZE, true, &[0]);
 assert_eq!(root_record.len(), VD_ROOT_DIRECTORY_RECORD_LEN);

 let mut pvd = alloc::vec![0u8; SECTOR_SIZE as usize];
 pvd[VD_TYPE_OFFSET] = VD_TYPE_PRIMARY;
 pvd[VD_IDENTIFIER_OFFSET..VD_IDENTIFIER_OFFSET + 5].copy_from_slice(STANDARD_IDENTIFIER.as_slice());
 pvd[VD_VOLUME_ID_OFFSET..VD_VOLUME_ID_OFFSET + 4].copy_from_slice(b"TEST");
 for b in &mut pvd[VD_VOLUME_ID_OFFSET + 4..VD_VOLUME_ID_OFFSET + VD_VOLUME_ID_LEN] {
 *b = b' ';
 }
 pvd[VD_VOLUME_SPACE_SIZE_LE_OFFSET..VD_VOLUME_SPACE_SIZE_LE_OFFSET + 4].copy_from_slice(&32u32.to_le_bytes());
 pvd[VD_LOGICAL_BLOCK_SIZE_LE_OFFSET..VD_LOGICAL_BLOCK_SIZE_LE_OFFSET + 2]
.copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
 pvd[VD_ROOT_DIRECTORY_RECORD_OFFSET..VD_ROOT_DIRECTORY_RECORD_OFFSET + VD_ROOT_DIRECTORY_RECORD_LEN]
.copy_from_slice(&root_record);

 let mut terminator = alloc::vec![0u8; SECTOR_SIZE as usize];
 terminator[VD_TYPE_OFFSET] = VD_TYPE_TERMINATOR;
 terminator[VD_IDENTIFIER_OFFSET..VD_IDENTIFIER_OFFSET + 5].copy_from_slice(STANDARD_IDENTIFIER.as_slice());

 let mut root_dir_block = alloc::vec![0u8; SECTOR_SIZE as usize];
 let self_entry = encode_record(20, SECTOR_SIZE, true, &[0]);
 let parent_entry = encode_record(20, SECTOR_SIZE, true, &[1]);
 let file_entry = encode_record(21, 11, false, b"A.TXT;1");
 let mut cursor = 0usize;
 for entry in [&self_entry, &parent_entry, &file_entry] {
 root_dir_block[cursor..cursor + entry.len()].copy_from_slice(entry);
 cursor += entry.len();
 }

 dev.with_bytes(|bytes| {
 let sector = SECTOR_SIZE as usize;
 bytes[SYSTEM_AREA_SECTORS as usize * sector..SYSTEM_AREA_SECTORS as usize * sector + sector]
.copy_from_slice(&pvd);
 bytes[(SYSTEM_AREA_SECTORS as usize + 1) * sector..(SYSTEM_AREA_SECTORS as usize + 2) * sector]
.copy_from_slice(&terminator);
 bytes[20 * sector..21 * sector].copy_from_slice(&root_dir_block);
 bytes[21 * sector..21 * sector + 11].copy_from_slice(b"hello world");
 });
 dev
 }

 #[test]
 fn mount_reads_label_and_root() {
 let dev = build_fixture();
 let volume = Iso9660Volume::mount(dev, PartitionHandle::whole_device(32, SECTOR_SIZE), &Iso9660MountArgs::default(), MountFlags::default()).unwrap();
 assert_eq!(volume.label(), "TEST");
 assert_eq!(volume.root_inode_id(), ROOT_VNODE_ID);
 }

 #[test]
 fn readdir_skips_dot_entries_and_lists_file() {
 let dev = build_fixture();
 let volume = Iso9660Volume::mount(dev, PartitionHandle::whole_device(32, SECTOR_SIZE), &Iso9660MountArgs::default(), MountFlags::default()).unwrap();
 let entries = volume.readdir(ROOT_VNODE_ID).unwrap();
 assert_eq!(entries.len(), 1);
 assert_eq!(entries[0].0, "A.TXT");
 assert!(!entries[0].2);
 }

 #[test]
 fn lookup_then_read_returns_file_contents() {
 let dev = build_fixture();
 let volume = Iso9660Volume::mount(dev, PartitionHandle::whole_device(32, SECTOR_SIZE), &Iso9660MountArgs::default(), MountFlags::default()).unwrap();
 let vnode = volume.lookup(ROOT_VNODE_ID, "A.TXT").unwrap();
 let mut buf = [0u8; 11];
 let n = volume.read_at(vnode, 0, &mut buf).unwrap();
 assert_eq!(n, 11);
 assert_eq!(&buf, b"hello world");
 }

 #[test]
 fn identify_reports_iso9660_kind() {
 let dev = build_fixture();
 let info = identify(&*dev, PartitionHandle::whole_device(32, SECTOR_SIZE)).unwrap();
 assert_eq!(info.kind, VolumeKind::Iso9660);
 assert_eq!(info.volume_name, "TEST");
 }
}
