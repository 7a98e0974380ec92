//! Directory record parsing, Rock Ridge (`PX`/`NM`/`SL`) system-use entries
//! and Joliet UCS-2BE name decoding.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{Error, FsResult};
use crate::iso9660::layout::{
 read_be32, read_le16, read_le32, DIR_RECORD_HEADER_LEN, DR_DATA_LENGTH_LE_OFFSET, DR_EXTENT_LBA_BE_OFFSET,
 DR_EXTENT_LBA_LE_OFFSET, DR_FLAGS_OFFSET, DR_FLAG_DIRECTORY, DR_NAME_LEN_OFFSET, DR_NAME_OFFSET, NAME_PARENT,
 NAME_SELF, SL_COMPONENT_CURRENT, SL_COMPONENT_PARENT, SL_COMPONENT_ROOT, SUSP_CONTINUE, SUSP_NM, SUSP_PX, SUSP_SL,
};

/// One parsed directory record — a file, a subdirectory, or the `.`/`..`
/// pseudo-entries that open every non-root directory's extent.
#[derive(Clone, Debug)]
pub struct DirRecord {
 pub extent_lba: u32,
 pub data_length: u32,
 pub is_directory: bool,
 pub name: String,
 pub rock_ridge: RockRidge,
}

/// Rock Ridge metadata recovered from a record's system-use area, if any
/// `PX`/`NM`/`SL` entries were present.
#[derive(Clone, Debug, Default)]
pub struct RockRidge {
 pub mode: Option<u32>,
 pub uid: Option<u32>,
 pub gid: Option<u32>,
 pub links: Option<u32>,
 pub name: Option<String>,
 pub symlink_target: Option<String>,
}

impl RockRidge {
 /// Per Open Questions: `S_ISLNK` comes from `PX`'s mode field
 /// first, falling back to the mere presence of an `SL` entry when `PX`
 /// is absent or doesn't encode a link bit.
 #[must_use]
 pub fn is_symlink(&self) -> bool {
 const S_IFLNK: u32 = 0o120_000;
 const S_IFMT: u32 = 0o170_000;
 match self.mode {
 Some(mode) => mode & S_IFMT == S_IFLNK,
 None => self.symlink_target.is_some(),
 }
 }
}

/// Parses every directory record packed into one directory extent buffer
/// (one or more logical blocks; a record never spans a block boundary, and
/// a short trailing run of zero bytes at the end of a block is padding to
/// skip to the next block).
#[must_use]
pub fn parse_records(data: &[u8], block_size: usize, joliet: bool) -> Vec<DirRecord> {
 let mut out = Vec::new();
 let mut block_start = 0usize;
 while block_start < data.len() {
 let block_end = (block_start + block_size).min(data.len());
 let mut offset = block_start;
 while offset < block_end {
 let length = data[offset] as usize;
 if length == 0 {
 break;
 }
 if offset + length > block_end {
 break;
 }
 if let Some(record) = parse_one(&data[offset..offset + length], joliet) {
 out.push(record);
 }
 offset += length;
 }
 block_start = block_end;
 }
 out
}

fn parse_one(record: &[u8], joliet: bool) -> Option<DirRecord> {
 if record.len() < DIR_RECORD_HEADER_LEN {
 return None;
 }
 let extent_lba = read_le32(&record[DR_EXTENT_LBA_LE_OFFSET..]);
 let data_length = read_le32(&record[DR_DATA_LENGTH_LE_OFFSET..]);
 let flags = record[DR_FLAGS_OFFSET];
 let name_len = record[DR_NAME_LEN_OFFSET] as usize;
 let name_end = DR_NAME_OFFSET.checked_add(name_len)?;
 if name_end > record.len() {
 return None;
 }
 let raw_name = &record[DR_NAME_OFFSET..name_end];
 let name = if joliet {
 decode_joliet_name(raw_name)
 } else {
 decode_d_name(raw_name)
 };

 // A record's name occupies an even number of bytes; if `name_len` is
 // odd, one padding byte follows before the system-use area starts.
 let su_start = if name_len % 2 == 0 { name_end } else { name_end + 1 };
 let rock_ridge = if su_start < record.len() {
 parse_system_use(&record[su_start..])
 } else {
 RockRidge::default()
 };

 Some(DirRecord {
 extent_lba,
 data_length,
 is_directory: flags & DR_FLAG_DIRECTORY != 0,
 name: rock_ridge.name.clone().unwrap_or(name),
 rock_ridge,
 })
}

fn decode_d_name(raw: &[u8]) -> String {
 match raw {
 [NAME_SELF] => String::from("."),
 [NAME_PARENT] => String::from(".."),
 _ => {
 // Plain (non-Joliet) d-characters are ASCII; a trailing
 // `;<version>` is stripped, matching the reference's own
 // basename-without-version convention.
 let text = String::from_utf8_lossy(raw);
 match text.find(';') {
 Some(idx) => String::from(&text[..idx]),
 None => text.into_owned(),
 }
 }
 }
}

/// Walks the system-use area's `{signature[2], length, version, payload}`
/// entries for the three Rock Ridge extensions this driver understands.
fn parse_system_use(area: &[u8]) -> RockRidge {
 let mut rr = RockRidge::default();
 let mut name_parts = Vec::new();
 let mut name_done = true;
 let mut symlink_parts: Vec<String> = Vec::new();
 let mut symlink_done = true;

 let mut offset = 0usize;
 while offset + 4 <= area.len() {
 let signature = [area[offset], area[offset + 1]];
 let length = area[offset + 2] as usize;
 if length < 4 || offset + length > area.len() {
 break;
 }
 let payload = &area[offset + 4..offset + length];

 if signature == SUSP_PX && payload.len() >= 32 {
 rr.mode = Some(read_le32(payload));
 rr.links = Some(read_le32(&payload[8..]));
 rr.uid = Some(read_le32(&payload[16..]));
 rr.gid = Some(read_le32(&payload[24..]));
 } else if signature == SUSP_NM && !payload.is_empty() {
 let flags = payload[0];
 if let Ok(text) = core::str::from_utf8(&payload[1..]) {
 name_parts.push(String::from(text));
 }
 name_done = flags & SUSP_CONTINUE == 0;
 } else if signature == SUSP_SL && !payload.is_empty() {
 let flags = payload[0];
 let mut cursor = 1usize;
 while cursor + 2 <= payload.len() {
 let comp_flags = payload[cursor];
 let comp_len = payload[cursor + 1] as usize;
 let comp_end = cursor + 2 + comp_len;
 if comp_end > payload.len() {
 break;
 }
 if comp_flags & SL_COMPONENT_ROOT != 0 {
 symlink_parts.push(String::from("/"));
 } else if comp_flags & SL_COMPONENT_CURRENT != 0 {
 symlink_parts.push(String::from("."));
 } else if comp_flags & SL_COMPONENT_PARENT != 0 {
 symlink_parts.push(String::from(".."));
 } else if let Ok(text) = core::str::from_utf8(&payload[cursor + 2..comp_end]) {
 symlink_parts.push(String::from(text));
 }
 cursor = comp_end;
 }
 symlink_done = flags & SUSP_CONTINUE == 0;
 }

 offset += length;
 }

 if !name_parts.is_empty() && name_done {
 rr.name = Some(name_parts.concat());
 }
 if !symlink_parts.is_empty() && symlink_done {
 rr.symlink_target = Some(symlink_parts.join("/"));
 }
 rr
}

/// Converts a Joliet SVD name (UCS-2BE) to UTF-8's
/// four-case rule: a BMP scalar outside the surrogate range encodes
/// directly; a valid high/low surrogate pair combines into one scalar;
/// an unpaired surrogate becomes `U+FFFD` rather than being dropped, so
/// decoded length stays auditable against the raw byte count.
#[must_use]
pub fn decode_joliet_name(raw: &[u8]) -> String {
 if raw == [0] {
 return String::from(".");
 }
 if raw == [1] {
 return String::from("..");
 }
 let mut out = String::new();
 let mut units = raw.chunks_exact(2).map(read_le16_be);
 let mut pending_high: Option<u16> = None;

 for unit in &mut units {
 if let Some(high) = pending_high.take() {
 if (0xDC00..=0xDFFF).contains(&unit) {
 let scalar = 0x10000 + (u32::from(high) - 0xD800) * 0x400 + (u32::from(unit) - 0xDC00);
 if let Some(ch) = char::from_u32(scalar) {
 out.push(ch);
 } else {
 out.push('\u{FFFD}');
 }
 continue;
 }
 out.push('\u{FFFD}');
 // `unit` itself still needs handling below, so fall through.
 }
 if (0xD800..=0xDBFF).contains(&unit) {
 pending_high = Some(unit);
 } else if (0xDC00..=0xDFFF).contains(&unit) {
 out.push('\u{FFFD}');
 } else {
 out.push(char::from_u32(u32::from(unit)).unwrap_or('\u{FFFD}'));
 }
 }
 if pending_high.is_some() {
 out.push('\u{FFFD}');
 }

 match out.rfind(';') {
 Some(idx) => String::from(&out[..idx]),
 None => out,
 }
}

fn read_le16_be(chunk: &[u8]) -> u16 {
 u16::from_be_bytes([chunk[0], chunk[1]])
}

/// Reads a both-endian 32-bit field, validating the LE and BE copies
/// agree (ISO9660 stores redundant endianness pairs for every multi-byte
/// numeric field so either-endian hosts can read them).
pub fn both_endian_u32(le_bytes: &[u8], be_bytes: &[u8]) -> FsResult<u32> {
 let le = read_le32(le_bytes);
 let be = read_be32(be_bytes);
 if le != be {
 return Err(Error::BadData);
 }
 Ok(le)
}

/// Builds one plain (non-Joliet) directory record for tests: header plus
/// name, padded to an even length, with no system-use area.
#[cfg(test)]
fn build_record(extent_lba: u32, data_length: u32, is_dir: bool, name: &str) -> Vec<u8> {
 let name_len = name.len();
 let padded_name_len = name_len + (name_len % 2);
 let mut record = alloc::vec![0u8; DIR_RECORD_HEADER_LEN + padded_name_len];
 record[DR_EXTENT_LBA_LE_OFFSET..DR_EXTENT_LBA_LE_OFFSET + 4].copy_from_slice(&extent_lba.to_le_bytes());
 record[DR_EXTENT_LBA_BE_OFFSET..DR_EXTENT_LBA_BE_OFFSET + 4].copy_from_slice(&extent_lba.to_be_bytes());
 record[DR_DATA_LENGTH_LE_OFFSET..DR_DATA_LENGTH_LE_OFFSET + 4].copy_from_slice(&data_length.to_le_bytes());
 record[DR_FLAGS_OFFSET] = if is_dir { DR_FLAG_DIRECTORY } else { 0 };
 record[DR_NAME_LEN_OFFSET] = name_len as u8;
 record[DR_NAME_OFFSET..DR_NAME_OFFSET + name_len].copy_from_slice(name.as_bytes());
 record[0] = record.len() as u8;
 record
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn decode_joliet_name_handles_surrogate_pair() {
 // U+1F600 (outside the BMP) encoded as a UTF-16BE surrogate pair.
 let raw = [0xD8, 0x3D, 0xDE, 0x00];
 assert_eq!(decode_joliet_name(&raw), "\u{1F600}");
 }

 #[test]
 fn decode_joliet_name_replaces_lone_surrogate() {
 let raw = [0xDC, 0x00, 0x00, b'A']; // lone low surrogate, then U+0041
 let decoded = decode_joliet_name(&raw);
 assert_eq!(decoded, "\u{FFFD}A");
 }

 #[test]
 fn decode_joliet_name_strips_version_suffix() {
 let raw = [0x00, b'A', 0x00, b'.', 0x00, b't', 0x00, b'x', 0x00, b't', 0x00, b';', 0x00, b'1'];
 assert_eq!(decode_joliet_name(&raw), "A.txt");
 }

 #[test]
 fn parse_one_reads_basic_fields() {
 let record = build_record(42, 2048, false, "FILE.TXT;1");
 let parsed = parse_one(&record, false).unwrap();
 assert_eq!(parsed.extent_lba, 42);
 assert_eq!(parsed.data_length, 2048);
 assert_eq!(parsed.name, "FILE.TXT");
 assert!(!parsed.is_directory);
 }

 #[test]
 fn parse_self_and_parent_records() {
 let self_record = build_record(10, 2048, true, "\0");
 let parsed = parse_one(&self_record, false).unwrap();
 assert_eq!(parsed.name, ".");
 }

 #[test]
 fn rock_ridge_px_overrides_mode() {
 let mut record = build_record(5, 2048, false, "A");
 let mut su = alloc::vec![b'P', b'X', 36, 1];
 su.extend_from_slice(&0o100_644u32.to_le_bytes());
 su.extend_from_slice(&0o100_644u32.to_be_bytes());
 su.extend_from_slice(&1u32.to_le_bytes());
 su.extend_from_slice(&1u32.to_be_bytes());
 su.extend_from_slice(&0u32.to_le_bytes());
 su.extend_from_slice(&0u32.to_be_bytes());
 su.extend_from_slice(&0u32.to_le_bytes());
 su.extend_from_slice(&0u32.to_be_bytes());
 record[0] = (record.len() + su.len()) as u8;
 record.extend_from_slice(&su);

 let parsed = parse_one(&record, false).unwrap();
 assert_eq!(parsed.rock_ridge.mode, Some(0o100_644));
 assert!(!parsed.rock_ridge.is_symlink());
 }
}

#[must_use]
pub fn volume_seq_number(le_bytes: &[u8]) -> u16 {
 read_le16(le_bytes)
}
