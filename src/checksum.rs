//! The checksum kit shared by every volume: CRC-16 (Ext2 block-group
//! descriptors), CRC-32C (Ext4 metadata/bitmaps/inodes/extents/journal,
//! Btrfs tree nodes and name hashing), and the two non-CRC directory hashes
//! (half-MD4, TEA) Ext4's HTree uses.
//!
//! The CRC-32C table and its byte-at-a-time update loop are carried over
//! unchanged from the reference `ext4` driver's `crc32c_calc`; CRC-16 and the
//! two HTree hashers are new but follow the same "static lookup table, no
//! runtime dependency" shape.

/// Castagnoli CRC-32C lookup table (same table the reference `ext4` driver
/// embeds, generated by the Rocksoft Model CRC Algorithm Table Generation
/// Program for polynomial `0x1EDC6F41`, reflected).
#[rustfmt::skip]
const CRC32C_TABLE: [u32; 256] = [
 0x00000000, 0xF26B8303, 0xE13B70F7, 0x1350F3F4, 0xC79A971F, 0x35F1141C, 0x26A1E7E8, 0xD4CA64EB,
 0x8AD958CF, 0x78B2DBCC, 0x6BE22838, 0x9989AB3B, 0x4D43CFD0, 0xBF284CD3, 0xAC78BF27, 0x5E133C24,
 0x105EC76F, 0xE235446C, 0xF165B798, 0x030E349B, 0xD7C45070, 0x25AFD373, 0x36FF2087, 0xC494A384,
 0x9A879FA0, 0x68EC1CA3, 0x7BBCEF57, 0x89D76C54, 0x5D1D08BF, 0xAF768BBC, 0xBC267848, 0x4E4DFB4B,
 0x20BD8EDE, 0xD2D60DDD, 0xC186FE29, 0x33ED7D2A, 0xE72719C1, 0x154C9AC2, 0x061C6936, 0xF477EA35,
 0xAA64D611, 0x580F5512, 0x4B5FA6E6, 0xB93425E5, 0x6DFE410E, 0x9F95C20D, 0x8CC531F9, 0x7EAEB2FA,
 0x30E349B1, 0xC288CAB2, 0xD1D83946, 0x23B3BA45, 0xF779DEAE, 0x05125DAD, 0x1642AE59, 0xE4292D5A,
 0xBA3A117E, 0x4851927D, 0x5B016189, 0xA96AE28A, 0x7DA08661, 0x8FCB0562, 0x9C9BF696, 0x6EF07595,
 0x417B1DBC, 0xB3109EBF, 0xA0406D4B, 0x522BEE48, 0x86E18AA3, 0x748A09A0, 0x67DAFA54, 0x95B17957,
 0xCBA24573, 0x39C9C670, 0x2A993584, 0xD8F2B687, 0x0C38D26C, 0xFE53516F, 0xED03A29B, 0x1F682198,
 0x5125DAD3, 0xA34E59D0, 0xB01EAA24, 0x42752927, 0x96BF4DCC, 0x64D4CECF, 0x77843D3B, 0x85EFBE38,
 0xDBFC821C, 0x2997011F, 0x3AC7F2EB, 0xC8AC71E8, 0x1C661503, 0xEE0D9600, 0xFD5D65F4, 0x0F36E6F7,
 0x61C69362, 0x93AD1061, 0x80FDE395, 0x72966096, 0xA65C047D, 0x5437877E, 0x4767748A, 0xB50CF789,
 0xEB1FCBAD, 0x197448AE, 0x0A24BB5A, 0xF84F3859, 0x2C855CB2, 0xDEEEDFB1, 0xCDBE2C45, 0x3FD5AF46,
 0x7198540D, 0x83F3D70E, 0x90A324FA, 0x62C8A7F9, 0xB602C312, 0x44694011, 0x5739B3E5, 0xA55230E6,
 0xFB410CC2, 0x092A8FC1, 0x1A7A7C35, 0xE811FF36, 0x3CDB9BDD, 0xCEB018DE, 0xDDE0EB2A, 0x2F8B6829,
 0x82F63B78, 0x709DB87B, 0x63CD4B8F, 0x91A6C88C, 0x456CAC67, 0xB7072F64, 0xA457DC90, 0x563C5F93,
 0x082F63B7, 0xFA44E0B4, 0xE9141340, 0x1B7F9043, 0xCFB5F4A8, 0x3DDE77AB, 0x2E8E845F, 0xDCE5075C,
 0x92A8FC17, 0x60C37F14, 0x73938CE0, 0x81F80FE3, 0x55326B08, 0xA759E80B, 0xB4091BFF, 0x466298FC,
 0x1871A4D8, 0xEA1A27DB, 0xF94AD42F, 0x0B21572C, 0xDFEB33C7, 0x2D80B0C4, 0x3ED04330, 0xCCBBC033,
 0xA24BB5A6, 0x502036A5, 0x4370C551, 0xB11B4652, 0x65D122B9, 0x97BAA1BA, 0x84EA524E, 0x7681D14D,
 0x2892ED69, 0xDAF96E6A, 0xC9A99D9E, 0x3BC21E9D, 0xEF087A76, 0x1D63F975, 0x0E330A81, 0xFC588982,
 0xB21572C9, 0x407EF1CA, 0x532E023E, 0xA145813D, 0x758FE5D6, 0x87E466D5, 0x94B49521, 0x66DF1622,
 0x38CC2A06, 0xCAA7A905, 0xD9F75AF1, 0x2B9CD9F2, 0xFF56BD19, 0x0D3D3E1A, 0x1E6DCDEE, 0xEC064EED,
 0xC38D26C4, 0x31E6A5C7, 0x22B65633, 0xD0DDD530, 0x0417B1DB, 0xF67C32D8, 0xE52CC12C, 0x1747422F,
 0x49547E0B, 0xBB3FFD08, 0xA86F0EFC, 0x5A048DFF, 0x8ECEE914, 0x7CA56A17, 0x6FF599E3, 0x9D9E1AE0,
 0xD3D3E1AB, 0x21B862A8, 0x32E8915C, 0xC083125F, 0x144976B4, 0xE622F5B7, 0xF5720643, 0x07198540,
 0x590AB964, 0xAB613A67, 0xB831C993, 0x4A5A4A90, 0x9E902E7B, 0x6CFBAD78, 0x7FAB5E8C, 0x8DC0DD8F,
 0xE330A81A, 0x115B2B19, 0x020BD8ED, 0xF0605BEE, 0x24AA3F05, 0xD6C1BC06, 0xC5914FF2, 0x37FACCF1,
 0x69E9F0D5, 0x9B8273D6, 0x88D28022, 0x7AB90321, 0xAE7367CA, 0x5C18E4C9, 0x4F48173D, 0xBD23943E,
 0xF36E6F75, 0x0105EC76, 0x12551F82, 0xE03E9C81, 0x34F4F86A, 0xC69F7B69, 0xD5CF889D, 0x27A40B9E,
 0x79B737BA, 0x8BDCB4B9, 0x988C474D, 0x6AE7C44E, 0xBE2DA0A5, 0x4C4623A6, 0x5F16D052, 0xAD7D5351,
];

/// Computes a CRC-32C (Castagnoli) checksum over `buf`, seeded with
/// `0xFFFFFFFF` and returned uninverted, exactly as the reference `ext4`
/// driver's own `crc32c_calc` does (superblock, bitmap, inode, extent, and
/// journal checksums all build on this routine directly; Btrfs tree-node and
/// xattr checksums use it too, with `seed` varied per use).
#[must_use]
pub fn crc32c(buf: &[u8]) -> u32 {
 crc32c_seeded(0xFFFF_FFFF, buf)
}

/// As [`crc32c`], but with an explicit running seed, so checksums that chain
/// several buffers (uuid + inode id + generation + block, for extent block
/// checksums) can be folded without concatenating them first.
#[must_use]
pub fn crc32c_seeded(seed: u32, buf: &[u8]) -> u32 {
 let mut crc = seed;
 for &b in buf {
 crc = CRC32C_TABLE[((crc ^ u32::from(b)) & 0xff) as usize] ^ (crc >> 8);
 }
 crc
}

/// Btrfs' directory-entry name hash: CRC-32C seeded with `!1` (`0xFFFF_FFFE`),
/// per the on-disk format's `DIR_ITEM`/`DIR_INDEX` key construction.
#[must_use]
pub fn btrfs_name_hash(name: &[u8]) -> u32 {
 crc32c_seeded(!1u32, name)
}

/// CRC-16/ANSI, used for the Ext2 block-group descriptor checksum when the
/// `meta_bg`/group-descriptor checksum feature requests the non-CRC32C
/// variant.
#[must_use]
pub fn crc16(buf: &[u8]) -> u16 {
 let mut crc: u16 = 0xFFFF;
 for &b in buf {
 crc ^= u16::from(b);
 for _ in 0..8 {
 if crc & 1 != 0 {
 crc = (crc >> 1) ^ 0xA001;
 } else {
 crc >>= 1;
 }
 }
 }
 crc
}

/// The three Ext4 HTree hash variants, selected per-volume by the
/// superblock's `hash_version` field and per-directory by the HTree root
/// info struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashVersion {
 /// A linear-congruential hash over the raw bytes of the name.
 Legacy,
 /// The "half-MD4" variant: runs MD4's round functions over the name,
 /// keeping only the second output word.
 HalfMd4,
 /// 16 rounds of classic TEA over 16-byte chunks of the name.
 Tea,
}

impl HashVersion {
 /// Decodes the on-disk `hash_version` byte of an Ext4 superblock/HTree
 /// root (`LEGACY=0, HALF_MD4=1, TEA=2`).
 #[must_use]
 pub fn from_disk(value: u8) -> Option<Self> {
 match value {
 0 => Some(Self::Legacy),
 1 => Some(Self::HalfMd4),
 2 => Some(Self::Tea),
 _ => None,
 }
 }

 #[must_use]
 pub fn to_disk(self) -> u8 {
 match self {
 Self::Legacy => 0,
 Self::HalfMd4 => 1,
 Self::Tea => 2,
 }
 }

 /// Hashes `name`, clearing the bottom bit the on-disk format reserves to
 /// flag "a collision carries into the next directory block".
 #[must_use]
 pub fn hash(self, name: &[u8]) -> u32 {
 let raw = match self {
 Self::Legacy => legacy_hash(name),
 Self::HalfMd4 => half_md4_hash(name),
 Self::Tea => tea_hash(name),
 };
 raw & !1
 }
}

fn legacy_hash(name: &[u8]) -> u32 {
 let mut hash: u32 = 0x1234_5678;
 let mut hash1: u32 = 0;

 for &b in name {
 hash = hash1.wrapping_add(hash.wrapping_shl(4).wrapping_add(hash.wrapping_shr(28)).wrapping_add(u32::from(b)));
 hash1 = hash ^ (hash1.wrapping_shl(1));
 }

 hash
}

/// Pads `name` the way Ext4's half-MD4/TEA hashers do: the final 16-byte (or
/// 8-byte for TEA) chunk is filled with the name length repeated, rather
/// than zero, so that names differing only in trailing content still mix the
/// length into every chunk.
fn pad_chunks(name: &[u8], chunk_len: usize) -> alloc::vec::Vec<u32> {
 let len = name.len();
 let mut padded = alloc::vec::Vec::with_capacity(((len / chunk_len) + 1) * chunk_len);
 padded.extend_from_slice(name);
 if padded.len() % chunk_len != 0 || padded.is_empty() {
 let pad_byte = (len & 0xff) as u8;
 while padded.len() % chunk_len != 0 {
 padded.push(pad_byte);
 }
 }

 let mut words = alloc::vec::Vec::with_capacity(padded.len() / 4);
 for chunk in padded.chunks_exact(4) {
 words.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
 }
 words
}

fn md4_round1(a: u32, b: u32, c: u32, d: u32, k: u32, s: u32) -> u32 {
 let f = (b & c) | (!b & d);
 a.wrapping_add(f).wrapping_add(k).rotate_left(s)
}

fn md4_round2(a: u32, b: u32, c: u32, d: u32, k: u32, s: u32) -> u32 {
 let f = (b & c) | (b & d) | (c & d);
 a.wrapping_add(f)
.wrapping_add(k)
.wrapping_add(0x5A82_7999)
.rotate_left(s)
}

fn half_md4_hash(name: &[u8]) -> u32 {
 let mut buf = [0x6745_2301u32, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476];
 for chunk in pad_chunks(name, 32).chunks(8) {
 let mut block = [0u32; 8];
 block[..chunk.len()].copy_from_slice(chunk);
 half_md4_transform(&mut buf, &block);
 }
 buf[1]
}

fn half_md4_transform(buf: &mut [u32; 4], block: &[u32; 8]) {
 let [mut a, mut b, mut c, mut d] = *buf;

 for &i in &[0usize, 1, 2, 3, 4, 5, 6, 7] {
 let s = match i % 4 {
 0 => 3,
 1 => 7,
 2 => 11,
 _ => 19,
 };
 a = md4_round1(a, b, c, d, block[i], s);
 core::mem::swap(&mut a, &mut d);
 core::mem::swap(&mut d, &mut c);
 core::mem::swap(&mut c, &mut b);
 }

 for &i in &[0usize, 4, 1, 5, 2, 6, 3, 7] {
 let s = match i % 4 {
 0 => 3,
 1 => 5,
 2 => 9,
 _ => 13,
 };
 a = md4_round2(a, b, c, d, block[i], s);
 core::mem::swap(&mut a, &mut d);
 core::mem::swap(&mut d, &mut c);
 core::mem::swap(&mut c, &mut b);
 }

 buf[0] = buf[0].wrapping_add(a);
 buf[1] = buf[1].wrapping_add(b);
 buf[2] = buf[2].wrapping_add(c);
 buf[3] = buf[3].wrapping_add(d);
}

const TEA_DELTA: u32 = 0x9E37_79B9;

fn tea_hash(name: &[u8]) -> u32 {
 let mut buf = [0x6745_2301u32, 0xefcd_ab89];
 for chunk in pad_chunks(name, 16).chunks(4) {
 let mut block = [0u32; 4];
 block[..chunk.len()].copy_from_slice(chunk);
 tea_transform(&mut buf, &block);
 }
 buf[0]
}

fn tea_transform(buf: &mut [u32; 2], block: &[u32; 4]) {
 let (mut a, mut b) = (buf[0], buf[1]);
 let mut sum: u32 = 0;

 for _ in 0..16 {
 sum = sum.wrapping_add(TEA_DELTA);
 a = a.wrapping_add(
 (b.wrapping_shl(4).wrapping_add(block[0]))
 ^ (b.wrapping_add(sum))
 ^ (b.wrapping_shr(5).wrapping_add(block[1])));
 b = b.wrapping_add(
 (a.wrapping_shl(4).wrapping_add(block[2]))
 ^ (a.wrapping_add(sum))
 ^ (a.wrapping_shr(5).wrapping_add(block[3])));
 }

 buf[0] = buf[0].wrapping_add(a);
 buf[1] = buf[1].wrapping_add(b);
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn crc32c_is_stable() {
 assert_eq!(crc32c(b"123456789"), 0xE306_9283);
 }

 #[test]
 fn hash_versions_clear_bottom_bit() {
 for v in [HashVersion::Legacy, HashVersion::HalfMd4, HashVersion::Tea] {
 assert_eq!(v.hash(b"some-file-name") & 1, 0);
 }
 }

 #[test]
 fn hash_is_deterministic() {
 assert_eq!(
 HashVersion::HalfMd4.hash(b"foo"),
 HashVersion::HalfMd4.hash(b"foo")
);
 assert_ne!(HashVersion::HalfMd4.hash(b"foo"), HashVersion::HalfMd4.hash(b"bar"));
 }
}
