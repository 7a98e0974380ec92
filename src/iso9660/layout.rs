//! On-disk constants and the volume-descriptor/directory-record layouts,
//!. None of this is `bytemuck::Pod` — every field is
//! both-endian (LE then BE) or variable-length, so records are parsed by
//! hand the same way a packed, mixed-endian on-disk format has to be.

/// CD-ROM sectors 0-15 are the System Area; the Volume Descriptor Set
/// starts at sector 16.
pub const SYSTEM_AREA_SECTORS: u64 = 16;
pub const SECTOR_SIZE: u32 = 2048;

pub const VOLUME_DESCRIPTOR_LEN: usize = SECTOR_SIZE as usize;
pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";

pub const VD_TYPE_BOOT_RECORD: u8 = 0;
pub const VD_TYPE_PRIMARY: u8 = 1;
pub const VD_TYPE_SUPPLEMENTARY: u8 = 2;
pub const VD_TYPE_PARTITION: u8 = 3;
pub const VD_TYPE_TERMINATOR: u8 = 255;

/// Offsets within a Primary/Supplementary Volume Descriptor.
pub const VD_TYPE_OFFSET: usize = 0;
pub const VD_IDENTIFIER_OFFSET: usize = 1;
pub const VD_VOLUME_ID_OFFSET: usize = 40;
pub const VD_VOLUME_ID_LEN: usize = 32;
pub const VD_VOLUME_SPACE_SIZE_LE_OFFSET: usize = 80;
pub const VD_VOLUME_SPACE_SIZE_BE_OFFSET: usize = 84;
pub const VD_ESCAPE_SEQUENCE_OFFSET: usize = 88;
pub const VD_ESCAPE_SEQUENCE_LEN: usize = 32;
pub const VD_LOGICAL_BLOCK_SIZE_LE_OFFSET: usize = 128;
pub const VD_LOGICAL_BLOCK_SIZE_BE_OFFSET: usize = 130;
pub const VD_ROOT_DIRECTORY_RECORD_OFFSET: usize = 156;
pub const VD_ROOT_DIRECTORY_RECORD_LEN: usize = 34;

/// The three Joliet escape sequences identifying UCS-2 level 1/2/3,
/// any of which selects Joliet interpretation of an SVD.
pub const JOLIET_ESCAPE_SEQUENCES: [&[u8]; 3] = [b"%/@", b"%/C", b"%/E"];

/// Fixed 33-byte directory-record header; `name` (and an optional Rock
/// Ridge system-use area) follows.
pub const DIR_RECORD_HEADER_LEN: usize = 33;
pub const DR_LENGTH_OFFSET: usize = 0;
pub const DR_EXT_ATTR_LEN_OFFSET: usize = 1;
pub const DR_EXTENT_LBA_LE_OFFSET: usize = 2;
pub const DR_EXTENT_LBA_BE_OFFSET: usize = 6;
pub const DR_DATA_LENGTH_LE_OFFSET: usize = 10;
pub const DR_DATA_LENGTH_BE_OFFSET: usize = 14;
pub const DR_RECORDING_DATE_OFFSET: usize = 18;
pub const DR_RECORDING_DATE_LEN: usize = 7;
pub const DR_FLAGS_OFFSET: usize = 25;
pub const DR_FILE_UNIT_SIZE_OFFSET: usize = 26;
pub const DR_INTERLEAVE_GAP_OFFSET: usize = 27;
pub const DR_VOLUME_SEQ_LE_OFFSET: usize = 28;
pub const DR_VOLUME_SEQ_BE_OFFSET: usize = 30;
pub const DR_NAME_LEN_OFFSET: usize = 32;
pub const DR_NAME_OFFSET: usize = 33;

pub const DR_FLAG_HIDDEN: u8 = 0x01;
pub const DR_FLAG_DIRECTORY: u8 = 0x02;

/// Self (`\0`) and parent (`\01`) entries use a single-byte name field
/// holding this literal value rather than an ASCII `.`/`..`.
pub const NAME_SELF: u8 = 0x00;
pub const NAME_PARENT: u8 = 0x01;

/// The vnode id reserved for the root directory — every
/// other vnode id is the directory record's extent LBA.
pub const ROOT_VNODE_ID: u64 = 1;

/// Rock Ridge System Use Sharing Protocol entry tags, found in the
/// system-use area trailing a directory record's name (and padding byte).
pub const SUSP_PX: [u8; 2] = *b"PX";
pub const SUSP_NM: [u8; 2] = *b"NM";
pub const SUSP_SL: [u8; 2] = *b"SL";

/// `NM`/`SL` "continue" flag bit: this entry's content is continued in the
/// next SUSP entry of the same tag rather than being self-contained.
pub const SUSP_CONTINUE: u8 = 0x01;
/// `SL` component-record flags: the component is itself `.`/`..`.
pub const SL_COMPONENT_CURRENT: u8 = 0x02;
pub const SL_COMPONENT_PARENT: u8 = 0x04;
pub const SL_COMPONENT_ROOT: u8 = 0x08;

#[must_use]
pub fn read_le32(b: &[u8]) -> u32 {
 u32::from_le_bytes(b[..4].try_into().unwrap())
}

#[must_use]
pub fn read_be32(b: &[u8]) -> u32 {
 u32::from_be_bytes(b[..4].try_into().unwrap())
}

#[must_use]
pub fn read_le16(b: &[u8]) -> u16 {
 u16::from_le_bytes(b[..2].try_into().unwrap())
}
