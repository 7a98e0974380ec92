//! Mount-time argument parsing.
//!
//! Ext accepts no runtime arguments. Btrfs initialization parameters arrive
//! as a single `"key value; key value;..."` string; ISO9660 accepts one
//! bare switch, `nojoliet`. Neither justifies pulling in a CLI-argument
//! crate — there is no `argv` here, only a string blob handed across the
//! VFS mount call — so this is hand-rolled the way the reference
//! `BTRFSAddOn` splits its own parameter string.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{CanFail, Error};

/// Parsed Btrfs initialization parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BtrfsMountArgs {
 /// Volume label; must be at most 255 bytes and contain neither `/` nor
 /// `\`.
 pub name: Option<String>,
 pub verbose: bool,
 /// Device sector size, must be in `512..=8192`.
 pub sector_size: Option<u32>,
 /// Filesystem block size, must be one of `1024, 2048, 4096, 8192, 16384`.
 pub block_size: Option<u32>,
}

const VALID_SECTOR_SIZES: core::ops::RangeInclusive<u32> = 512..=8192;
const VALID_BLOCK_SIZES: [u32; 5] = [1024, 2048, 4096, 8192, 16384];

impl BtrfsMountArgs {
 /// Parses a `"key value; key value;..."` string, validating every
 /// field as it goes.
 pub fn parse(args: &str) -> Result<Self, Error> {
 let mut parsed = Self::default();

 for clause in args.split(';') {
 let clause = clause.trim();
 if clause.is_empty() {
 continue;
 }
 let mut parts = clause.splitn(2, char::is_whitespace);
 let key = parts.next().unwrap_or_default().trim();
 let value = parts.next().unwrap_or_default().trim();

 match key {
 "name" => {
 if value.len() > 255 || value.contains('/') || value.contains('\\') {
 return Err(Error::BadValue);
 }
 parsed.name = Some(String::from(value));
 }
 "verbose" => parsed.verbose = true,
 "sector_size" => {
 let size: u32 = value.parse().map_err(|_| Error::BadValue)?;
 if !VALID_SECTOR_SIZES.contains(&size) {
 return Err(Error::BadValue);
 }
 parsed.sector_size = Some(size);
 }
 "block_size" => {
 let size: u32 = value.parse().map_err(|_| Error::BadValue)?;
 if !VALID_BLOCK_SIZES.contains(&size) {
 return Err(Error::BadValue);
 }
 parsed.block_size = Some(size);
 }
 "" => {}
 _ => return Err(Error::Unsupported),
 }
 }

 Ok(parsed)
 }

 pub fn validate(&self) -> CanFail {
 if let Some(name) = &self.name {
 if name.len() > 255 || name.contains('/') || name.contains('\\') {
 return Err(Error::BadValue);
 }
 }
 Ok(())
 }
}

/// Parsed ISO9660 mount arguments: a single optional switch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Iso9660MountArgs {
 /// Forces plain ISO9660 interpretation, ignoring any Joliet SVD.
 pub no_joliet: bool,
}

impl Iso9660MountArgs {
 pub fn parse(args: &str) -> Result<Self, Error> {
 let tokens: Vec<&str> = args.split_whitespace().collect();
 match tokens.as_slice() {
 [] => Ok(Self::default()),
 ["nojoliet"] => Ok(Self {
 no_joliet: true,
 }),
 _ => Err(Error::Unsupported),
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn parses_btrfs_args() {
 let args = BtrfsMountArgs::parse("name test; block_size 4096; verbose").unwrap();
 assert_eq!(args.name.as_deref(), Some("test"));
 assert_eq!(args.block_size, Some(4096));
 assert!(args.verbose);
 }

 #[test]
 fn rejects_bad_block_size() {
 assert_eq!(
 BtrfsMountArgs::parse("block_size 3000").unwrap_err(),
 Error::BadValue
);
 }

 #[test]
 fn rejects_slash_in_label() {
 assert_eq!(
 BtrfsMountArgs::parse("name a/b").unwrap_err(),
 Error::BadValue
);
 }

 #[test]
 fn iso9660_nojoliet_switch() {
 assert!(Iso9660MountArgs::parse("nojoliet").unwrap().no_joliet);
 assert!(!Iso9660MountArgs::parse("").unwrap().no_joliet);
 }
}
