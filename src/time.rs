//! On-disk timestamp encoding.
//!
//! Both Ext4 (with the `nanosecond timestamps` / 2038 bit extension) and
//! Btrfs store a timestamp as seconds-since-epoch plus an optional
//! nanoseconds field; [`UnixTimestamp`] packs both into one 64-bit value the
//! same way the reference `ext4` driver's `UnixTimestamp` does, since that
//! encoding is a fixed on-disk format rather than a design choice.
//!
//! The engine has no hardware clock of its own (it is a library, not a
//! kernel) — callers that need "now" (to stamp `ctime` on create, `mtime` on
//! write,...) provide one through [`Clock`].

use bytemuck::{Pod, Zeroable};

/// A Unix timestamp as stored in an inode record: the low 32 bits are a
/// signed seconds-since-epoch value, extended by two bits (allowing dates
/// past 2038) in bits 32-33, with bits 34-63 holding up to 30 bits of
/// nanoseconds when the filesystem has nanosecond-precision timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct UnixTimestamp(u64);

impl From<u64> for UnixTimestamp {
 fn from(value: u64) -> Self {
 Self(value)
 }
}

impl From<UnixTimestamp> for u64 {
 fn from(value: UnixTimestamp) -> Self {
 value.0
 }
}

impl UnixTimestamp {
 /// The Unix epoch, 1970-01-01T00:00:00Z.
 pub const EPOCH: Self = Self(0);

 /// Builds a timestamp from plain seconds-since-epoch, with no
 /// nanosecond-extension bits set.
 #[must_use]
 pub fn from_seconds(seconds: i64) -> Self {
 let low = (seconds as u64) & 0xFFFF_FFFF;
 let ext = ((seconds >> 32) as u64) & 0b11;
 Self(low | (ext << 32))
 }

 /// Builds a timestamp from seconds-since-epoch plus nanoseconds,
 /// requiring the nanosecond-timestamps feature.
 #[must_use]
 pub fn from_seconds_and_nanos(seconds: i64, nanos: u32) -> Self {
 let base = Self::from_seconds(seconds).0;
 Self(base | (u64::from(nanos & 0x3FFF_FFFF) << 34))
 }

 /// The number of seconds elapsed since the Unix epoch (may be negative).
 #[must_use]
 pub fn seconds(self) -> i64 {
 let low = (self.0 & 0xFFFF_FFFF) as u32 as i32 as i64;
 let ext = ((self.0 >> 32) & 0b11) as i64;
 low + (ext << 32)
 }

 /// The nanosecond component, or 0 if this filesystem doesn't carry
 /// nanosecond precision.
 #[must_use]
 pub fn nanos(self) -> u32 {
 ((self.0 >> 34) & 0x3FFF_FFFF) as u32
 }
}

/// A source of wall-clock time, supplied by the host embedding this engine.
///
/// The engine calls this whenever an operation needs to stamp an inode's
/// `atime`/`mtime`/`ctime`/`crtime` (create, write, truncate, rename,...).
pub trait Clock {
 /// Returns the current time as a [`UnixTimestamp`].
 fn now(&self) -> UnixTimestamp;
}

/// A [`Clock`] that always returns the epoch; useful for deterministic
/// tests, never appropriate for a real mount.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrozenClock(pub UnixTimestamp);

impl Clock for FrozenClock {
 fn now(&self) -> UnixTimestamp {
 self.0
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn round_trips_seconds() {
 let ts = UnixTimestamp::from_seconds(1_700_000_000);
 assert_eq!(ts.seconds(), 1_700_000_000);
 assert_eq!(ts.nanos(), 0);
 }

 #[test]
 fn round_trips_seconds_and_nanos() {
 let ts = UnixTimestamp::from_seconds_and_nanos(1_700_000_000, 123_456_789);
 assert_eq!(ts.seconds(), 1_700_000_000);
 assert_eq!(ts.nanos(), 123_456_789);
 }

 #[test]
 fn frozen_clock_is_stable() {
 let clk = FrozenClock(UnixTimestamp::from_seconds(42));
 assert_eq!(clk.now().seconds(), 42);
 assert_eq!(clk.now(), clk.now());
 }
}
