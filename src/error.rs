//! The crate-wide error taxonomy.
//!
//! The reference add-ons this engine generalizes each return a `status_t`
//! drawn from a shared, fixed vocabulary (`B_ENTRY_NOT_FOUND`,
//! `B_DEVICE_FULL`,...). `Error` is that vocabulary reified as a Rust enum,
//! following the same one-flat-enum shape `fzboot::fzboot::errors` uses for
//! `IOError`/`ClockError`, rather than pulling in `thiserror` for a tree of
//! per-subsystem error types this crate doesn't have.

use core::fmt;

/// Result alias used throughout the crate, playing the role of the
/// reference implementations' `status_t` returns.
pub type FsResult<T> = Result<T, Error>;

/// Result alias for operations that either succeed or fail, with nothing to
/// return — mirrors `fzboot`'s `CanFail<T>`.
pub type CanFail = Result<(), Error>;

/// The full error vocabulary a caller of this crate can observe, per the
/// error-handling design in the specification this engine implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
 /// A mutation was attempted on a read-only mount, or a device that
 /// rejected read-write open.
 ReadOnlyDevice,
 /// Argument validation failed: negative offsets, oversized names,
 /// reserved ids, illegal mode bits.
 BadValue,
 /// On-disk checksum mismatch, magic mismatch, invalid feature bits, or a
 /// tree-node invariant was violated by data read from disk.
 BadData,
 /// An allocator could not satisfy a heap allocation.
 NoMemory,
 /// The underlying block device failed a read or write.
 IoError,
 /// A tree lookup exhausted the search without a match, or an iterator
 /// is already past its end.
 EntryNotFound,
 /// `create` collided with an existing name.
 FileExists,
 /// A permission check failed.
 NotAllowed,
 /// The operation required a file but found a directory.
 IsADirectory,
 /// The operation required a directory but found a file.
 NotADirectory,
 /// Removing a non-empty directory, or a tree shrink left data behind.
 DirectoryNotEmpty,
 /// An allocator could not satisfy the minimum requested run, or a tree
 /// node lacks space and cannot be split.
 DeviceFull,
 /// An unknown incompatible feature, unknown read-only-incompatible
 /// feature, or unknown journal feature was encountered at mount time.
 Unsupported,
 /// A name or vector output buffer was too small; the caller should retry
 /// with a larger buffer.
 BufferOverflow,
 /// An iterator was used after the tree that owned it was torn down.
 Interrupted,
 /// An on-disk or in-memory invariant that should be impossible under any
 /// well-formed filesystem state was violated (tree key inversion, CoW
 /// space-accounting overflow,...). Distinct from [`Error::BadData`]
 /// because it indicates an engine bug rather than disk corruption; the
 /// enclosing transaction is still aborted the same way.
 Bug(&'static str),
}

impl fmt::Display for Error {
 fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
 match self {
 Self::ReadOnlyDevice => write!(f, "volume is mounted read-only"),
 Self::BadValue => write!(f, "invalid argument"),
 Self::BadData => write!(f, "on-disk data failed validation"),
 Self::NoMemory => write!(f, "allocation failure"),
 Self::IoError => write!(f, "device I/O error"),
 Self::EntryNotFound => write!(f, "entry not found"),
 Self::FileExists => write!(f, "entry already exists"),
 Self::NotAllowed => write!(f, "operation not permitted"),
 Self::IsADirectory => write!(f, "is a directory"),
 Self::NotADirectory => write!(f, "not a directory"),
 Self::DirectoryNotEmpty => write!(f, "directory not empty"),
 Self::DeviceFull => write!(f, "no space left on device"),
 Self::Unsupported => write!(f, "unsupported feature"),
 Self::BufferOverflow => write!(f, "buffer too small"),
 Self::Interrupted => write!(f, "iterator interrupted"),
 Self::Bug(what) => write!(f, "internal invariant violated: {what}"),
 }
 }
}

/// Raises a [`Error::Bug`], logging it at `error` level first so it is
/// distinguishable in logs from ordinary disk-corruption failures.
#[macro_export]
macro_rules! bug {
 ($what:literal) => {{
 log::error!("invariant violated: {}", $what);
 return Err($crate::error::Error::Bug($what));
 }};
}
