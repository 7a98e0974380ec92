//! The copy-on-write Btrfs engine: B+-tree storage of every on-disk
//! object (inodes, directory entries, extents, chunks) keyed by
//! `(object_id, item_type, offset)`.

pub mod alloc;
pub mod dir;
pub mod inode;
pub mod layout;
pub mod tree;
pub mod volume;
pub mod xattr;

pub use volume::{identify, BtrfsVolume};
