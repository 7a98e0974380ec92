//! The Ext2/3/4 engine: one driver spanning all three on-disk revisions,
//! selecting behavior (extents vs. indirect blocks, HTree vs. linear
//! directories, journaled vs. not) from the superblock's feature bits at
//! mount time rather than three separate drivers.

pub mod alloc;
pub mod bitmap;
pub mod datastream;
pub mod dir;
pub mod extent;
pub mod group;
pub mod inode;
pub mod journal;
pub mod layout;
pub mod volume;
pub mod xattr;

pub use volume::{identify, ExtVolume};
