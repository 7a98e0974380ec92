//! Read-only ISO9660 driver: Primary/Supplementary (Joliet) volume
//! descriptors, Rock Ridge metadata, and plain-ASCII or Joliet directory
//! records. No allocator, no journal, no write path.

pub mod dir;
pub mod inode;
pub mod layout;
pub mod volume;

pub use volume::{identify, Iso9660Volume};
