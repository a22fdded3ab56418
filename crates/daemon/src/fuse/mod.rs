//! FUSE filesystem integration for the media catalog
//!
//! # Architecture
//!
//! - `MediaFs`: read-only FUSE filesystem implementation using fuser
//! - `InodeTable`: bidirectional inode ↔ path mapping
//! - `BlockCache`: fixed-size block cache serving file contents through
//!   HTTP range requests
//!
//! The block cache has no FUSE dependency and is always built; the
//! filesystem itself sits behind the `fuse` feature.

mod block_cache;
#[cfg(feature = "fuse")]
mod inode_table;
#[cfg(feature = "fuse")]
mod media_fs;

pub use block_cache::{BlockCache, BlockCacheConfig, BlockCacheStats, ReadError};
#[cfg(feature = "fuse")]
pub use inode_table::InodeTable;
#[cfg(feature = "fuse")]
pub use media_fs::{spawn_mount, MediaFs, MountError};
