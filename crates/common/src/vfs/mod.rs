//! Virtual filesystem index
//!
//! The index is an immutable snapshot of the directory tree derived from a
//! set of [`MetaRecord`](crate::meta::MetaRecord)s. It is rebuilt from scratch
//! after every refresh and published through an [`IndexHandle`]; readers hold
//! an `Arc` to the snapshot they started with, so a swap never disturbs an
//! in-progress lookup or read.

mod handle;
mod index;
pub mod path;

pub use handle::IndexHandle;
pub use index::{FilesystemIndex, IndexLayout};
