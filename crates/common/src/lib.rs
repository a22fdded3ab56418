//! Core data model for the media catalog filesystem.
//!
//! This crate is free of I/O: it describes what the remote catalog returns,
//! how catalog files become filesystem-addressable [`MetaRecord`]s, and how a
//! set of records is turned into an immutable [`vfs::FilesystemIndex`].
//!
//! # Modules
//!
//! - [`catalog`]: remote catalog items and files, download categories
//! - [`meta`]: enriched per-file records and media types
//! - [`release`]: release-name parsing (title, year, season, episode)
//! - [`naming`]: display names for folders and files
//! - [`vfs`]: the directory tree index and its atomically swappable handle

pub mod catalog;
pub mod meta;
pub mod naming;
pub mod release;
pub mod vfs;

pub use catalog::{CatalogFile, CatalogItem, Category, ParseCategoryError};
pub use meta::{MediaType, MetaRecord, ParseMediaTypeError, RecordKey};
pub use vfs::{FilesystemIndex, IndexHandle, IndexLayout};
