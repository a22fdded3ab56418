//! Enriched per-file metadata records
//!
//! A [`MetaRecord`] is the unit the virtual filesystem addresses: one catalog
//! file, enriched with a display title, folder names and the computed paths.
//! Fields the engine does not know about are kept in [`MetaRecord::extra`]
//! and survive storage round trips untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::vfs::IndexLayout;

/// Kind of media a record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Anime,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Anime => "anime",
        }
    }

    /// Series and anime are laid out by season.
    pub fn is_episodic(&self) -> bool {
        matches!(self, MediaType::Series | MediaType::Anime)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown media type: {0}")]
pub struct ParseMediaTypeError(pub String);

impl std::str::FromStr for MediaType {
    type Err = ParseMediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "series" => Ok(MediaType::Series),
            "anime" => Ok(MediaType::Anime),
            other => Err(ParseMediaTypeError(other.to_string())),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identity of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub category: Category,
    pub item_id: u64,
    pub file_id: u64,
}

/// The enriched, filesystem-addressable unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub item_id: u64,
    pub file_id: u64,
    pub category: Category,
    pub media_type: MediaType,
    pub root_folder_name: String,
    /// Season folder, series and anime only
    #[serde(default)]
    pub season_folder_name: Option<String>,
    /// Display name inside the filesystem
    pub file_name: String,
    pub file_size: u64,
    /// Catalog endpoint that resolves to a time-scoped download URL
    pub download_link_template: String,
    /// Path inside the virtual filesystem
    pub real_path: String,
    /// Path of the mirror link, when mirroring is enabled
    #[serde(default)]
    pub symlink_path: Option<String>,

    #[serde(default)]
    pub folder_name: String,
    #[serde(default)]
    pub folder_hash: String,
    #[serde(default)]
    pub original_file_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub relative_path: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episodes: Vec<u32>,
    #[serde(default)]
    pub metadata_link: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub backdrop: Option<String>,

    /// Unrecognized fields, preserved as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MetaRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            category: self.category,
            item_id: self.item_id,
            file_id: self.file_id,
        }
    }

    /// Identity of the catalog item this record belongs to
    pub fn item_key(&self) -> (Category, u64) {
        (self.category, self.item_id)
    }

    /// Compute the virtual filesystem path from the naming fields.
    ///
    /// Returns `None` when a required component is missing or unusable.
    pub fn compute_real_path(&self, layout: &IndexLayout) -> Option<String> {
        layout.real_path(
            self.media_type,
            &self.root_folder_name,
            self.season_folder_name.as_deref(),
            &self.file_name,
        )
    }

    /// Recompute `real_path` and `symlink_path` for the given layout.
    pub fn assign_paths(&mut self, layout: &IndexLayout, mirror_root: Option<&str>) {
        if let Some(path) = self.compute_real_path(layout) {
            self.symlink_path = mirror_root.map(|root| join_root(root, &path));
            self.real_path = path;
        }
    }
}

/// Join an absolute directory with a filesystem path starting with `/`.
pub fn join_root(root: &str, path: &str) -> String {
    let root = root.trim_end_matches('/');
    format!("{}{}", root, path)
}
