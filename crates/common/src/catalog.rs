//! Remote catalog types
//!
//! These mirror the shape of the hosted catalog's listing endpoint. Only the
//! fields the filesystem needs are modelled; everything else is ignored on
//! deserialization.

use serde::{Deserialize, Serialize};

/// Download category. Each category is listed and refreshed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Torrents,
    Usenet,
    Webdl,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Torrents, Category::Usenet, Category::Webdl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Torrents => "torrents",
            Category::Usenet => "usenet",
            Category::Webdl => "webdl",
        }
    }

    /// Query parameter naming the item id on the download-link endpoint
    pub fn id_param(&self) -> &'static str {
        match self {
            Category::Torrents => "torrent_id",
            Category::Usenet => "usenet_id",
            Category::Webdl => "web_id",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct ParseCategoryError(pub String);

impl std::str::FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "torrents" => Ok(Category::Torrents),
            "usenet" => Ok(Category::Usenet),
            "webdl" => Ok(Category::Webdl),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A catalog container (one torrent, usenet job or web download)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: u64,
    /// Content identifier, used as display name when nothing better exists
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the content is ready to stream
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub files: Vec<CatalogFile>,
}

impl CatalogItem {
    /// Display name for the item: its name unless missing or just the hash.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() && name != self.hash => name,
            _ => &self.hash,
        }
    }
}

/// One streamable file within a [`CatalogItem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub id: u64,
    pub short_name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "mimetype", default)]
    pub mime_type: String,
    /// Path of the file relative to the item root
    #[serde(rename = "name", default)]
    pub relative_path: String,
}

impl CatalogFile {
    /// Whether the file's mime type is in the allowed set.
    pub fn is_allowed(&self, allowed: &[String]) -> bool {
        self.mime_type.starts_with("video/") && allowed.iter().any(|m| m == &self.mime_type)
    }

    /// File extension including the leading dot, or empty.
    pub fn extension(&self) -> &str {
        match self.short_name.rfind('.') {
            Some(pos) if pos > 0 => &self.short_name[pos..],
            _ => "",
        }
    }
}
