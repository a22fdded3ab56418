//! Bidirectional inode ↔ path mapping for the mounted catalog
//!
//! Inode numbers are handed out on first lookup and never reused, so a path
//! keeps its inode across index swaps for as long as it exists.

use std::collections::HashMap;

use common::vfs::path;
use common::FilesystemIndex;

#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    /// Next available inode number (1 is root)
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table.path_to_inode.insert("/".to_string(), Self::ROOT_INODE);
        table.inode_to_path.insert(Self::ROOT_INODE, "/".to_string());
        table
    }

    /// Get or create an inode for a path
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        let normalized = path::normalize(path);
        if let Some(&inode) = self.path_to_inode.get(&normalized) {
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(normalized.clone(), inode);
        self.inode_to_path.insert(inode, normalized);
        inode
    }

    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(&path::normalize(path)).copied()
    }

    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(String::as_str)
    }

    /// Forget paths that no longer exist in `index`. Returns how many were
    /// dropped. Root is always kept.
    pub fn prune(&mut self, index: &FilesystemIndex) -> usize {
        let before = self.inode_to_path.len();
        self.inode_to_path.retain(|&inode, path| {
            inode == Self::ROOT_INODE || index.is_directory(path) || index.is_file(path)
        });
        let live = &self.inode_to_path;
        self.path_to_inode.retain(|_, inode| live.contains_key(inode));
        before - self.inode_to_path.len()
    }

    pub fn len(&self) -> usize {
        self.inode_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        // Root is always registered
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{IndexLayout, MetaRecord};

    #[test]
    fn test_root_inode() {
        let table = InodeTable::new();
        assert_eq!(table.get_inode("/"), Some(InodeTable::ROOT_INODE));
        assert_eq!(table.get_inode(""), Some(InodeTable::ROOT_INODE));
        assert_eq!(table.get_path(InodeTable::ROOT_INODE), Some("/"));
    }

    #[test]
    fn test_get_or_create() {
        let mut table = InodeTable::new();

        let a = table.get_or_create("/movies");
        let b = table.get_or_create("movies/");
        let c = table.get_or_create("/series");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, InodeTable::ROOT_INODE);
        assert_eq!(table.get_path(c), Some("/series"));
    }

    #[test]
    fn test_prune_keeps_live_paths_and_never_reuses() {
        let record: MetaRecord = serde_json::from_value(serde_json::json!({
            "item_id": 1,
            "file_id": 0,
            "category": "torrents",
            "media_type": "movie",
            "root_folder_name": "Foo (2024)",
            "file_name": "Foo (2024).mkv",
            "file_size": 10,
            "download_link_template": "",
            "real_path": "",
        }))
        .unwrap();
        let layout = IndexLayout::default();
        let index = FilesystemIndex::build([&record], &layout);

        let mut table = InodeTable::new();
        let live = table.get_or_create("/movies/Foo (2024)");
        let gone = table.get_or_create("/movies/Bar");

        assert_eq!(table.prune(&index), 1);
        assert_eq!(table.get_inode("/movies/Foo (2024)"), Some(live));
        assert!(table.get_path(gone).is_none());

        let fresh = table.get_or_create("/movies/Bar");
        assert!(fresh > gone);
        assert_eq!(table.len(), 3);
    }
}
