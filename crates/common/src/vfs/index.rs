use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::path;
use crate::meta::{MediaType, MetaRecord};

/// Names of the two top-level directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLayout {
    pub movies: String,
    pub series: String,
}

impl Default for IndexLayout {
    fn default() -> Self {
        Self {
            movies: "movies".to_string(),
            series: "series".to_string(),
        }
    }
}

impl IndexLayout {
    pub fn new(movies: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            movies: movies.into(),
            series: series.into(),
        }
    }

    /// Top-level directory holding the given media type
    pub fn root_for(&self, media_type: MediaType) -> &str {
        if media_type.is_episodic() {
            &self.series
        } else {
            &self.movies
        }
    }

    /// Filesystem path of a file with the given naming components.
    ///
    /// Movies live at `/{movies}/{root}/{file}`, series and anime at
    /// `/{series}/{root}/{season}/{file}`. Returns `None` when a component is
    /// missing or cannot be used as a single path segment.
    pub fn real_path(
        &self,
        media_type: MediaType,
        root: &str,
        season: Option<&str>,
        file: &str,
    ) -> Option<String> {
        let top = self.root_for(media_type);
        if !path::is_valid_component(top)
            || !path::is_valid_component(root)
            || !path::is_valid_component(file)
        {
            return None;
        }

        if media_type.is_episodic() {
            let season = season.filter(|s| path::is_valid_component(s))?;
            Some(format!("/{}/{}/{}/{}", top, root, season, file))
        } else {
            Some(format!("/{}/{}/{}", top, root, file))
        }
    }
}

/// Immutable snapshot of the virtual directory tree
#[derive(Debug, Clone)]
pub struct FilesystemIndex {
    layout: IndexLayout,
    /// Directory path to sorted, de-duplicated child names
    directories: BTreeMap<String, Vec<String>>,
    /// File path to the record it serves
    files: HashMap<String, MetaRecord>,
    generation: u64,
}

impl FilesystemIndex {
    /// An index with only the two top-level directories.
    pub fn empty(layout: &IndexLayout) -> Self {
        Self::build(std::iter::empty(), layout)
    }

    /// Build the index from a set of records.
    ///
    /// The result depends only on the set of records, not on their order.
    /// Records without a usable path are skipped with a warning. When two
    /// records map to the same path, the one with the greater
    /// `(category, item_id, file_id)` key is kept.
    pub fn build<'a, I>(records: I, layout: &IndexLayout) -> Self
    where
        I: IntoIterator<Item = &'a MetaRecord>,
    {
        let mut files: HashMap<String, MetaRecord> = HashMap::new();

        for record in records {
            let Some(real_path) = record.compute_real_path(layout) else {
                tracing::warn!(
                    category = %record.category,
                    item_id = record.item_id,
                    file_id = record.file_id,
                    "skipping record with unusable path fields"
                );
                continue;
            };

            match files.get(&real_path) {
                Some(existing) if existing.key() > record.key() => {
                    tracing::debug!(path = %real_path, "path collision, keeping existing record");
                }
                Some(_) => {
                    tracing::debug!(path = %real_path, "path collision, replacing record");
                    files.insert(real_path, record.clone());
                }
                None => {
                    files.insert(real_path, record.clone());
                }
            }
        }

        let mut tree: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let root = tree.entry("/".to_string()).or_default();
        root.insert(layout.movies.clone());
        root.insert(layout.series.clone());
        tree.entry(path::join("/", &layout.movies)).or_default();
        tree.entry(path::join("/", &layout.series)).or_default();

        for file_path in files.keys() {
            let mut child = file_path.as_str();
            loop {
                let parent = path::parent(child);
                let inserted = tree
                    .entry(parent.clone())
                    .or_default()
                    .insert(path::filename(child).to_string());
                if !inserted || parent == "/" {
                    break;
                }
                // Walk up until an ancestor already lists this branch.
                child = &file_path[..parent.len()];
            }
        }

        let directories = tree
            .into_iter()
            .map(|(dir, children)| (dir, children.into_iter().collect()))
            .collect();

        Self {
            layout: layout.clone(),
            directories,
            files,
            generation: 0,
        }
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.directories.contains_key(&path::normalize(path))
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(&path::normalize(path))
    }

    pub fn get_record(&self, path: &str) -> Option<&MetaRecord> {
        self.files.get(&path::normalize(path))
    }

    /// Children of a directory: `Some(&[])` for an empty directory, `None`
    /// when the path is not a directory.
    pub fn list_children(&self, path: &str) -> Option<&[String]> {
        self.directories
            .get(&path::normalize(path))
            .map(Vec::as_slice)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    /// All files in the snapshot, in no particular order
    pub fn files(&self) -> impl Iterator<Item = (&str, &MetaRecord)> {
        self.files.iter().map(|(p, r)| (p.as_str(), r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use std::collections::BTreeMap;

    fn movie(item_id: u64, title: &str, year: u16) -> MetaRecord {
        let root = format!("{} ({})", title, year);
        MetaRecord {
            item_id,
            file_id: 0,
            category: Category::Torrents,
            media_type: MediaType::Movie,
            root_folder_name: root.clone(),
            season_folder_name: None,
            file_name: format!("{}.mkv", root),
            file_size: 1000 + item_id,
            download_link_template: String::new(),
            real_path: String::new(),
            symlink_path: None,
            folder_name: String::new(),
            folder_hash: String::new(),
            original_file_name: String::new(),
            mime_type: "video/x-matroska".to_string(),
            relative_path: String::new(),
            extension: ".mkv".to_string(),
            title: title.to_string(),
            year: Some(year),
            season: None,
            episodes: vec![],
            metadata_link: None,
            image: None,
            backdrop: None,
            extra: BTreeMap::new(),
        }
    }

    fn episode(item_id: u64, file_id: u64, show: &str, season: u32, ep: u32) -> MetaRecord {
        let mut rec = movie(item_id, show, 2020);
        rec.file_id = file_id;
        rec.media_type = MediaType::Series;
        rec.season_folder_name = Some(format!("Season {:02}", season));
        rec.file_name = format!("{} S{:02}E{:02}.mkv", show, season, ep);
        rec
    }

    #[test]
    fn test_movie_path_round_trip() {
        let rec = movie(1, "Foo", 2024);
        let index = FilesystemIndex::build([&rec], &IndexLayout::default());

        assert_eq!(index.list_children("/"), Some(&["movies".to_string(), "series".to_string()][..]));
        assert!(index.is_directory("/movies/Foo (2024)"));
        assert!(index.is_file("/movies/Foo (2024)/Foo (2024).mkv"));
        assert_eq!(
            index.get_record("/movies/Foo (2024)/Foo (2024).mkv"),
            Some(&rec)
        );
        assert_eq!(
            index.list_children("/movies/Foo (2024)"),
            Some(&["Foo (2024).mkv".to_string()][..])
        );
    }

    #[test]
    fn test_build_is_order_independent() {
        let mut records = vec![
            movie(1, "Foo", 2024),
            movie(2, "Bar", 1999),
            episode(3, 0, "Show", 1, 1),
            episode(3, 1, "Show", 1, 2),
            episode(4, 0, "Show", 2, 1),
        ];
        // Same path as item 1, different identity
        let mut clash = movie(9, "Foo", 2024);
        clash.category = Category::Usenet;
        records.push(clash);

        let layout = IndexLayout::default();
        let forward = FilesystemIndex::build(&records, &layout);
        records.reverse();
        let backward = FilesystemIndex::build(&records, &layout);
        records.swap(0, 3);
        let shuffled = FilesystemIndex::build(&records, &layout);

        for other in [&backward, &shuffled] {
            assert_eq!(forward.directories, other.directories);
            assert_eq!(forward.files, other.files);
        }

        let winner = forward.get_record("/movies/Foo (2024)/Foo (2024).mkv").unwrap();
        assert_eq!(winner.category, Category::Usenet);
        assert_eq!(winner.item_id, 9);
        assert_eq!(forward.file_count(), 5);
    }

    #[test]
    fn test_series_layout() {
        let records = vec![episode(3, 0, "Show", 1, 1), episode(3, 1, "Show", 2, 1)];
        let index = FilesystemIndex::build(&records, &IndexLayout::default());

        assert_eq!(
            index.list_children("/series/Show (2020)"),
            Some(&["Season 01".to_string(), "Season 02".to_string()][..])
        );
        assert!(index.is_file("/series/Show (2020)/Season 02/Show S02E01.mkv"));
        assert_eq!(index.list_children("/movies"), Some(&[][..]));
    }

    #[test]
    fn test_malformed_records_excluded() {
        let mut missing_season = episode(1, 0, "Show", 1, 1);
        missing_season.season_folder_name = None;
        let mut bad_root = movie(2, "Foo", 2024);
        bad_root.root_folder_name = "..".to_string();
        let mut slash = movie(3, "Bar", 2024);
        slash.file_name = "a/b.mkv".to_string();
        let mut empty_name = movie(4, "Baz", 2024);
        empty_name.file_name = String::new();
        let good = movie(5, "Good", 2021);

        let records = vec![missing_season, bad_root, slash, empty_name, good];
        let index = FilesystemIndex::build(&records, &IndexLayout::default());

        assert_eq!(index.file_count(), 1);
        assert_eq!(index.list_children("/series"), Some(&[][..]));
        assert_eq!(
            index.list_children("/movies"),
            Some(&["Good (2021)".to_string()][..])
        );
    }

    #[test]
    fn test_unknown_paths() {
        let index = FilesystemIndex::empty(&IndexLayout::default());
        assert!(index.list_children("/nope").is_none());
        assert!(index.get_record("/movies/x.mkv").is_none());
        assert!(!index.is_file("/movies"));
        assert!(index.is_directory("/movies/"));
        assert_eq!(index.directory_count(), 3);
    }

    #[test]
    fn test_custom_layout() {
        let layout = IndexLayout::new("films", "shows");
        let index = FilesystemIndex::build([&movie(1, "Foo", 2024)], &layout);
        assert!(index.is_file("/films/Foo (2024)/Foo (2024).mkv"));
        assert!(index.is_directory("/shows"));
        assert!(!index.is_directory("/movies"));
    }
}
