use std::collections::BTreeMap;
use std::sync::Arc;

use common::naming::{clean_title, episode_file_name, movie_file_name, season_folder, titled_folder};
use common::release::{self, ParsedRelease};
use common::{CatalogFile, CatalogItem, Category, IndexLayout, MediaType, MetaRecord};

use crate::catalog::{download_link_template, MatchCandidate, MetadataMatcher};

/// Turns catalog files into [`MetaRecord`]s, naming them from the best
/// title match when one is found.
pub struct Enricher {
    matcher: Arc<dyn MetadataMatcher>,
    layout: IndexLayout,
    mirror_root: Option<String>,
}

impl Enricher {
    pub fn new(
        matcher: Arc<dyn MetadataMatcher>,
        layout: IndexLayout,
        mirror_root: Option<String>,
    ) -> Self {
        Self {
            matcher,
            layout,
            mirror_root,
        }
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn mirror_root(&self) -> Option<&str> {
        self.mirror_root.as_deref()
    }

    /// Build the record for one file. Never fails: without a usable match the
    /// file is named after its raw name and item.
    pub async fn build(&self, category: Category, item: &CatalogItem, file: &CatalogFile) -> MetaRecord {
        let parsed = release::parse(&file.short_name);
        let query = format!("{} {}", item.display_name(), file.short_name);

        let mut record = match self.matcher.search(&query).await {
            Ok(Some(candidate)) => matched_record(category, item, file, &parsed, candidate),
            Ok(None) => {
                tracing::debug!(%query, "no title match");
                degraded_record(category, item, file, &parsed)
            }
            Err(err) => {
                tracing::warn!(%query, "title search failed: {}", err);
                degraded_record(category, item, file, &parsed)
            }
        };

        record.assign_paths(&self.layout, self.mirror_root.as_deref());
        record
    }
}

/// Record with catalog-derived fields filled in and naming left to the caller
fn base_record(category: Category, item: &CatalogItem, file: &CatalogFile, parsed: &ParsedRelease) -> MetaRecord {
    MetaRecord {
        item_id: item.id,
        file_id: file.id,
        category,
        media_type: MediaType::Movie,
        root_folder_name: String::new(),
        season_folder_name: None,
        file_name: String::new(),
        file_size: file.size,
        download_link_template: download_link_template(category, item.id, file.id),
        real_path: String::new(),
        symlink_path: None,
        folder_name: item.display_name().to_string(),
        folder_hash: item.hash.clone(),
        original_file_name: file.short_name.clone(),
        mime_type: file.mime_type.clone(),
        relative_path: file.relative_path.clone(),
        extension: file.extension().to_string(),
        title: clean_title(&parsed.title),
        year: parsed.year,
        season: parsed.season,
        episodes: parsed.episodes.clone(),
        metadata_link: None,
        image: None,
        backdrop: None,
        extra: BTreeMap::new(),
    }
}

fn matched_record(
    category: Category,
    item: &CatalogItem,
    file: &CatalogFile,
    parsed: &ParsedRelease,
    candidate: MatchCandidate,
) -> MetaRecord {
    let mut record = base_record(category, item, file, parsed);
    let title = candidate.title;
    let year = parsed.year.or(candidate.year);
    let extension = file.extension();

    record.media_type = candidate.media_type;
    record.root_folder_name = titled_folder(&title, year);
    record.year = year;

    if candidate.media_type.is_episodic() {
        let season = parsed.season.unwrap_or(1);
        record.season = Some(season);
        record.season_folder_name = Some(season_folder(season));
        record.file_name = episode_file_name(&title, season, &parsed.episodes, extension);
    } else {
        record.file_name = movie_file_name(&title, year, extension);
    }

    record.title = title;
    record.metadata_link = candidate.link;
    record.image = candidate.image;
    record.backdrop = candidate.backdrop;
    record
}

fn degraded_record(
    category: Category,
    item: &CatalogItem,
    file: &CatalogFile,
    parsed: &ParsedRelease,
) -> MetaRecord {
    let mut record = base_record(category, item, file, parsed);
    record.root_folder_name = or_else(clean_title(item.display_name()), || {
        or_else(clean_title(&item.hash), || item.id.to_string())
    });
    record.file_name = or_else(clean_title(&file.short_name), || {
        or_else(clean_title(&format!("{}{}", file.id, file.extension())), || {
            file.id.to_string()
        })
    });
    if record.title.is_empty() {
        record.title = record.root_folder_name.clone();
    }
    record
}

/// Names that clean to nothing fall back to a derived one.
fn or_else(name: String, fallback: impl FnOnce() -> String) -> String {
    if name.is_empty() {
        fallback()
    } else {
        name
    }
}
