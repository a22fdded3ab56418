use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use time::OffsetDateTime;

use common::{Category, MediaType, MetaRecord};

use super::{Database, StoreError};

/// Query contract over persisted [`MetaRecord`]s
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record with the same `(category, item_id, file_id)`.
    async fn upsert(&self, record: &MetaRecord) -> Result<(), StoreError>;

    /// Records matching the given ids; `None` matches anything.
    async fn get(
        &self,
        item_id: Option<u64>,
        file_id: Option<u64>,
    ) -> Result<Vec<MetaRecord>, StoreError>;

    /// All records of a category.
    async fn list_by_type(&self, category: Category) -> Result<Vec<MetaRecord>, StoreError>;

    /// All records of a media type.
    async fn list_by_media_type(&self, media_type: MediaType)
        -> Result<Vec<MetaRecord>, StoreError>;

    /// Delete records of the given items, optionally narrowed to one file id
    /// and one category. Returns the number of deleted rows.
    async fn delete(
        &self,
        item_ids: &[u64],
        file_id: Option<u64>,
        category: Option<Category>,
    ) -> Result<u64, StoreError>;

    /// Delete every record of a category.
    async fn clear(&self, category: Category) -> Result<u64, StoreError>;
}

const ORDER: &str = " ORDER BY title, season, episodes, file_name";

#[async_trait]
impl MetadataStore for Database {
    async fn upsert(&self, record: &MetaRecord) -> Result<(), StoreError> {
        let extra_json = serde_json::to_string(&record.extra)?;
        let episodes = join_episodes(&record.episodes);
        let now = OffsetDateTime::now_utc().unix_timestamp();

        sqlx::query(
            r#"
            INSERT INTO meta_items (
                category, item_id, file_id, media_type, root_folder_name,
                season_folder_name, file_name, file_size, download_link_template,
                real_path, symlink_path, folder_name, folder_hash, original_file_name,
                mime_type, relative_path, extension, title, year, season, episodes,
                metadata_link, image, backdrop, extra_json, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
            ON CONFLICT (category, item_id, file_id) DO UPDATE SET
                media_type = excluded.media_type,
                root_folder_name = excluded.root_folder_name,
                season_folder_name = excluded.season_folder_name,
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                download_link_template = excluded.download_link_template,
                real_path = excluded.real_path,
                symlink_path = excluded.symlink_path,
                folder_name = excluded.folder_name,
                folder_hash = excluded.folder_hash,
                original_file_name = excluded.original_file_name,
                mime_type = excluded.mime_type,
                relative_path = excluded.relative_path,
                extension = excluded.extension,
                title = excluded.title,
                year = excluded.year,
                season = excluded.season,
                episodes = excluded.episodes,
                metadata_link = excluded.metadata_link,
                image = excluded.image,
                backdrop = excluded.backdrop,
                extra_json = excluded.extra_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.category.as_str())
        .bind(record.item_id as i64)
        .bind(record.file_id as i64)
        .bind(record.media_type.as_str())
        .bind(&record.root_folder_name)
        .bind(&record.season_folder_name)
        .bind(&record.file_name)
        .bind(record.file_size as i64)
        .bind(&record.download_link_template)
        .bind(&record.real_path)
        .bind(&record.symlink_path)
        .bind(&record.folder_name)
        .bind(&record.folder_hash)
        .bind(&record.original_file_name)
        .bind(&record.mime_type)
        .bind(&record.relative_path)
        .bind(&record.extension)
        .bind(&record.title)
        .bind(record.year.map(i64::from))
        .bind(record.season.map(i64::from))
        .bind(episodes)
        .bind(&record.metadata_link)
        .bind(&record.image)
        .bind(&record.backdrop)
        .bind(extra_json)
        .bind(now)
        .execute(&**self)
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        item_id: Option<u64>,
        file_id: Option<u64>,
    ) -> Result<Vec<MetaRecord>, StoreError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM meta_items WHERE 1 = 1");
        if let Some(item_id) = item_id {
            query.push(" AND item_id = ").push_bind(item_id as i64);
        }
        if let Some(file_id) = file_id {
            query.push(" AND file_id = ").push_bind(file_id as i64);
        }
        query.push(ORDER);

        let rows = query.build().fetch_all(&**self).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn list_by_type(&self, category: Category) -> Result<Vec<MetaRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM meta_items WHERE category = ?1{}",
            ORDER
        ))
        .bind(category.as_str())
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_by_media_type(
        &self,
        media_type: MediaType,
    ) -> Result<Vec<MetaRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM meta_items WHERE media_type = ?1{}",
            ORDER
        ))
        .bind(media_type.as_str())
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn delete(
        &self,
        item_ids: &[u64],
        file_id: Option<u64>,
        category: Option<Category>,
    ) -> Result<u64, StoreError> {
        if item_ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM meta_items WHERE item_id IN (");
        let mut ids = query.separated(", ");
        for id in item_ids {
            ids.push_bind(*id as i64);
        }
        ids.push_unseparated(")");

        if let Some(file_id) = file_id {
            query.push(" AND file_id = ").push_bind(file_id as i64);
        }
        if let Some(category) = category {
            query.push(" AND category = ").push_bind(category.as_str());
        }

        let result = query.build().execute(&**self).await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self, category: Category) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM meta_items WHERE category = ?1")
            .bind(category.as_str())
            .execute(&**self)
            .await?;

        tracing::debug!(%category, rows = result.rows_affected(), "cleared metadata");
        Ok(result.rows_affected())
    }
}

fn join_episodes(episodes: &[u32]) -> String {
    episodes
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_episodes(raw: &str) -> Result<Vec<u32>, StoreError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| StoreError::InvalidColumn {
                column: "episodes",
                value: raw.to_string(),
            })
        })
        .collect()
}

fn row_to_record(row: &SqliteRow) -> Result<MetaRecord, StoreError> {
    let category: String = row.try_get("category")?;
    let category = category
        .parse::<Category>()
        .map_err(|_| StoreError::InvalidColumn {
            column: "category",
            value: category.clone(),
        })?;
    let media_type: String = row.try_get("media_type")?;
    let media_type = media_type
        .parse::<MediaType>()
        .map_err(|_| StoreError::InvalidColumn {
            column: "media_type",
            value: media_type.clone(),
        })?;

    let episodes: String = row.try_get("episodes")?;
    let extra_json: String = row.try_get("extra_json")?;
    let extra: BTreeMap<String, serde_json::Value> = serde_json::from_str(&extra_json)?;

    Ok(MetaRecord {
        item_id: row.try_get::<i64, _>("item_id")? as u64,
        file_id: row.try_get::<i64, _>("file_id")? as u64,
        category,
        media_type,
        root_folder_name: row.try_get("root_folder_name")?,
        season_folder_name: row.try_get("season_folder_name")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        download_link_template: row.try_get("download_link_template")?,
        real_path: row.try_get("real_path")?,
        symlink_path: row.try_get("symlink_path")?,
        folder_name: row.try_get("folder_name")?,
        folder_hash: row.try_get("folder_hash")?,
        original_file_name: row.try_get("original_file_name")?,
        mime_type: row.try_get("mime_type")?,
        relative_path: row.try_get("relative_path")?,
        extension: row.try_get("extension")?,
        title: row.try_get("title")?,
        year: row
            .try_get::<Option<i64>, _>("year")?
            .and_then(|y| u16::try_from(y).ok()),
        season: row
            .try_get::<Option<i64>, _>("season")?
            .and_then(|s| u32::try_from(s).ok()),
        episodes: split_episodes(&episodes)?,
        metadata_link: row.try_get("metadata_link")?,
        image: row.try_get("image")?,
        backdrop: row.try_get("backdrop")?,
        extra,
    })
}
