use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use time::OffsetDateTime;

use common::Category;

use super::{Database, StoreError};

/// A mirror link created on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Location of the link in the mirror tree
    pub symlink_path: String,
    /// Target the link points at, inside the mount
    pub real_path: String,
    pub category: Category,
    pub item_id: u64,
    pub file_id: u64,
    pub created_at: OffsetDateTime,
}

/// Persistence for [`LinkRecord`]s
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Insert or replace the link at `symlink_path`.
    async fn insert_link(&self, link: &LinkRecord) -> Result<(), StoreError>;

    async fn list_links(&self) -> Result<Vec<LinkRecord>, StoreError>;

    async fn get_link(&self, symlink_path: &str) -> Result<Option<LinkRecord>, StoreError>;

    /// Delete the links of the given items and return what was deleted.
    async fn delete_links_for_items(
        &self,
        category: Category,
        item_ids: &[u64],
    ) -> Result<Vec<LinkRecord>, StoreError>;
}

#[async_trait]
impl LinkStore for Database {
    async fn insert_link(&self, link: &LinkRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO links (symlink_path, real_path, category, item_id, file_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (symlink_path) DO UPDATE SET
                real_path = excluded.real_path,
                category = excluded.category,
                item_id = excluded.item_id,
                file_id = excluded.file_id,
                created_at = excluded.created_at
            "#,
        )
        .bind(&link.symlink_path)
        .bind(&link.real_path)
        .bind(link.category.as_str())
        .bind(link.item_id as i64)
        .bind(link.file_id as i64)
        .bind(link.created_at.unix_timestamp())
        .execute(&**self)
        .await?;

        Ok(())
    }

    async fn list_links(&self) -> Result<Vec<LinkRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM links ORDER BY symlink_path")
            .fetch_all(&**self)
            .await?;

        rows.iter().map(row_to_link).collect()
    }

    async fn get_link(&self, symlink_path: &str) -> Result<Option<LinkRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM links WHERE symlink_path = ?1")
            .bind(symlink_path)
            .fetch_optional(&**self)
            .await?;

        row.as_ref().map(row_to_link).transpose()
    }

    async fn delete_links_for_items(
        &self,
        category: Category,
        item_ids: &[u64],
    ) -> Result<Vec<LinkRecord>, StoreError> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM links WHERE category = ");
        query.push_bind(category.as_str());
        query.push(" AND item_id IN (");
        let mut ids = query.separated(", ");
        for id in item_ids {
            ids.push_bind(*id as i64);
        }
        ids.push_unseparated(") RETURNING *");

        let rows = query.build().fetch_all(&**self).await?;
        rows.iter().map(row_to_link).collect()
    }
}

fn row_to_link(row: &SqliteRow) -> Result<LinkRecord, StoreError> {
    let category: String = row.try_get("category")?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(LinkRecord {
        symlink_path: row.try_get("symlink_path")?,
        real_path: row.try_get("real_path")?,
        category: category
            .parse::<Category>()
            .map_err(|_| StoreError::InvalidColumn {
                column: "category",
                value: category.clone(),
            })?,
        item_id: row.try_get::<i64, _>("item_id")? as u64,
        file_id: row.try_get::<i64, _>("file_id")? as u64,
        created_at: OffsetDateTime::from_unix_timestamp(created_at).map_err(|_| {
            StoreError::InvalidColumn {
                column: "created_at",
                value: created_at.to_string(),
            }
        })?,
    })
}
