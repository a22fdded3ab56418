use std::fmt;

use clap::Args;
use comfy_table::Table;

use common::{Category, MediaType, MetaRecord};
use tmc_daemon::database::{Database, DatabaseSetupError, MetadataStore, StoreError};
use tmc_daemon::state::{AppState, StateError};

/// List stored metadata records
#[derive(Args, Debug, Clone)]
pub struct Meta {
    /// Only records of this category (torrents, usenet, webdl)
    #[arg(long)]
    pub category: Option<Category>,

    /// Only records of this media type (movie, series, anime)
    #[arg(long)]
    pub media_type: Option<MediaType>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug)]
pub struct MetaOutput {
    pub records: Vec<MetaRecord>,
    pub json: bool,
}

impl fmt::Display for MetaOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.json {
            let json = serde_json::to_string_pretty(&self.records).map_err(|_| fmt::Error)?;
            return write!(f, "{}", json);
        }
        if self.records.is_empty() {
            return write!(f, "No records found");
        }

        let mut table = Table::new();
        table.set_header(vec!["CATEGORY", "ITEM", "FILE", "TYPE", "PATH", "SIZE"]);
        for record in &self.records {
            table.add_row(vec![
                record.category.to_string(),
                record.item_id.to_string(),
                record.file_id.to_string(),
                record.media_type.to_string(),
                record.real_path.clone(),
                format_size(record.file_size),
            ]);
        }
        write!(f, "{table}")
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Meta {
    type Error = MetaError;
    type Output = MetaOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let db = Database::new(&state.db_path).await?;

        let mut records = match (self.category, self.media_type) {
            (Some(category), media_type) => {
                let mut records = db.list_by_type(category).await?;
                if let Some(media_type) = media_type {
                    records.retain(|r| r.media_type == media_type);
                }
                records
            }
            (None, Some(media_type)) => db.list_by_media_type(media_type).await?,
            (None, None) => {
                let mut records = Vec::new();
                for category in Category::ALL {
                    records.extend(db.list_by_type(category).await?);
                }
                records
            }
        };
        records.sort_by(|a, b| a.real_path.cmp(&b.real_path));

        Ok(MetaOutput {
            records,
            json: self.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(20 * 1024 * 1024), "20.0 MiB");
    }
}
