use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use common::meta::join_root;
use common::{Category, MetaRecord};

use crate::database::{LinkRecord, LinkStore};

use super::LinkPolicy;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub removed: usize,
    /// Links left alone because they already exist
    pub kept: usize,
    pub failed: usize,
}

/// Keeps the mirror tree in line with the catalog.
///
/// Each link at a record's `symlink_path` points at `{mount_path}{real_path}`.
pub struct LinkReconciler {
    policy: LinkPolicy,
    mount_path: PathBuf,
    store: Arc<dyn LinkStore>,
}

impl LinkReconciler {
    pub fn new(policy: LinkPolicy, mount_path: impl Into<PathBuf>, store: Arc<dyn LinkStore>) -> Self {
        Self {
            policy,
            mount_path: mount_path.into(),
            store,
        }
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn LinkStore> {
        &self.store
    }

    /// Diff `previous` against `current` and update the mirror tree.
    ///
    /// Links of items missing from `current` are removed. Links of current
    /// records are created unless the policy allows reusing one already in
    /// `existing`. Filesystem and store failures are logged and counted.
    pub async fn reconcile(
        &self,
        previous: &[MetaRecord],
        current: &[MetaRecord],
        existing: &[LinkRecord],
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let claimed: HashSet<&str> = current
            .iter()
            .filter_map(|r| r.symlink_path.as_deref())
            .collect();
        let released = self
            .remove_vanished(previous, current, &claimed, &mut report)
            .await;

        // Paths released by vanished items must be relinked even when a
        // current record reuses them.
        let known: HashSet<&str> = existing
            .iter()
            .map(|l| l.symlink_path.as_str())
            .filter(|path| !released.contains(*path))
            .collect();
        for record in current {
            let Some(symlink_path) = record.symlink_path.as_deref() else {
                continue;
            };
            if self.policy != LinkPolicy::Always && known.contains(symlink_path) {
                report.kept += 1;
                continue;
            }

            match self.create(record, symlink_path).await {
                Ok(()) => report.created += 1,
                Err(err) => {
                    tracing::warn!(path = %symlink_path, "failed to create link: {}", err);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            created = report.created,
            removed = report.removed,
            kept = report.kept,
            failed = report.failed,
            policy = %self.policy,
            "reconciled mirror links"
        );
        report
    }

    /// Forget the links of items missing from `current`. Returns every path
    /// they held; paths still claimed by a current record stay on disk.
    async fn remove_vanished(
        &self,
        previous: &[MetaRecord],
        current: &[MetaRecord],
        claimed: &HashSet<&str>,
        report: &mut ReconcileReport,
    ) -> BTreeSet<String> {
        let live: HashSet<(Category, u64)> = current.iter().map(MetaRecord::item_key).collect();

        let mut removed: BTreeMap<Category, BTreeSet<u64>> = BTreeMap::new();
        let mut paths: BTreeSet<String> = BTreeSet::new();
        for record in previous {
            if live.contains(&record.item_key()) {
                continue;
            }
            removed.entry(record.category).or_default().insert(record.item_id);
            if let Some(path) = &record.symlink_path {
                paths.insert(path.clone());
            }
        }

        for (category, items) in removed {
            let items: Vec<u64> = items.into_iter().collect();
            tracing::debug!(%category, count = items.len(), "items left the catalog");
            match self.store.delete_links_for_items(category, &items).await {
                Ok(links) => paths.extend(links.into_iter().map(|l| l.symlink_path)),
                Err(err) => {
                    tracing::warn!(%category, "failed to delete link records: {}", err);
                    report.failed += 1;
                }
            }
        }

        for path in &paths {
            if claimed.contains(path.as_str()) {
                tracing::debug!(%path, "link path reused by a current file");
                continue;
            }
            match remove_link(Path::new(path)).await {
                Ok(true) => {
                    tracing::debug!(%path, "removed link");
                    report.removed += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%path, "failed to remove link: {}", err);
                    report.failed += 1;
                }
            }
        }
        paths
    }

    async fn create(&self, record: &MetaRecord, symlink_path: &str) -> anyhow::Result<()> {
        let link = Path::new(symlink_path);
        let target = join_root(&self.mount_path.to_string_lossy(), &record.real_path);

        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Replace whatever occupies the location, dangling links included.
        if tokio::fs::symlink_metadata(link).await.is_ok() {
            tokio::fs::remove_file(link).await?;
        }
        symlink(&target, link).await?;
        tracing::debug!(%target, link = %symlink_path, "created link");

        self.store
            .insert_link(&LinkRecord {
                symlink_path: symlink_path.to_string(),
                real_path: target,
                category: record.category,
                item_id: record.item_id,
                file_id: record.file_id,
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;
        Ok(())
    }
}

/// Remove a link if present. Returns whether anything was removed.
async fn remove_link(path: &Path) -> io::Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(io::Error::other("refusing to remove a directory")),
        Ok(_) => tokio::fs::remove_file(path).await.map(|()| true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
async fn symlink(target: &str, link: &Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(_target: &str, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are only supported on unix",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use common::IndexLayout;

    use crate::database::Database;

    fn record(item_id: u64, mirror: &Path) -> MetaRecord {
        named(item_id, &format!("Movie {}", item_id), mirror)
    }

    fn named(item_id: u64, name: &str, mirror: &Path) -> MetaRecord {
        let mut record: MetaRecord = serde_json::from_value(serde_json::json!({
            "item_id": item_id,
            "file_id": 0,
            "category": "torrents",
            "media_type": "movie",
            "root_folder_name": name,
            "file_name": format!("{}.mkv", name),
            "file_size": 100,
            "download_link_template": "",
            "real_path": "",
        }))
        .unwrap();
        record.assign_paths(&IndexLayout::default(), Some(mirror.to_string_lossy().as_ref()));
        record
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        mirror: PathBuf,
        db: Arc<Database>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        let db = Arc::new(Database::in_memory().await.unwrap());
        Fixture {
            _dir: dir,
            mirror,
            db,
        }
    }

    fn link_of(record: &MetaRecord) -> PathBuf {
        PathBuf::from(record.symlink_path.as_ref().unwrap())
    }

    #[tokio::test]
    async fn test_only_vanished_items_are_unlinked() {
        let f = fixture().await;
        let reconciler = LinkReconciler::new(LinkPolicy::Once, "/mnt/tmc", f.db.clone());
        let previous: Vec<MetaRecord> = [1, 2, 3].map(|id| record(id, &f.mirror)).to_vec();

        let first = reconciler.reconcile(&[], &previous, &[]).await;
        assert_eq!(first.created, 3);
        let target = tokio::fs::read_link(link_of(&previous[0])).await.unwrap();
        assert_eq!(target, PathBuf::from("/mnt/tmc/movies/Movie 1/Movie 1.mkv"));

        let current = vec![previous[0].clone(), previous[2].clone()];
        let existing = f.db.list_links().await.unwrap();
        let report = reconciler.reconcile(&previous, &current, &existing).await;

        assert_eq!(report.removed, 1);
        assert_eq!(report.created, 0);
        assert_eq!(report.kept, 2);
        assert!(tokio::fs::symlink_metadata(link_of(&previous[1])).await.is_err());
        assert!(tokio::fs::symlink_metadata(link_of(&previous[0])).await.is_ok());
        assert!(tokio::fs::symlink_metadata(link_of(&previous[2])).await.is_ok());

        let remaining = f.db.list_links().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|l| l.item_id != 2));
    }

    #[tokio::test]
    async fn test_readded_item_keeps_its_link() {
        let f = fixture().await;
        let reconciler = LinkReconciler::new(LinkPolicy::Once, "/mnt/tmc", f.db.clone());
        let previous = vec![named(1, "Foo (2024)", &f.mirror)];
        reconciler.reconcile(&[], &previous, &[]).await;

        // Same title, new catalog id.
        let current = vec![named(9, "Foo (2024)", &f.mirror)];
        assert_eq!(current[0].symlink_path, previous[0].symlink_path);
        let existing = f.db.list_links().await.unwrap();
        let report = reconciler.reconcile(&previous, &current, &existing).await;

        assert_eq!(report.created, 1);
        assert_eq!(report.kept, 0);
        assert_eq!(report.removed, 0);
        let link = link_of(&current[0]);
        assert!(tokio::fs::symlink_metadata(&link).await.unwrap().file_type().is_symlink());

        let links = f.db.list_links().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].item_id, 9);
    }

    #[tokio::test]
    async fn test_always_policy_recreates_links() {
        let f = fixture().await;
        let reconciler = LinkReconciler::new(LinkPolicy::Always, "/mnt/tmc", f.db.clone());
        let current = vec![record(1, &f.mirror)];

        reconciler.reconcile(&[], &current, &[]).await;
        let existing = f.db.list_links().await.unwrap();
        let report = reconciler.reconcile(&current, &current, &existing).await;

        assert_eq!(report.created, 1);
        assert_eq!(report.kept, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_stale_file_at_link_location_is_replaced() {
        let f = fixture().await;
        let reconciler = LinkReconciler::new(LinkPolicy::Spawn, "/mnt/tmc", f.db.clone());
        let current = vec![record(1, &f.mirror)];
        let link = link_of(&current[0]);

        tokio::fs::create_dir_all(link.parent().unwrap()).await.unwrap();
        tokio::fs::write(&link, b"stale").await.unwrap();

        let report = reconciler.reconcile(&[], &current, &[]).await;

        assert_eq!(report.created, 1);
        let meta = tokio::fs::symlink_metadata(&link).await.unwrap();
        assert!(meta.file_type().is_symlink());
        assert!(f.db.get_link(&link.to_string_lossy()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_records_without_mirror_path_are_ignored() {
        let f = fixture().await;
        let reconciler = LinkReconciler::new(LinkPolicy::Once, "/mnt/tmc", f.db.clone());
        let mut unmirrored = record(1, &f.mirror);
        unmirrored.symlink_path = None;

        let report = reconciler.reconcile(&[], &[unmirrored], &[]).await;
        assert_eq!(report, ReconcileReport::default());
    }
}
