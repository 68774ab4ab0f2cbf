use crate::error::{Error, Result};
use crate::media::{self, MediaKind};
use crate::metadata_store::AssetRepository;
use crate::object_store::{ObjectInfo, ObjectStore, Partition, StoreError};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Deletes in flight per partition
const DELETE_CONCURRENCY: usize = 8;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: u64,
    pub deleted: u64,
    pub skipped_recent: u64,
    pub failed: u64,
}

/// Deletes blobs no asset record references from the partition they live
/// in. Blobs younger than the grace period are skipped so in-flight uploads
/// and privacy toggles are not raced.
pub struct OrphanSweeper {
    store: Arc<dyn ObjectStore>,
    assets: Arc<dyn AssetRepository>,
    grace_period: Duration,
}

impl OrphanSweeper {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        assets: Arc<dyn AssetRepository>,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            assets,
            grace_period,
        }
    }

    /// Delete unreferenced blobs in both partitions
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for partition in [Partition::Public, Partition::Private] {
            self.sweep_partition(partition, &mut report).await?;
        }

        metrics::counter!("console.reconcile.deleted").increment(report.deleted);
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            skipped_recent = report.skipped_recent,
            failed = report.failed,
            "Orphan sweep finished"
        );

        Ok(report)
    }

    async fn sweep_partition(&self, partition: Partition, report: &mut SweepReport) -> Result<()> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.grace_period).unwrap_or(chrono::Duration::zero());

        let mut candidates: Vec<(Uuid, ObjectInfo)> = Vec::new();
        for kind in [MediaKind::Photo, MediaKind::Video] {
            let prefix = format!("{}/", kind.directory());
            let objects = self
                .store
                .list(partition, &prefix)
                .await
                .map_err(|e| Error::StorageReadFailure {
                    path: format!("{partition}:{prefix}"),
                    reason: e.to_string(),
                })?;

            for object in objects {
                report.scanned += 1;

                if object.last_modified.is_some_and(|at| at > cutoff) {
                    report.skipped_recent += 1;
                    continue;
                }

                // Keys we did not write are none of our business
                match media::asset_id_from_key(&object.key) {
                    Some(id) => candidates.push((id, object)),
                    None => debug!(key = %object.key, "Skipping foreign key"),
                }
            }
        }

        if candidates.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = candidates
            .iter()
            .map(|(id, _)| *id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let referenced: HashMap<Uuid, Option<String>> = self
            .assets
            .assets_by_ids(&ids)
            .await?
            .into_iter()
            .map(|asset| {
                let path = match partition {
                    Partition::Public => Some(asset.storage_path),
                    Partition::Private => asset.private_storage_path,
                };
                (asset.id, path)
            })
            .collect();

        let orphans: Vec<String> = candidates
            .into_iter()
            .filter(|(id, object)| {
                !referenced
                    .get(id)
                    .and_then(|path| path.as_deref())
                    .is_some_and(|path| path == object.key)
            })
            .map(|(_, object)| object.key)
            .collect();

        let results: Vec<(String, std::result::Result<(), StoreError>)> = stream::iter(orphans)
            .map(|key| async move {
                let result = self.store.delete(partition, &key).await;
                (key, result)
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(()) => {
                    report.deleted += 1;
                    info!(%partition, key = %key, "Orphaned blob deleted");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(%partition, key = %key, error = %e, "Failed to delete orphaned blob");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::{GalleryService, NewAsset};
    use crate::memory::{MemoryMetadataStore, MemoryObjectStore};
    use crate::normalizer::tests::synth_image;
    use crate::normalizer::Normalizer;
    use crate::partitioner::{PrivacyPartitioner, PrivacySettings};
    use bytes::Bytes;
    use image::ImageOutputFormat;

    struct Fixture {
        gallery: GalleryService,
        store: Arc<MemoryObjectStore>,
        sweeper: OrphanSweeper,
    }

    fn fixture(grace: Duration) -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let gallery = GalleryService::new(
            Normalizer::default(),
            PrivacyPartitioner::new(store.clone(), PrivacySettings::default()),
            metadata.clone(),
        );
        let sweeper = OrphanSweeper::new(store.clone(), metadata, grace);
        Fixture {
            gallery,
            store,
            sweeper,
        }
    }

    fn private_photo(owner_id: Uuid) -> NewAsset {
        NewAsset {
            owner_id,
            kind: MediaKind::Photo,
            file: Bytes::from(synth_image(32, 32, ImageOutputFormat::Png)),
            content_type: "image/png".to_string(),
            keywords: String::new(),
            is_private: true,
        }
    }

    fn backdate_all(store: &MemoryObjectStore, partition: Partition, keys: &[String]) {
        let past = Utc::now() - chrono::Duration::hours(2);
        for key in keys {
            store.set_last_modified(partition, key, past);
        }
    }

    async fn keys(store: &MemoryObjectStore, partition: Partition) -> Vec<String> {
        store
            .list(partition, "")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect()
    }

    #[tokio::test]
    async fn test_sweep_removes_partial_upload_orphan() {
        let f = fixture(Duration::from_secs(900));
        let owner = Uuid::new_v4();

        let kept = f.gallery.upload_asset(private_photo(owner)).await.unwrap();

        f.store.fail_writes_to(Partition::Public);
        assert!(f.gallery.upload_asset(private_photo(owner)).await.is_err());
        f.store.heal();

        let private_keys = keys(&f.store, Partition::Private).await;
        assert_eq!(private_keys.len(), 2);
        backdate_all(&f.store, Partition::Private, &private_keys);
        backdate_all(&f.store, Partition::Public, &keys(&f.store, Partition::Public).await);

        let report = f.sweeper.sweep().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            keys(&f.store, Partition::Private).await,
            vec![kept.private_storage_path.clone().unwrap()]
        );
        assert!(f.store.contains(Partition::Public, &kept.storage_path));
    }

    #[tokio::test]
    async fn test_sweep_skips_recent_blobs() {
        let f = fixture(Duration::from_secs(900));

        f.store.fail_writes_to(Partition::Private);
        assert!(f
            .gallery
            .upload_asset(private_photo(Uuid::new_v4()))
            .await
            .is_err());

        let report = f.sweeper.sweep().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped_recent, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(f.store.count(Partition::Public), 1);
    }

    #[tokio::test]
    async fn test_sweep_matches_partition_not_just_id() {
        let f = fixture(Duration::ZERO);
        let owner = Uuid::new_v4();
        let asset = f.gallery.upload_asset(private_photo(owner)).await.unwrap();

        // Private original mistakenly copied into the public partition
        let private_path = asset.private_storage_path.clone().unwrap();
        f.store
            .put(Partition::Public, &private_path, Bytes::from_static(b"leak"), "image/png")
            .await
            .unwrap();
        backdate_all(&f.store, Partition::Public, &keys(&f.store, Partition::Public).await);
        backdate_all(&f.store, Partition::Private, &keys(&f.store, Partition::Private).await);

        let report = f.sweeper.sweep().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(!f.store.contains(Partition::Public, &private_path));
        assert!(f.store.contains(Partition::Private, &private_path));
        assert!(f.store.contains(Partition::Public, &asset.storage_path));
    }

    #[tokio::test]
    async fn test_sweep_ignores_foreign_keys() {
        let f = fixture(Duration::ZERO);
        f.store
            .put(Partition::Public, "photos/readme.txt", Bytes::new(), "text/plain")
            .await
            .unwrap();
        f.store
            .put(Partition::Public, "exports/report.csv", Bytes::new(), "text/csv")
            .await
            .unwrap();
        backdate_all(
            &f.store,
            Partition::Public,
            &["photos/readme.txt".to_string(), "exports/report.csv".to_string()],
        );

        let report = f.sweeper.sweep().await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(f.store.count(Partition::Public), 2);
    }
}
