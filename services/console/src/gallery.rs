use crate::error::{Error, Result};
use crate::media::{AssetUpdate, MediaAsset, MediaKind};
use crate::metadata_store::AssetRepository;
use crate::normalizer::Normalizer;
use crate::partitioner::{self, PrivacyPartitioner};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Upload parameters
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub owner_id: Uuid,
    pub kind: MediaKind,
    pub file: Bytes,
    pub content_type: String,
    pub keywords: String,
    pub is_private: bool,
}

/// Upload, update, delete and list media assets. A record is only inserted
/// after every blob write succeeded, so failed uploads never show up in a
/// listing.
#[derive(Clone)]
pub struct GalleryService {
    normalizer: Normalizer,
    partitioner: PrivacyPartitioner,
    assets: Arc<dyn AssetRepository>,
}

impl GalleryService {
    pub fn new(
        normalizer: Normalizer,
        partitioner: PrivacyPartitioner,
        assets: Arc<dyn AssetRepository>,
    ) -> Self {
        Self {
            normalizer,
            partitioner,
            assets,
        }
    }

    /// Normalize, partition and record a new asset
    #[instrument(
        skip(self, upload),
        fields(owner_id = %upload.owner_id, kind = %upload.kind, is_private = upload.is_private)
    )]
    pub async fn upload_asset(&self, upload: NewAsset) -> Result<MediaAsset> {
        let NewAsset {
            owner_id,
            kind,
            file,
            content_type,
            keywords,
            is_private,
        } = upload;

        let normalizer = self.normalizer.clone();
        let normalized =
            tokio::task::spawn_blocking(move || normalizer.normalize(file, &content_type, kind))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;

        let stored = self
            .partitioner
            .store(owner_id, &normalized, is_private)
            .await?;

        let asset = MediaAsset {
            id: stored.id,
            owner_id,
            kind,
            storage_path: stored.storage_path,
            private_storage_path: stored.private_storage_path,
            is_private,
            keywords,
            content_type: normalized.content_type,
            size_bytes: normalized.bytes.len() as i64,
            created_at: Utc::now(),
        };

        if let Err(e) = self.assets.insert_asset(&asset).await {
            if let Err(cleanup) = self.partitioner.remove(&asset).await {
                warn!(asset_id = %asset.id, error = %cleanup, "Blobs of unrecorded asset left for the sweep");
            }
            return Err(e);
        }

        metrics::counter!("console.assets.uploaded", "kind" => kind.as_str()).increment(1);
        info!(
            asset_id = %asset.id,
            size_bytes = asset.size_bytes,
            reencoded = normalized.reencoded,
            "Asset uploaded"
        );

        Ok(asset)
    }

    /// Change keywords and/or privacy of an asset
    #[instrument(skip(self, update))]
    pub async fn update_asset(&self, id: Uuid, update: AssetUpdate) -> Result<MediaAsset> {
        let previous = self.get_asset(id).await?;
        let mut asset = previous.clone();

        if let Some(keywords) = update.keywords {
            asset.keywords = keywords;
        }

        let mut superseded = Vec::new();
        match update.is_private {
            Some(is_private) if is_private != asset.is_private => {
                let transition = if is_private {
                    self.partitioner.make_private(&asset).await?
                } else {
                    self.partitioner.make_public(&asset).await?
                };

                asset.storage_path = transition.renditions.storage_path;
                asset.private_storage_path = transition.renditions.private_storage_path;
                asset.is_private = is_private;
                superseded = transition.superseded;
            }
            _ => {}
        }

        if let Err(e) = self.assets.update_asset(&asset).await {
            // The record still describes the old layout, so every blob written
            // for the new one goes
            let kept = partitioner::locations(&previous);
            let written: Vec<_> = partitioner::locations(&asset)
                .into_iter()
                .filter(|location| !kept.contains(location))
                .collect();

            if let Err(cleanup) = self.partitioner.discard(&written).await {
                error!(asset_id = %id, error = %cleanup, "New renditions of unrecorded toggle not discarded");
            }
            return Err(e);
        }

        // Old renditions are unreferenced now; the sweep collects any we miss
        if let Err(e) = self.partitioner.discard(&superseded).await {
            warn!(asset_id = %id, error = %e, "Superseded rendition not discarded");
        }

        Ok(asset)
    }

    /// Remove the record and then both storage locations. Blobs that fail to
    /// delete are unreferenced from then on and left for the orphan sweep.
    #[instrument(skip(self))]
    pub async fn delete_asset(&self, id: Uuid) -> Result<()> {
        let asset = self.get_asset(id).await?;

        if !self.assets.delete_asset(id).await? {
            return Err(Error::asset_not_found(id));
        }

        if let Err(e) = self.partitioner.remove(&asset).await {
            warn!(asset_id = %id, error = %e, "Blobs of deleted asset left for the sweep");
        }

        info!(asset_id = %id, "Asset deleted");
        Ok(())
    }

    pub async fn get_asset(&self, id: Uuid) -> Result<MediaAsset> {
        self.assets
            .get_asset(id)
            .await?
            .ok_or_else(|| Error::asset_not_found(id))
    }

    pub async fn list_assets(&self, owner_id: Uuid) -> Result<Vec<MediaAsset>> {
        self.assets.list_assets(owner_id).await
    }

    /// Safe-to-expose URL of an asset; `None` for private videos
    pub fn display_url(&self, asset: &MediaAsset) -> Option<String> {
        self.partitioner.display_url(asset)
    }

    /// Metadata store liveness
    pub async fn ping(&self) -> Result<()> {
        self.assets.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMetadataStore, MemoryObjectStore};
    use crate::normalizer::tests::synth_image;
    use crate::object_store::{MockObjectStore, Partition, StoreError};
    use crate::partitioner::PrivacySettings;
    use image::{GenericImageView, ImageOutputFormat};

    struct Fixture {
        gallery: GalleryService,
        store: Arc<MemoryObjectStore>,
        metadata: Arc<MemoryMetadataStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let gallery = GalleryService::new(
            Normalizer::default(),
            PrivacyPartitioner::new(store.clone(), PrivacySettings::default()),
            metadata.clone(),
        );
        Fixture {
            gallery,
            store,
            metadata,
        }
    }

    fn photo_upload(owner_id: Uuid, file: Vec<u8>, content_type: &str, is_private: bool) -> NewAsset {
        NewAsset {
            owner_id,
            kind: MediaKind::Photo,
            file: Bytes::from(file),
            content_type: content_type.to_string(),
            keywords: "beach sunset".to_string(),
            is_private,
        }
    }

    #[tokio::test]
    async fn test_large_private_photo_upload() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let input = synth_image(3000, 2000, ImageOutputFormat::Bmp);
        assert!(input.len() > 2 * 1024 * 1024);

        let asset = f
            .gallery
            .upload_asset(photo_upload(owner, input, "image/bmp", true))
            .await
            .unwrap();

        assert!(asset.is_private);
        assert!(asset.partition_invariant_holds());
        let private_path = asset.private_storage_path.clone().unwrap();
        assert_ne!(asset.storage_path, private_path);
        assert!(asset.storage_path.contains(&asset.id.to_string()));
        assert!(private_path.contains(&asset.id.to_string()));

        let original = f.store.object(Partition::Private, &private_path).unwrap();
        let original = image::load_from_memory(&original).unwrap();
        assert_eq!(original.dimensions(), (1200, 800));

        let blurred = f.store.object(Partition::Public, &asset.storage_path).unwrap();
        let blurred = image::load_from_memory(&blurred).unwrap();
        assert_eq!(blurred.dimensions(), (1200, 800));

        assert!(!f.store.contains(Partition::Public, &private_path));
    }

    #[tokio::test]
    async fn test_small_public_photo_upload() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let input = synth_image(200, 200, ImageOutputFormat::Png);

        let asset = f
            .gallery
            .upload_asset(photo_upload(owner, input.clone(), "image/png", false))
            .await
            .unwrap();

        assert!(!asset.is_private);
        assert_eq!(asset.private_storage_path, None);
        assert_eq!(
            f.store.object(Partition::Public, &asset.storage_path).unwrap().as_ref(),
            input.as_slice()
        );
        assert_eq!(f.store.count(Partition::Public), 1);
        assert_eq!(f.store.count(Partition::Private), 0);
        assert_eq!(
            f.gallery.display_url(&asset),
            Some(format!("memory://public/{}", asset.storage_path))
        );
    }

    #[tokio::test]
    async fn test_wrong_media_family_rejected() {
        let f = fixture();
        let upload = NewAsset {
            owner_id: Uuid::new_v4(),
            kind: MediaKind::Video,
            file: Bytes::from_static(b"not a video"),
            content_type: "image/png".to_string(),
            keywords: String::new(),
            is_private: false,
        };

        let err = f.gallery.upload_asset(upload).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMediaType { .. }));
        assert_eq!(f.metadata.asset_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_not_listed() {
        let f = fixture();
        let owner = Uuid::new_v4();
        f.store.fail_writes_to(Partition::Public);

        let err = f
            .gallery
            .upload_asset(photo_upload(
                owner,
                synth_image(64, 64, ImageOutputFormat::Png),
                "image/png",
                true,
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PartialUploadFailure { .. }));
        assert!(f.gallery.list_assets(owner).await.unwrap().is_empty());
        // The private original is an orphan until the sweep runs
        assert_eq!(f.store.count(Partition::Private), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_blobs_and_record() {
        let f = fixture();
        let owner = Uuid::new_v4();

        let asset = f
            .gallery
            .upload_asset(photo_upload(
                owner,
                synth_image(64, 64, ImageOutputFormat::Png),
                "image/png",
                true,
            ))
            .await
            .unwrap();
        assert_eq!(f.store.count(Partition::Public), 1);
        assert_eq!(f.store.count(Partition::Private), 1);

        f.gallery.delete_asset(asset.id).await.unwrap();

        assert_eq!(f.store.count(Partition::Public), 0);
        assert_eq!(f.store.count(Partition::Private), 0);
        assert!(f.gallery.list_assets(owner).await.unwrap().is_empty());

        let err = f.gallery.delete_asset(asset.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_privacy_toggle_preserves_invariant() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let input = synth_image(120, 90, ImageOutputFormat::Png);

        let asset = f
            .gallery
            .upload_asset(photo_upload(owner, input.clone(), "image/png", false))
            .await
            .unwrap();

        let private = f
            .gallery
            .update_asset(
                asset.id,
                AssetUpdate {
                    is_private: Some(true),
                    keywords: Some("hidden".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(private.is_private);
        assert!(private.partition_invariant_holds());
        assert_eq!(private.keywords, "hidden");
        assert_eq!(private.id, asset.id);
        assert_eq!(f.store.count(Partition::Public), 1);
        assert_eq!(f.store.count(Partition::Private), 1);
        assert!(!f.store.contains(Partition::Public, &asset.storage_path));

        let public = f
            .gallery
            .update_asset(
                asset.id,
                AssetUpdate {
                    is_private: Some(false),
                    keywords: None,
                },
            )
            .await
            .unwrap();
        assert!(!public.is_private);
        assert!(public.partition_invariant_holds());
        assert_eq!(public.keywords, "hidden");
        assert_eq!(f.store.count(Partition::Public), 1);
        assert_eq!(f.store.count(Partition::Private), 0);
        assert_eq!(
            f.store.object(Partition::Public, &public.storage_path).unwrap().as_ref(),
            input.as_slice()
        );

        let stored = f.gallery.get_asset(asset.id).await.unwrap();
        assert_eq!(stored.storage_path, public.storage_path);
    }

    #[tokio::test]
    async fn test_keyword_update_leaves_blobs_alone() {
        let f = fixture();
        let asset = f
            .gallery
            .upload_asset(photo_upload(
                Uuid::new_v4(),
                synth_image(32, 32, ImageOutputFormat::Png),
                "image/png",
                false,
            ))
            .await
            .unwrap();

        let updated = f
            .gallery
            .update_asset(
                asset.id,
                AssetUpdate {
                    is_private: Some(false),
                    keywords: Some("red dress".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.keywords, "red dress");
        assert_eq!(updated.storage_path, asset.storage_path);
        assert_eq!(f.store.count(Partition::Public), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_asset() {
        let f = fixture();
        let err = f
            .gallery
            .update_asset(Uuid::new_v4(), AssetUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "asset", .. }));
    }

    #[tokio::test]
    async fn test_private_video_has_no_display_url() {
        let f = fixture();
        let upload = NewAsset {
            owner_id: Uuid::new_v4(),
            kind: MediaKind::Video,
            file: Bytes::from(vec![0u8; 4096]),
            content_type: "video/mp4".to_string(),
            keywords: String::new(),
            is_private: true,
        };

        let asset = f.gallery.upload_asset(upload).await.unwrap();
        assert!(asset.partition_invariant_holds());
        assert_eq!(f.gallery.display_url(&asset), None);
        assert_eq!(f.store.count(Partition::Public), 0);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        for who in [owner, owner, other] {
            f.gallery
                .upload_asset(photo_upload(
                    who,
                    synth_image(16, 16, ImageOutputFormat::Png),
                    "image/png",
                    false,
                ))
                .await
                .unwrap();
        }

        assert_eq!(f.gallery.list_assets(owner).await.unwrap().len(), 2);
        assert_eq!(f.gallery.list_assets(other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_record_update_removes_public_original() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let asset = f
            .gallery
            .upload_asset(photo_upload(
                owner,
                synth_image(64, 64, ImageOutputFormat::Png),
                "image/png",
                true,
            ))
            .await
            .unwrap();
        let private_path = asset.private_storage_path.clone().unwrap();

        f.metadata.fail_asset_updates();
        let err = f
            .gallery
            .update_asset(
                asset.id,
                AssetUpdate {
                    is_private: Some(false),
                    keywords: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let stored = f.gallery.get_asset(asset.id).await.unwrap();
        assert!(stored.is_private);

        // Only the blurred copy is public; the original stays private
        assert!(!f.store.contains(Partition::Public, &private_path));
        assert_eq!(f.store.count(Partition::Public), 1);
        assert!(f.store.contains(Partition::Public, &asset.storage_path));
        assert!(f.store.contains(Partition::Private, &private_path));
    }

    #[tokio::test]
    async fn test_failed_record_update_removes_new_private_renditions() {
        let f = fixture();
        let asset = f
            .gallery
            .upload_asset(photo_upload(
                Uuid::new_v4(),
                synth_image(64, 64, ImageOutputFormat::Png),
                "image/png",
                false,
            ))
            .await
            .unwrap();

        f.metadata.fail_asset_updates();
        assert!(f
            .gallery
            .update_asset(
                asset.id,
                AssetUpdate {
                    is_private: Some(true),
                    keywords: None,
                },
            )
            .await
            .is_err());

        let stored = f.gallery.get_asset(asset.id).await.unwrap();
        assert_eq!(stored, asset);
        assert_eq!(f.store.count(Partition::Private), 0);
        assert_eq!(f.store.count(Partition::Public), 1);
        assert!(f.store.contains(Partition::Public, &asset.storage_path));
    }

    #[tokio::test]
    async fn test_delete_with_failing_private_delete() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let owner = Uuid::new_v4();
        let id = Uuid::new_v4();
        let asset = MediaAsset {
            id,
            owner_id: owner,
            kind: MediaKind::Photo,
            storage_path: format!("photos/{owner}/{id}.blurred.jpg"),
            private_storage_path: Some(format!("photos/{owner}/{id}.png")),
            is_private: true,
            keywords: String::new(),
            content_type: "image/png".to_string(),
            size_bytes: 10,
            created_at: Utc::now(),
        };
        metadata.insert_asset(&asset).await.unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_delete()
            .withf(|partition, _| *partition == Partition::Public)
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_delete()
            .withf(|partition, _| *partition == Partition::Private)
            .times(1)
            .returning(|_, _| Err(StoreError::Backend("bucket unavailable".to_string())));

        let gallery = GalleryService::new(
            Normalizer::default(),
            PrivacyPartitioner::new(Arc::new(store), PrivacySettings::default()),
            metadata.clone(),
        );

        gallery.delete_asset(id).await.unwrap();

        // No record is left pointing at a half-deleted asset
        assert_eq!(metadata.asset_count(), 0);
        assert!(gallery.list_assets(owner).await.unwrap().is_empty());
    }
}
