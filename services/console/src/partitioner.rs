use crate::config::PrivacyConfig;
use crate::error::{Error, Result};
use crate::media::{self, MediaAsset, MediaKind};
use crate::normalizer::{encode_jpeg, NormalizedMedia, NORMALIZED_CONTENT_TYPE};
use crate::object_store::{ObjectStore, Partition, StoreError};
use bytes::Bytes;
use image::imageops::FilterType;
use image::GenericImageView;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Obfuscation settings
#[derive(Debug, Clone)]
pub struct PrivacySettings {
    pub blur_sigma: f32,
    pub blur_downscale: u32,
    pub jpeg_quality: u8,
}

impl PrivacySettings {
    pub fn new(config: &PrivacyConfig, jpeg_quality: u8) -> Self {
        Self {
            blur_sigma: config.blur_sigma,
            blur_downscale: config.blur_downscale,
            jpeg_quality,
        }
    }
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self::new(&PrivacyConfig::default(), 80)
    }
}

/// Storage locations of a freshly written asset
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRenditions {
    pub id: Uuid,
    /// Servable path in the public partition
    pub storage_path: String,
    /// Unobfuscated original in the private partition
    pub private_storage_path: Option<String>,
}

/// Result of a privacy toggle: the new locations plus blobs that are no
/// longer referenced once the record points at the new locations
#[derive(Debug, Clone)]
pub struct PrivacyTransition {
    pub renditions: StoredRenditions,
    pub superseded: Vec<(Partition, String)>,
}

/// Writes renditions to the right partitions. Public assets are written
/// once. Private photos keep the original in the private partition and a
/// blurred copy in the public one, both under the same id. Private videos
/// only exist in the private partition.
#[derive(Clone)]
pub struct PrivacyPartitioner {
    store: Arc<dyn ObjectStore>,
    settings: PrivacySettings,
}

impl PrivacyPartitioner {
    pub fn new(store: Arc<dyn ObjectStore>, settings: PrivacySettings) -> Self {
        Self { store, settings }
    }

    /// Store a normalized upload under a new shared id
    #[instrument(skip(self, media), fields(kind = %media.kind, size_bytes = media.bytes.len()))]
    pub async fn store(
        &self,
        owner_id: Uuid,
        media: &NormalizedMedia,
        is_private: bool,
    ) -> Result<StoredRenditions> {
        let id = Uuid::new_v4();
        let original_path = media::original_key(media.kind, owner_id, id, &media.content_type);

        if !is_private {
            self.write(Partition::Public, &original_path, media.bytes.clone(), &media.content_type)
                .await?;

            debug!(asset_id = %id, path = %original_path, "Public asset stored");
            return Ok(StoredRenditions {
                id,
                storage_path: original_path,
                private_storage_path: None,
            });
        }

        let storage_path = match media.kind {
            MediaKind::Photo => {
                let blurred_path = media::blurred_key(media.kind, owner_id, id);
                let blurred = self.obfuscate(media.bytes.clone()).await?;

                self.dual_write(
                    id,
                    (&original_path, media.bytes.clone(), &media.content_type),
                    (&blurred_path, blurred, NORMALIZED_CONTENT_TYPE),
                )
                .await?;
                blurred_path
            }
            MediaKind::Video => {
                self.write(Partition::Private, &original_path, media.bytes.clone(), &media.content_type)
                    .await?;
                media::withheld_key(media.kind, owner_id, id)
            }
        };

        debug!(asset_id = %id, storage_path = %storage_path, "Private asset stored");

        Ok(StoredRenditions {
            id,
            storage_path,
            private_storage_path: Some(original_path),
        })
    }

    /// Move a public asset behind the privacy wall
    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    pub async fn make_private(&self, asset: &MediaAsset) -> Result<PrivacyTransition> {
        let original = self.read(Partition::Public, &asset.storage_path).await?;
        let private_path =
            media::original_key(asset.kind, asset.owner_id, asset.id, &asset.content_type);

        let storage_path = match asset.kind {
            MediaKind::Photo => {
                let blurred_path = media::blurred_key(asset.kind, asset.owner_id, asset.id);
                let blurred = self.obfuscate(original.clone()).await?;

                self.dual_write(
                    asset.id,
                    (&private_path, original, &asset.content_type),
                    (&blurred_path, blurred, NORMALIZED_CONTENT_TYPE),
                )
                .await?;
                blurred_path
            }
            MediaKind::Video => {
                self.write(Partition::Private, &private_path, original, &asset.content_type)
                    .await?;
                media::withheld_key(asset.kind, asset.owner_id, asset.id)
            }
        };

        info!(storage_path = %storage_path, "Asset made private");

        Ok(PrivacyTransition {
            renditions: StoredRenditions {
                id: asset.id,
                storage_path,
                private_storage_path: Some(private_path),
            },
            superseded: vec![(Partition::Public, asset.storage_path.clone())],
        })
    }

    /// Promote a private asset's original to the public partition
    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    pub async fn make_public(&self, asset: &MediaAsset) -> Result<PrivacyTransition> {
        let private_path = asset.private_storage_path.as_deref().ok_or_else(|| {
            Error::InvalidRequest(format!("asset {} has no private original", asset.id))
        })?;

        let original = self.read(Partition::Private, private_path).await?;
        let public_path =
            media::original_key(asset.kind, asset.owner_id, asset.id, &asset.content_type);

        self.write(Partition::Public, &public_path, original, &asset.content_type)
            .await?;

        let mut superseded = vec![(Partition::Private, private_path.to_string())];
        if !media::is_withheld_key(&asset.storage_path) && asset.storage_path != public_path {
            superseded.push((Partition::Public, asset.storage_path.clone()));
        }

        info!(storage_path = %public_path, "Asset made public");

        Ok(PrivacyTransition {
            renditions: StoredRenditions {
                id: asset.id,
                storage_path: public_path,
                private_storage_path: None,
            },
            superseded,
        })
    }

    /// Delete blobs no record points at any more
    pub async fn discard(&self, blobs: &[(Partition, String)]) -> Result<()> {
        let mut first_error = None;

        for (partition, path) in blobs {
            if let Err(e) = self.store.delete(*partition, path).await {
                warn!(%partition, path = %path, error = %e, "Failed to discard blob");
                first_error.get_or_insert(Error::StorageWriteFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Delete every stored rendition of an asset
    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    pub async fn remove(&self, asset: &MediaAsset) -> Result<()> {
        self.discard(&locations(asset)).await
    }

    /// Public URL of the servable rendition. Private videos have none.
    pub fn display_url(&self, asset: &MediaAsset) -> Option<String> {
        if media::is_withheld_key(&asset.storage_path) {
            return None;
        }
        Some(self.store.public_url(Partition::Public, &asset.storage_path))
    }

    async fn write(
        &self,
        partition: Partition,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String> {
        self.store
            .put(partition, path, bytes, content_type)
            .await
            .map_err(|e| Error::StorageWriteFailure {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn read(&self, partition: Partition, path: &str) -> Result<Bytes> {
        self.store
            .get(partition, path)
            .await
            .map_err(|e| Error::StorageReadFailure {
                path: path.to_string(),
                reason: match e {
                    StoreError::NotFound(_) => format!("missing from {partition} partition"),
                    StoreError::Backend(reason) => reason,
                },
            })
    }

    /// Write the private original and the public rendition concurrently.
    /// Not transactional: when exactly one write lands the stray blob is left
    /// for the orphan sweep.
    async fn dual_write(
        &self,
        id: Uuid,
        private: (&str, Bytes, &str),
        public: (&str, Bytes, &str),
    ) -> Result<()> {
        let (private_path, private_bytes, private_type) = private;
        let (public_path, public_bytes, public_type) = public;

        let (private_result, public_result) = tokio::join!(
            self.store
                .put(Partition::Private, private_path, private_bytes, private_type),
            self.store
                .put(Partition::Public, public_path, public_bytes, public_type),
        );

        let (written, failed, error) = match (private_result, public_result) {
            (Ok(_), Ok(_)) => return Ok(()),
            (Err(e), Err(_)) => {
                return Err(Error::StorageWriteFailure {
                    path: private_path.to_string(),
                    reason: e.to_string(),
                })
            }
            (Ok(_), Err(e)) => (private_path, public_path, e),
            (Err(e), Ok(_)) => (public_path, private_path, e),
        };

        metrics::counter!("console.assets.partial_failures").increment(1);
        warn!(
            asset_id = %id,
            written = %written,
            failed = %failed,
            error = %error,
            "Dual write left an orphaned blob"
        );

        Err(Error::PartialUploadFailure {
            id,
            written: written.to_string(),
            failed: failed.to_string(),
            reason: error.to_string(),
        })
    }

    async fn obfuscate(&self, bytes: Bytes) -> Result<Bytes> {
        let settings = self.settings.clone();
        let blurred = tokio::task::spawn_blocking(move || obfuscate(&bytes, &settings))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        Ok(Bytes::from(blurred))
    }
}

/// Blobs an asset record references, by partition
pub fn locations(asset: &MediaAsset) -> Vec<(Partition, String)> {
    let mut blobs = Vec::with_capacity(2);
    if !media::is_withheld_key(&asset.storage_path) {
        blobs.push((Partition::Public, asset.storage_path.clone()));
    }
    if let Some(private_path) = &asset.private_storage_path {
        blobs.push((Partition::Private, private_path.clone()));
    }
    blobs
}

/// Produce a blurred JPEG of the same dimensions. The image is shrunk
/// before blurring so the cost stays flat for large inputs.
pub fn obfuscate(bytes: &[u8], settings: &PrivacySettings) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    let (width, height) = img.dimensions();
    let factor = settings.blur_downscale.max(1);

    let small = img.resize_exact(
        (width / factor).max(1),
        (height / factor).max(1),
        FilterType::Triangle,
    );
    let blurred = small
        .blur(settings.blur_sigma)
        .resize_exact(width, height, FilterType::Triangle);

    encode_jpeg(&blurred, settings.jpeg_quality)
}
