use crate::config::ObjectStoreConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Logically separate storage areas for blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Servable renditions, reachable through public URLs
    Public,
    /// Unobfuscated originals of private assets, never exposed
    Private,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Public => "public",
            Partition::Private => "private",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listed object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Backend(String),
}

/// Blob storage split into a public and a private partition
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a blob, returning its URL
    async fn put(
        &self,
        partition: Partition,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StoreError>;

    /// Read a blob back
    async fn get(&self, partition: Partition, path: &str) -> Result<Bytes, StoreError>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, partition: Partition, path: &str) -> Result<(), StoreError>;

    /// List blobs under a prefix
    async fn list(&self, partition: Partition, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;

    /// URL a blob is reachable at
    fn public_url(&self, partition: Partition, path: &str) -> String;
}

/// S3-backed object store with one bucket per partition
pub struct S3ObjectStore {
    client: S3Client,
    config: ObjectStoreConfig,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &ObjectStoreConfig) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            public_bucket = %config.public_bucket,
            private_bucket = %config.private_bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn bucket(&self, partition: Partition) -> &str {
        match partition {
            Partition::Public => &self.config.public_bucket,
            Partition::Private => &self.config.private_bucket,
        }
    }

    /// Simple single-part upload for small blobs
    async fn simple_upload(
        &self,
        partition: Partition,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(self.bucket(partition))
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .metadata("partition", partition.as_str())
            .send()
            .await
            .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    /// Multipart upload for large blobs
    async fn multipart_upload(
        &self,
        partition: Partition,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let bucket = self.bucket(partition);

        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(path)
            .content_type(content_type)
            .metadata("partition", partition.as_str())
            .send()
            .await
            .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::Backend("No upload ID in response".to_string()))?
            .to_string();

        let result = self
            .upload_parts(bucket, path, &upload_id, &bytes)
            .await;

        // In-progress uploads are invisible to listings, so the sweep never sees them
        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(path)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    %partition,
                    path = %path,
                    upload_id = %upload_id,
                    error = %DisplayErrorContext(&e),
                    "Failed to abort multipart upload"
                );
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        path: &str,
        upload_id: &str,
        bytes: &Bytes,
    ) -> Result<(), StoreError> {
        let mut completed_parts = Vec::new();
        let part_size = self.config.part_size_bytes.max(1);

        for (index, chunk) in bytes.chunks(part_size).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(bytes.slice_ref(chunk)))
                .send()
                .await
                .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

            completed_parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(path)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put(
        &self,
        partition: Partition,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let size = bytes.len();

        if size > self.config.multipart_threshold_bytes {
            self.multipart_upload(partition, path, bytes, content_type)
                .await?;
        } else {
            self.simple_upload(partition, path, bytes, content_type)
                .await?;
        }

        debug!(%partition, path = %path, size_bytes = size, "Blob uploaded");

        Ok(self.public_url(partition, path))
    }

    #[instrument(skip(self))]
    async fn get(&self, partition: Partition, path: &str) -> Result<Bytes, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(self.bucket(partition))
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(path.to_string())
                } else {
                    StoreError::Backend(DisplayErrorContext(&e).to_string())
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(body.into_bytes())
    }

    #[instrument(skip(self))]
    async fn delete(&self, partition: Partition, path: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(self.bucket(partition))
            .key(path)
            .send()
            .await
            .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

        debug!(%partition, path = %path, "Blob deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, partition: Partition, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(self.bucket(partition))
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                obj.key().map(|key| ObjectInfo {
                    key: key.to_string(),
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    fn public_url(&self, partition: Partition, path: &str) -> String {
        match (partition, &self.config.public_base_url) {
            (Partition::Public, Some(base)) => {
                format!("{}/{}", base.trim_end_matches('/'), path)
            }
            _ => match &self.config.endpoint_url {
                Some(endpoint) => format!(
                    "{}/{}/{}",
                    endpoint.trim_end_matches('/'),
                    self.bucket(partition),
                    path
                ),
                None => format!(
                    "https://{}.s3.{}.amazonaws.com/{}",
                    self.bucket(partition),
                    self.config.region,
                    path
                ),
            },
        }
    }
}
