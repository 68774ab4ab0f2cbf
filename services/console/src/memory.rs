use crate::error::{Error, Result};
use crate::media::{MediaAsset, MediaKind};
use crate::metadata_store::{AssetRepository, LedgerEntry, LedgerRepository, RequestRepository};
use crate::object_store::{ObjectInfo, ObjectStore, Partition, StoreError};
use crate::triage::{FulfillmentRequest, RequestStatus, StatusCounts};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// Object store keeping blobs in a map, with write failures injectable
/// per partition
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(Partition, String), StoredObject>>,
    failing_partitions: RwLock<HashSet<Partition>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write to `partition` fail
    pub fn fail_writes_to(&self, partition: Partition) {
        self.failing_partitions.write().insert(partition);
    }

    /// Undo `fail_writes_to`
    pub fn heal(&self) {
        self.failing_partitions.write().clear();
    }

    pub fn object(&self, partition: Partition, path: &str) -> Option<Bytes> {
        self.objects
            .read()
            .get(&(partition, path.to_string()))
            .map(|o| o.bytes.clone())
    }

    pub fn content_type(&self, partition: Partition, path: &str) -> Option<String> {
        self.objects
            .read()
            .get(&(partition, path.to_string()))
            .map(|o| o.content_type.clone())
    }

    pub fn contains(&self, partition: Partition, path: &str) -> bool {
        self.objects
            .read()
            .contains_key(&(partition, path.to_string()))
    }

    /// Number of blobs in a partition
    pub fn count(&self, partition: Partition) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|(p, _)| *p == partition)
            .count()
    }

    /// Backdate a blob, e.g. to push it past the sweep grace period
    pub fn set_last_modified(&self, partition: Partition, path: &str, at: DateTime<Utc>) {
        if let Some(object) = self.objects.write().get_mut(&(partition, path.to_string())) {
            object.last_modified = at;
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        partition: Partition,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> std::result::Result<String, StoreError> {
        if self.failing_partitions.read().contains(&partition) {
            return Err(StoreError::Backend(format!(
                "injected write failure in {partition} partition"
            )));
        }

        self.objects.write().insert(
            (partition, path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );

        Ok(self.public_url(partition, path))
    }

    async fn get(&self, partition: Partition, path: &str) -> std::result::Result<Bytes, StoreError> {
        self.object(partition, path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn delete(&self, partition: Partition, path: &str) -> std::result::Result<(), StoreError> {
        self.objects.write().remove(&(partition, path.to_string()));
        Ok(())
    }

    async fn list(
        &self,
        partition: Partition,
        prefix: &str,
    ) -> std::result::Result<Vec<ObjectInfo>, StoreError> {
        let mut objects: Vec<ObjectInfo> = self
            .objects
            .read()
            .iter()
            .filter(|((p, key), _)| *p == partition && key.starts_with(prefix))
            .map(|((_, key), object)| ObjectInfo {
                key: key.clone(),
                last_modified: Some(object.last_modified),
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn public_url(&self, partition: Partition, path: &str) -> String {
        format!("memory://{partition}/{path}")
    }
}

/// Asset and request records kept in maps
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    assets: RwLock<HashMap<Uuid, MediaAsset>>,
    requests: RwLock<HashMap<(MediaKind, Uuid), FulfillmentRequest>>,
    failing_updates: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent asset update fail
    pub fn fail_asset_updates(&self) {
        self.failing_updates.store(true, Ordering::SeqCst);
    }

    pub fn asset_count(&self) -> usize {
        self.assets.read().len()
    }

    fn filtered_requests(&self, kind: MediaKind, include_closed: bool) -> Vec<FulfillmentRequest> {
        self.requests
            .read()
            .iter()
            .filter(|((k, _), r)| *k == kind && (include_closed || !r.status.is_closed()))
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl AssetRepository for MemoryMetadataStore {
    async fn insert_asset(&self, asset: &MediaAsset) -> Result<()> {
        self.assets.write().insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        Ok(self.assets.read().get(&id).cloned())
    }

    async fn update_asset(&self, asset: &MediaAsset) -> Result<()> {
        if self.failing_updates.load(Ordering::SeqCst) {
            return Err(Error::Internal(
                "injected asset update failure".to_string(),
            ));
        }

        let mut assets = self.assets.write();
        let existing = assets
            .get_mut(&asset.id)
            .ok_or_else(|| Error::asset_not_found(asset.id))?;
        *existing = asset.clone();
        Ok(())
    }

    async fn delete_asset(&self, id: Uuid) -> Result<bool> {
        Ok(self.assets.write().remove(&id).is_some())
    }

    async fn list_assets(&self, owner_id: Uuid) -> Result<Vec<MediaAsset>> {
        let mut assets: Vec<MediaAsset> = self
            .assets
            .read()
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(assets)
    }

    async fn assets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaAsset>> {
        let assets = self.assets.read();
        Ok(ids.iter().filter_map(|id| assets.get(id).cloned()).collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RequestRepository for MemoryMetadataStore {
    async fn insert_request(&self, kind: MediaKind, request: &FulfillmentRequest) -> Result<()> {
        self.requests
            .write()
            .insert((kind, request.id), request.clone());
        Ok(())
    }

    async fn get_request(&self, kind: MediaKind, id: Uuid) -> Result<Option<FulfillmentRequest>> {
        Ok(self.requests.read().get(&(kind, id)).cloned())
    }

    async fn count_requests(&self, kind: MediaKind, include_closed: bool) -> Result<i64> {
        Ok(self.filtered_requests(kind, include_closed).len() as i64)
    }

    async fn page_requests(
        &self,
        kind: MediaKind,
        include_closed: bool,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<FulfillmentRequest>> {
        let mut requests = self.filtered_requests(kind, include_closed);
        requests.sort_by_key(FulfillmentRequest::triage_key);

        Ok(requests
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_request_status(
        &self,
        kind: MediaKind,
        id: Uuid,
        status: RequestStatus,
        clear_resolved_url: bool,
    ) -> Result<Option<FulfillmentRequest>> {
        let mut requests = self.requests.write();
        Ok(requests.get_mut(&(kind, id)).map(|request| {
            request.status = status;
            if clear_resolved_url {
                request.resolved_asset_url = None;
            }
            request.clone()
        }))
    }

    async fn status_counts(&self, kind: MediaKind) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for request in self.filtered_requests(kind, true) {
            counts.add(request.status, 1);
        }
        Ok(counts)
    }
}

/// Ledger entries kept in a vector
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return it
    pub fn record(&self, user_id: Uuid, amount: i64, description: &str) -> LedgerEntry {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id,
            amount,
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.entries.write().push(entry.clone());
        entry
    }
}

#[async_trait]
impl LedgerRepository for MemoryLedger {
    async fn deductions(&self, marker: &str, user_id: Option<Uuid>) -> Result<Vec<LedgerEntry>> {
        let marker = marker.to_lowercase();
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.amount < 0)
            .filter(|e| e.description.to_lowercase().contains(&marker))
            .filter(|e| user_id.map_or(true, |user| e.user_id == user))
            .cloned()
            .collect())
    }
}
