use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::media::{MediaAsset, MediaKind};
use crate::triage::{Chance, FulfillmentRequest, RequestStatus, StatusCounts};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Persistence for asset records
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn insert_asset(&self, asset: &MediaAsset) -> Result<()>;

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>>;

    /// Overwrite mutable fields and storage paths. Fails with `NotFound`
    /// when the record is gone.
    async fn update_asset(&self, asset: &MediaAsset) -> Result<()>;

    /// Returns whether a record was removed
    async fn delete_asset(&self, id: Uuid) -> Result<bool>;

    /// Assets of one owner, newest first
    async fn list_assets(&self, owner_id: Uuid) -> Result<Vec<MediaAsset>>;

    async fn assets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaAsset>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// Persistence for photo and video fulfillment requests
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert_request(&self, kind: MediaKind, request: &FulfillmentRequest) -> Result<()>;

    async fn get_request(&self, kind: MediaKind, id: Uuid) -> Result<Option<FulfillmentRequest>>;

    async fn count_requests(&self, kind: MediaKind, include_closed: bool) -> Result<i64>;

    /// One page in triage order
    async fn page_requests(
        &self,
        kind: MediaKind,
        include_closed: bool,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<FulfillmentRequest>>;

    /// Unconditionally set the status. Returns `None` when the id is unknown.
    async fn update_request_status(
        &self,
        kind: MediaKind,
        id: Uuid,
        status: RequestStatus,
        clear_resolved_url: bool,
    ) -> Result<Option<FulfillmentRequest>>;

    async fn status_counts(&self, kind: MediaKind) -> Result<StatusCounts>;
}

/// Read-only view over the balance ledger
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Negative entries whose description contains `marker`
    /// (case-insensitive), optionally for a single user
    async fn deductions(&self, marker: &str, user_id: Option<Uuid>) -> Result<Vec<LedgerEntry>>;
}

/// Balance ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Amount in minor units; deductions are negative
    pub amount: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AssetRow {
    id: Uuid,
    owner_id: Uuid,
    kind: String,
    storage_path: String,
    private_storage_path: Option<String>,
    is_private: bool,
    keywords: String,
    content_type: String,
    size_bytes: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<AssetRow> for MediaAsset {
    type Error = Error;

    fn try_from(row: AssetRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            kind: row.kind.parse().map_err(decode_error)?,
            storage_path: row.storage_path,
            private_storage_path: row.private_storage_path,
            is_private: row.is_private,
            keywords: row.keywords,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    chat_id: Uuid,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    status: String,
    chance: i16,
    message: String,
    resolved_asset_url: Option<String>,
}

impl TryFrom<RequestRow> for FulfillmentRequest {
    type Error = Error;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            chat_id: row.chat_id,
            user_id: row.user_id,
            created_at: row.created_at,
            status: row.status.parse().map_err(decode_error)?,
            chance: Chance::try_from(i64::from(row.chance))?,
            message: row.message,
            resolved_asset_url: row.resolved_asset_url,
        })
    }
}

fn decode_error(message: String) -> Error {
    Error::Metadata(sqlx::Error::Decode(message.into()))
}

const ASSET_COLUMNS: &str = "id, owner_id, kind, storage_path, private_storage_path, \
     is_private, keywords, content_type, size_bytes, created_at";

const REQUEST_COLUMNS: &str =
    "id, chat_id, user_id, created_at, status, chance, message, resolved_asset_url";

/// Table holding requests of one kind
fn request_table(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Photo => "photo_requests",
        MediaKind::Video => "video_requests",
    }
}

/// `ORDER BY` clause putting actionable statuses first, newest first within
/// a status
fn triage_order_sql() -> String {
    let arms: Vec<String> = RequestStatus::ALL
        .iter()
        .map(|s| format!("WHEN '{}' THEN {}", s.as_str(), s.priority()))
        .collect();

    format!(
        "ORDER BY CASE status {} ELSE {} END, created_at DESC, id",
        arms.join(" "),
        RequestStatus::ALL.len()
    )
}

/// SQL list of statuses that stay visible when closed requests are hidden
fn open_statuses_sql() -> String {
    let open: Vec<String> = RequestStatus::ALL
        .iter()
        .filter(|s| !s.is_closed())
        .map(|s| format!("'{}'", s.as_str()))
        .collect();
    open.join(", ")
}

/// Escape LIKE wildcards in a user-provided fragment
fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// PostgreSQL-backed metadata store for assets, requests and the ledger
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AssetRepository for MetadataStore {
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, owner_id = %asset.owner_id))]
    async fn insert_asset(&self, asset: &MediaAsset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO media_assets (
                id, owner_id, kind, storage_path, private_storage_path,
                is_private, keywords, content_type, size_bytes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(asset.id)
        .bind(asset.owner_id)
        .bind(asset.kind.as_str())
        .bind(&asset.storage_path)
        .bind(&asset.private_storage_path)
        .bind(asset.is_private)
        .bind(&asset.keywords)
        .bind(&asset.content_type)
        .bind(asset.size_bytes)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;

        debug!("Asset indexed");
        Ok(())
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MediaAsset::try_from).transpose()
    }

    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn update_asset(&self, asset: &MediaAsset) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE media_assets
            SET storage_path = $2,
                private_storage_path = $3,
                is_private = $4,
                keywords = $5,
                content_type = $6,
                size_bytes = $7
            WHERE id = $1
            "#,
        )
        .bind(asset.id)
        .bind(&asset.storage_path)
        .bind(&asset.private_storage_path)
        .bind(asset.is_private)
        .bind(&asset.keywords)
        .bind(&asset.content_type)
        .bind(asset.size_bytes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::asset_not_found(asset.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_asset(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media_assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_assets(&self, owner_id: Uuid) -> Result<Vec<MediaAsset>> {
        let rows = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets \
             WHERE owner_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaAsset::try_from).collect()
    }

    async fn assets_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MediaAsset>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaAsset::try_from).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestRepository for MetadataStore {
    #[instrument(skip(self, request), fields(request_id = %request.id))]
    async fn insert_request(&self, kind: MediaKind, request: &FulfillmentRequest) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} ({REQUEST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            request_table(kind)
        ))
        .bind(request.id)
        .bind(request.chat_id)
        .bind(request.user_id)
        .bind(request.created_at)
        .bind(request.status.as_str())
        .bind(i16::from(request.chance.value()))
        .bind(&request.message)
        .bind(&request.resolved_asset_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_request(&self, kind: MediaKind, id: Uuid) -> Result<Option<FulfillmentRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM {} WHERE id = $1",
            request_table(kind)
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FulfillmentRequest::try_from).transpose()
    }

    async fn count_requests(&self, kind: MediaKind, include_closed: bool) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE ($1 OR status IN ({}))",
            request_table(kind),
            open_statuses_sql()
        ))
        .bind(include_closed)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    #[instrument(skip(self))]
    async fn page_requests(
        &self,
        kind: MediaKind,
        include_closed: bool,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<FulfillmentRequest>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM {} WHERE ($1 OR status IN ({})) {} LIMIT $2 OFFSET $3",
            request_table(kind),
            open_statuses_sql(),
            triage_order_sql()
        ))
        .bind(include_closed)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FulfillmentRequest::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn update_request_status(
        &self,
        kind: MediaKind,
        id: Uuid,
        status: RequestStatus,
        clear_resolved_url: bool,
    ) -> Result<Option<FulfillmentRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "UPDATE {} SET status = $2, \
             resolved_asset_url = CASE WHEN $3 THEN NULL ELSE resolved_asset_url END \
             WHERE id = $1 RETURNING {REQUEST_COLUMNS}",
            request_table(kind)
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(clear_resolved_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FulfillmentRequest::try_from).transpose()
    }

    async fn status_counts(&self, kind: MediaKind) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT status, COUNT(*) FROM {} GROUP BY status",
            request_table(kind)
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let status: RequestStatus = status.parse().map_err(decode_error)?;
            counts.add(status, count);
        }
        Ok(counts)
    }
}

#[async_trait]
impl LedgerRepository for MetadataStore {
    async fn deductions(&self, marker: &str, user_id: Option<Uuid>) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, amount, description, created_at
            FROM ledger_entries
            WHERE amount < 0
              AND description ILIKE $1
              AND ($2::uuid IS NULL OR user_id = $2)
            "#,
        )
        .bind(like_pattern(marker))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
