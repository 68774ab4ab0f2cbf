use crate::config::ApiConfig;
use crate::error::Error;
use crate::gallery::{GalleryService, NewAsset};
use crate::media::{AssetUpdate, MediaAsset, MediaKind};
use crate::reconcile::{OrphanSweeper, SweepReport};
use crate::triage::{FulfillmentRequest, RequestPage, RequestStatus, TriageEngine, TriageStats};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gallery: Arc<GalleryService>,
    pub triage: Arc<TriageEngine>,
    pub sweeper: Arc<OrphanSweeper>,
}

/// Asset as exposed to callers. The private path never appears here.
#[derive(Debug, Serialize)]
pub struct AssetResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: MediaKind,
    pub storage_path: String,
    pub is_private: bool,
    pub keywords: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    /// Public URL of the servable rendition, absent for private videos
    pub url: Option<String>,
}

impl AssetResponse {
    fn new(asset: MediaAsset, url: Option<String>) -> Self {
        Self {
            id: asset.id,
            owner_id: asset.owner_id,
            kind: asset.kind,
            storage_path: asset.storage_path,
            is_private: asset.is_private,
            keywords: asset.keywords,
            content_type: asset.content_type,
            size_bytes: asset.size_bytes,
            created_at: asset.created_at,
            url,
        }
    }
}

/// Upload body
#[derive(Debug, Deserialize)]
pub struct UploadAssetRequest {
    pub owner_id: Uuid,
    pub kind: MediaKind,
    /// Declared MIME type of `data`
    pub content_type: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub is_private: bool,
    /// File contents, base64 encoded
    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,
}

mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Asset list response
#[derive(Debug, Serialize)]
pub struct AssetListResponse {
    pub assets: Vec<AssetResponse>,
}

/// Query parameters for request lists
#[derive(Debug, Deserialize)]
pub struct RequestListQuery {
    /// Zero-based page number
    #[serde(default)]
    pub page: u32,
    pub page_size: Option<u32>,
    #[serde(default)]
    pub include_closed: bool,
}

/// Query parameters for request statistics
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub user_id: Option<Uuid>,
}

/// Status change body
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: RequestStatus,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::StorageWriteFailure { .. }
        | Error::StorageReadFailure { .. }
        | Error::PartialUploadFailure { .. } => StatusCode::BAD_GATEWAY,
        Error::Metadata(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: Error) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!(error = %err, code = err.code(), "Request failed");
        } else {
            warn!(error = %err, code = err.code(), "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
                code: err.code().to_string(),
            }),
        )
    }
}

fn parse_kind(kind: &str) -> Result<MediaKind, ApiError> {
    kind.parse()
        .map_err(|e: String| -> ApiError { Error::InvalidRequest(e).into() })
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/assets", post(upload_asset))
        .route(
            "/api/v1/assets/:id",
            get(get_asset).patch(update_asset).delete(delete_asset),
        )
        .route("/api/v1/owners/:owner_id/assets", get(list_assets))
        .route("/api/v1/requests/:kind", get(list_requests))
        .route("/api/v1/requests/:kind/stats", get(request_stats))
        .route("/api/v1/requests/:kind/:id", get(get_request))
        .route("/api/v1/requests/:kind/:id/status", put(set_request_status))
        .route("/api/v1/maintenance/sweep", post(run_sweep))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "console-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.gallery.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip(state, request), fields(owner_id = %request.owner_id, kind = %request.kind))]
async fn upload_asset(
    State(state): State<AppState>,
    Json(request): Json<UploadAssetRequest>,
) -> Result<(StatusCode, Json<AssetResponse>), ApiError> {
    let asset = state
        .gallery
        .upload_asset(NewAsset {
            owner_id: request.owner_id,
            kind: request.kind,
            file: Bytes::from(request.data),
            content_type: request.content_type,
            keywords: request.keywords,
            is_private: request.is_private,
        })
        .await?;

    let url = state.gallery.display_url(&asset);
    Ok((StatusCode::CREATED, Json(AssetResponse::new(asset, url))))
}

#[instrument(skip(state))]
async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>, ApiError> {
    let asset = state.gallery.get_asset(id).await?;
    let url = state.gallery.display_url(&asset);
    Ok(Json(AssetResponse::new(asset, url)))
}

#[instrument(skip(state))]
async fn update_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<AssetUpdate>,
) -> Result<Json<AssetResponse>, ApiError> {
    let asset = state.gallery.update_asset(id, update).await?;
    let url = state.gallery.display_url(&asset);
    Ok(Json(AssetResponse::new(asset, url)))
}

#[instrument(skip(state))]
async fn delete_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.gallery.delete_asset(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
async fn list_assets(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> Result<Json<AssetListResponse>, ApiError> {
    let assets = state
        .gallery
        .list_assets(owner_id)
        .await?
        .into_iter()
        .map(|asset| {
            let url = state.gallery.display_url(&asset);
            AssetResponse::new(asset, url)
        })
        .collect();

    Ok(Json(AssetListResponse { assets }))
}

#[instrument(skip(state))]
async fn list_requests(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<RequestListQuery>,
) -> Result<Json<RequestPage>, ApiError> {
    let kind = parse_kind(&kind)?;
    let page = state
        .triage
        .list_requests(kind, params.page, params.page_size, params.include_closed)
        .await?;
    Ok(Json(page))
}

#[instrument(skip(state))]
async fn get_request(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<FulfillmentRequest>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.triage.get_request(kind, id).await?))
}

#[instrument(skip(state))]
async fn set_request_status(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<FulfillmentRequest>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(
        state.triage.set_request_status(kind, id, body.status).await?,
    ))
}

#[instrument(skip(state))]
async fn request_stats(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<TriageStats>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.triage.stats(kind, params.user_id).await?))
}

#[instrument(skip(state))]
async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.sweeper.sweep().await?))
}

/// Start the console API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting console API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
