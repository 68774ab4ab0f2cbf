use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the console service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Object store (S3) configuration
    pub object_store: ObjectStoreConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload normalization configuration
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    /// Private asset obfuscation configuration
    #[serde(default)]
    pub privacy: PrivacyConfig,
    /// Request triage configuration
    #[serde(default)]
    pub triage: TriageConfig,
    /// Orphan sweep configuration
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration. Each partition lives in its own bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Bucket holding servable renditions
    pub public_bucket: String,
    /// Bucket holding unobfuscated originals of private assets
    pub private_bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL the public bucket is served from (CDN or website endpoint)
    pub public_base_url: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Upload normalization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    /// Images smaller than this are stored byte-for-byte
    #[serde(default = "default_passthrough_threshold")]
    pub passthrough_threshold_bytes: usize,
    /// Longest allowed edge after re-encoding
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// JPEG quality (1-100) for re-encoded images
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Obfuscated rendition configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PrivacyConfig {
    /// Gaussian sigma applied to the downscaled image
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    /// Factor the image is shrunk by before blurring
    #[serde(default = "default_blur_downscale")]
    pub blur_downscale: u32,
}

/// Request triage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TriageConfig {
    /// Page size used when the caller does not ask for one
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound for caller-provided page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Ledger description fragment identifying photo request spend
    #[serde(default = "default_photo_spend_marker")]
    pub photo_spend_marker: String,
    /// Ledger description fragment identifying video request spend
    #[serde(default = "default_video_spend_marker")]
    pub video_spend_marker: String,
}

/// Orphan sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Run the periodic sweep in the service binary
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    /// Blobs younger than this are never swept
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted upload request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "console-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_passthrough_threshold() -> usize {
    2 * 1024 * 1024 // 2MB
}

fn default_max_dimension() -> u32 {
    1200
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_blur_sigma() -> f32 {
    6.0
}

fn default_blur_downscale() -> u32 {
    8
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_photo_spend_marker() -> String {
    "photo request".to_string()
}

fn default_video_spend_marker() -> String {
    "video request".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    3600
}

fn default_grace_period_secs() -> u64 {
    900 // 15 minutes
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "console-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/console").required(false))
            .add_source(config::File::with_name("/etc/console/console").required(false))
            // Override with environment variables
            // CONSOLE__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CONSOLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the sweep interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs)
    }

    /// Get the sweep grace period as Duration
    pub fn reconcile_grace_period(&self) -> Duration {
        Duration::from_secs(self.reconcile.grace_period_secs)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            passthrough_threshold_bytes: default_passthrough_threshold(),
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            blur_sigma: default_blur_sigma(),
            blur_downscale: default_blur_downscale(),
        }
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            photo_spend_marker: default_photo_spend_marker(),
            video_spend_marker: default_video_spend_marker(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_reconcile_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_passthrough_threshold(), 2 * 1024 * 1024);
        assert_eq!(default_max_dimension(), 1200);
        assert_eq!(default_jpeg_quality(), 80);
        assert_eq!(default_page_size(), 20);
    }

    #[test]
    fn test_optional_sections_fall_back_to_defaults() {
        let raw = serde_json::json!({
            "service": {},
            "object_store": {
                "public_bucket": "gallery-public",
                "private_bucket": "gallery-private"
            },
            "database": { "url": "postgres://localhost/console" },
            "api": {}
        });

        let config: Config = serde_json::from_value(raw).unwrap();
        assert_eq!(config.service.name, "console-service");
        assert_eq!(config.object_store.region, "us-east-1");
        assert_eq!(config.normalizer.max_dimension, 1200);
        assert_eq!(config.triage.max_page_size, 100);
        assert!(config.reconcile.enabled);
        assert_eq!(config.api.port, 8080);
        assert_eq!(
            config.database.connect_timeout(),
            Duration::from_secs(config.database.connect_timeout_secs)
        );
        assert_eq!(
            config.database.idle_timeout(),
            Duration::from_secs(config.database.idle_timeout_secs)
        );
    }
}
