//! Console Service
//!
//! Media asset pipeline and request triage for the operator console.
//!
//! ## Features
//!
//! - **Upload Normalization**: Media type validation, downsizing and
//!   re-encoding of large photos, untouched passthrough for small ones
//! - **Privacy Partitioning**: Private photos are stored as an unobfuscated
//!   original in a private bucket plus a blurred copy in the public bucket,
//!   both under one shared id
//! - **Request Triage**: Flat four-status lifecycle for photo/video requests
//!   with priority ordering, paging and spend statistics
//! - **Orphan Sweep**: Periodic cleanup of blobs left behind by partial
//!   uploads
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API
//!      │
//!      ├──────────────────────────┐
//!      ▼                          ▼
//! ┌──────────────┐         ┌──────────────┐
//! │ Gallery      │         │ Triage       │
//! │ Service      │         │ Engine       │
//! └──────────────┘         └──────────────┘
//!      │                          │
//!      ▼                          │
//! ┌──────────────┐                │
//! │ Normalizer   │                │
//! └──────────────┘                │
//!      │                          │
//!      ▼                          ▼
//! ┌──────────────┐         ┌──────────────┐
//! │ Privacy      │         │ PostgreSQL   │
//! │ Partitioner  │         │ assets       │
//! └──────────────┘         │ requests     │
//!      │                   │ ledger       │
//!      ▼                   └──────────────┘
//! ┌──────────────┐                ▲
//! │ S3 public /  │◀───────┐       │
//! │ S3 private   │        │       │
//! └──────────────┘   ┌──────────────┐
//!                    │ Orphan       │
//!                    │ Sweeper      │
//!                    └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gallery;
pub mod media;
pub mod memory;
pub mod metadata_store;
pub mod normalizer;
pub mod object_store;
pub mod partitioner;
pub mod reconcile;
pub mod triage;

pub use api::{AppState, AssetResponse};
pub use config::Config;
pub use error::{Error, Result};
pub use gallery::{GalleryService, NewAsset};
pub use media::{AssetUpdate, MediaAsset, MediaKind};
pub use metadata_store::{AssetRepository, LedgerRepository, MetadataStore, RequestRepository};
pub use normalizer::{NormalizedMedia, Normalizer};
pub use object_store::{ObjectStore, Partition, S3ObjectStore};
pub use partitioner::{PrivacyPartitioner, StoredRenditions};
pub use reconcile::{OrphanSweeper, SweepReport};
pub use triage::{FulfillmentRequest, RequestPage, RequestStatus, TriageEngine, TriageStats};
