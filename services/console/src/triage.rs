use crate::config::TriageConfig;
use crate::error::{Error, Result};
use crate::media::MediaKind;
use crate::metadata_store::{LedgerRepository, RequestRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Triage status of a fulfillment request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// A matching asset was identified
    Found,
    /// No match yet; default for new requests
    #[default]
    NotFound,
    Cancel,
    Completed,
}

impl RequestStatus {
    /// All statuses in triage priority order
    pub const ALL: [RequestStatus; 4] = [
        RequestStatus::Found,
        RequestStatus::NotFound,
        RequestStatus::Cancel,
        RequestStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Found => "found",
            RequestStatus::NotFound => "not_found",
            RequestStatus::Cancel => "cancel",
            RequestStatus::Completed => "completed",
        }
    }

    /// Lower sorts first
    pub fn priority(&self) -> u8 {
        match self {
            RequestStatus::Found => 0,
            RequestStatus::NotFound => 1,
            RequestStatus::Cancel => 2,
            RequestStatus::Completed => 3,
        }
    }

    /// Hidden from list views unless closed requests are requested
    pub fn is_closed(&self) -> bool {
        matches!(self, RequestStatus::Cancel | RequestStatus::Completed)
    }

    /// Whether a request in this status may carry a resolved asset URL
    pub fn allows_resolved_url(&self) -> bool {
        matches!(self, RequestStatus::Found | RequestStatus::Completed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown request status: {s}"))
    }
}

/// Relevance score produced upstream, always within 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Chance(u8);

impl Chance {
    pub const MAX: u8 = 100;

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Chance {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        if (0..=i64::from(Self::MAX)).contains(&value) {
            Ok(Chance(value as u8))
        } else {
            Err(Error::InvalidRequest(format!(
                "chance must be within 0..=100, got {value}"
            )))
        }
    }
}

impl From<Chance> for i64 {
    fn from(chance: Chance) -> Self {
        i64::from(chance.0)
    }
}

/// A user-submitted photo or video request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub chance: Chance,
    /// The user's free-text request
    pub message: String,
    pub resolved_asset_url: Option<String>,
}

impl FulfillmentRequest {
    /// Sort key: status priority, then newest first, then id for stability
    pub fn triage_key(&self) -> (u8, Reverse<DateTime<Utc>>, Uuid) {
        (self.status.priority(), Reverse(self.created_at), self.id)
    }
}

/// Request as handed over by the upstream matcher
#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub chance: i64,
    pub message: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub resolved_asset_url: Option<String>,
    /// Defaults to now
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-status request counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub found: i64,
    pub not_found: i64,
    pub cancel: i64,
    pub completed: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: RequestStatus, count: i64) {
        match status {
            RequestStatus::Found => self.found += count,
            RequestStatus::NotFound => self.not_found += count,
            RequestStatus::Cancel => self.cancel += count,
            RequestStatus::Completed => self.completed += count,
        }
    }

    pub fn get(&self, status: RequestStatus) -> i64 {
        match status {
            RequestStatus::Found => self.found,
            RequestStatus::NotFound => self.not_found,
            RequestStatus::Cancel => self.cancel,
            RequestStatus::Completed => self.completed,
        }
    }

    pub fn total(&self) -> i64 {
        self.found + self.not_found + self.cancel + self.completed
    }
}

/// Counts plus money spent on requests of one kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageStats {
    pub kind: MediaKind,
    pub counts: StatusCounts,
    pub total: i64,
    /// Sum of absolute deduction amounts, in minor units
    pub total_spent: i64,
}

/// One page of requests
#[derive(Debug, Clone, Serialize)]
pub struct RequestPage {
    pub items: Vec<FulfillmentRequest>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub has_more: bool,
}

/// Triage settings, decoupled from the config loader
#[derive(Debug, Clone)]
pub struct TriageSettings {
    pub page_size: u32,
    pub max_page_size: u32,
    pub photo_spend_marker: String,
    pub video_spend_marker: String,
}

impl From<&TriageConfig> for TriageSettings {
    fn from(config: &TriageConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_page_size: config.max_page_size,
            photo_spend_marker: config.photo_spend_marker.clone(),
            video_spend_marker: config.video_spend_marker.clone(),
        }
    }
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self::from(&TriageConfig::default())
    }
}

impl TriageSettings {
    fn spend_marker(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Photo => &self.photo_spend_marker,
            MediaKind::Video => &self.video_spend_marker,
        }
    }
}

/// Request triage engine over injected stores
#[derive(Clone)]
pub struct TriageEngine {
    requests: Arc<dyn RequestRepository>,
    ledger: Arc<dyn LedgerRepository>,
    settings: TriageSettings,
}

impl TriageEngine {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        ledger: Arc<dyn LedgerRepository>,
        settings: TriageSettings,
    ) -> Self {
        Self {
            requests,
            ledger,
            settings,
        }
    }

    /// Persist a request coming from the upstream matcher
    #[instrument(skip(self, request), fields(kind = %kind))]
    pub async fn create_request(
        &self,
        kind: MediaKind,
        request: NewRequest,
    ) -> Result<FulfillmentRequest> {
        let chance = Chance::try_from(request.chance)?;

        if request.resolved_asset_url.is_some() && !request.status.allows_resolved_url() {
            return Err(Error::InvalidRequest(format!(
                "a {} request cannot carry a resolved asset URL",
                request.status
            )));
        }

        let record = FulfillmentRequest {
            id: Uuid::new_v4(),
            chat_id: request.chat_id,
            user_id: request.user_id,
            created_at: request.created_at.unwrap_or_else(Utc::now),
            status: request.status,
            chance,
            message: request.message,
            resolved_asset_url: request.resolved_asset_url,
        };

        self.requests.insert_request(kind, &record).await?;

        info!(request_id = %record.id, status = %record.status, chance = chance.value(), "Request created");
        Ok(record)
    }

    pub async fn get_request(&self, kind: MediaKind, id: Uuid) -> Result<FulfillmentRequest> {
        self.requests
            .get_request(kind, id)
            .await?
            .ok_or_else(|| Error::request_not_found(id))
    }

    /// List requests in triage order. `page` is zero-based; `page_size`
    /// falls back to the configured default and is clamped to the maximum.
    /// The total is counted before the page is fetched, so a concurrent
    /// insert can make `has_more` lag by one page boundary.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn list_requests(
        &self,
        kind: MediaKind,
        page: u32,
        page_size: Option<u32>,
        include_closed: bool,
    ) -> Result<RequestPage> {
        let page_size = page_size
            .unwrap_or(self.settings.page_size)
            .clamp(1, self.settings.max_page_size.max(1));

        let total = self.requests.count_requests(kind, include_closed).await?;

        let offset = i64::from(page) * i64::from(page_size);
        let items = self
            .requests
            .page_requests(kind, include_closed, offset, i64::from(page_size))
            .await?;

        let has_more = offset + i64::from(page_size) < total;

        Ok(RequestPage {
            items,
            page,
            page_size,
            total,
            has_more,
        })
    }

    /// Set a request's status. Any status may follow any other, and
    /// repeating the same status is a no-op. Leaving `found`/`completed`
    /// drops the resolved asset URL.
    #[instrument(skip(self), fields(kind = %kind, request_id = %id))]
    pub async fn set_request_status(
        &self,
        kind: MediaKind,
        id: Uuid,
        status: RequestStatus,
    ) -> Result<FulfillmentRequest> {
        let updated = self
            .requests
            .update_request_status(kind, id, status, !status.allows_resolved_url())
            .await?
            .ok_or_else(|| Error::request_not_found(id))?;

        metrics::counter!("console.requests.status_changes").increment(1);
        info!(status = %status, "Request status updated");

        Ok(updated)
    }

    /// Per-status counts and total spend. Both are full scans.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn stats(&self, kind: MediaKind, user_id: Option<Uuid>) -> Result<TriageStats> {
        let counts = self.requests.status_counts(kind).await?;

        let total_spent = self
            .ledger
            .deductions(self.settings.spend_marker(kind), user_id)
            .await?
            .iter()
            .map(|entry| entry.amount.saturating_abs())
            .fold(0i64, i64::saturating_add);

        Ok(TriageStats {
            kind,
            counts,
            total: counts.total(),
            total_spent,
        })
    }
}
