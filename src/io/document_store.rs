//! Read-only access to the remote document store
//!
//! The store holds the establishment and review collections. The engine only
//! reads snapshots of them; results are eventually consistent and never
//! transactional.
//!
//! HTTP layout used by `HttpDocumentStore`:
//! - `GET {base}/establishments` -> `[EstablishmentDto]`
//! - `GET {base}/establishments/{id}` -> `EstablishmentDto` or 404
//! - `GET {base}/reviews?establishmentId=..&userId=..` -> `[ReviewDto]`

use crate::domain::types::EstablishmentCandidate;
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Establishment document as stored remotely
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EstablishmentDto {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub added_by: String,
}

impl From<EstablishmentDto> for EstablishmentCandidate {
    fn from(dto: EstablishmentDto) -> Self {
        EstablishmentCandidate::new(dto.id, dto.name, dto.latitude, dto.longitude)
    }
}

/// Review document as stored remotely
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewDto {
    pub id: String,
    pub establishment_id: String,
    pub user_id: String,
    pub rating: i32,
    pub price_rating: i32,
    pub comment: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// A user's review of an establishment, as far as the engine cares
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub id: String,
    pub establishment_id: String,
    pub user_id: String,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ReviewDto> for ReviewRecord {
    type Error = anyhow::Error;

    fn try_from(dto: ReviewDto) -> anyhow::Result<Self> {
        let created_at = Utc
            .timestamp_millis_opt(dto.timestamp)
            .single()
            .with_context(|| format!("review {} has invalid timestamp {}", dto.id, dto.timestamp))?;
        Ok(Self {
            id: dto.id,
            establishment_id: dto.establishment_id,
            user_id: dto.user_id,
            rating: dto.rating,
            created_at,
        })
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current establishment collection snapshot
    async fn establishments(&self) -> anyhow::Result<Vec<EstablishmentCandidate>>;

    async fn establishment(&self, id: &str) -> anyhow::Result<Option<EstablishmentCandidate>>;

    /// Reviews one user wrote for one establishment
    async fn reviews_by(&self, establishment_id: &str, user_id: &str) -> anyhow::Result<Vec<ReviewRecord>>;
}

/// Timestamp of the user's most recent review of the establishment
pub async fn last_review_at(
    store: &dyn DocumentStore,
    establishment_id: &str,
    user_id: &str,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    let reviews = store.reviews_by(establishment_id, user_id).await?;
    Ok(reviews.iter().map(|r| r.created_at).max())
}

/// Document store client over HTTP/JSON
pub struct HttpDocumentStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, timeout: Duration, api_key: Option<&str>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build document store HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
            client,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path)).header("Accept", "application/json");
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send and decode; `Ok(None)` on 404
    async fn fetch<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> anyhow::Result<Option<T>> {
        let response = request.send().await.context("document store request failed")?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("document store returned {}", status);
        }
        let body = response.bytes().await.context("document store body read failed")?;
        debug!(status = %status.as_u16(), bytes = body.len(), "document_store_response");
        let value = serde_json::from_slice(&body).context("document store returned invalid JSON")?;
        Ok(Some(value))
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn establishments(&self) -> anyhow::Result<Vec<EstablishmentCandidate>> {
        let dtos: Vec<EstablishmentDto> = self.fetch(self.get("/establishments")).await?.unwrap_or_default();
        Ok(dtos.into_iter().map(EstablishmentCandidate::from).collect())
    }

    async fn establishment(&self, id: &str) -> anyhow::Result<Option<EstablishmentCandidate>> {
        if id.is_empty() || id.contains('/') {
            bail!("invalid establishment id {:?}", id);
        }
        let dto: Option<EstablishmentDto> = self.fetch(self.get(&format!("/establishments/{}", id))).await?;
        Ok(dto.map(EstablishmentCandidate::from))
    }

    async fn reviews_by(&self, establishment_id: &str, user_id: &str) -> anyhow::Result<Vec<ReviewRecord>> {
        let request = self
            .get("/reviews")
            .query(&[("establishmentId", establishment_id), ("userId", user_id)]);
        let dtos: Vec<ReviewDto> = self.fetch(request).await?.unwrap_or_default();
        dtos.into_iter()
            // The store may ignore filters it doesn't index
            .filter(|r| r.establishment_id == establishment_id && r.user_id == user_id)
            .map(ReviewRecord::try_from)
            .collect()
    }
}
