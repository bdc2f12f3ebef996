//! HTTP record store client
//!
//! Talks to a REST-style CRM:
//! - `GET  {base}/leads?page=&page_size=&<criteria>` -> `{ "leads": [...], "has_more": bool }`
//! - `PATCH {base}/leads/{id}` with the field map
//! - `POST {base}/leads/{id}/notes` with `{ "text": ... }`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;

use super::{LeadFilter, LeadPage, LeadStore, StoreError};
use crate::domain::{LeadRecord, Metadata};

/// Connection settings for the record store
#[derive(Debug, Clone)]
pub struct HttpLeadStoreConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout: Duration,
}

impl Default for HttpLeadStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_key_env: "LEADDIAL_CRM_API_KEY".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    leads: Vec<LeadRecord>,
    #[serde(default)]
    has_more: bool,
}

/// reqwest-backed [`LeadStore`]
pub struct HttpLeadStore {
    client: Client,
    api_key: String,
    base_url: Url,
}

impl HttpLeadStore {
    /// Create a client, reading the API key from the configured env var
    pub fn new(config: HttpLeadStoreConfig) -> Result<Self, StoreError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| StoreError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;
        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: String, config: HttpLeadStoreConfig) -> Result<Self, StoreError> {
        let base_url =
            parse_base_url(&config.base_url).ok_or_else(|| StoreError::InvalidBaseUrl(config.base_url.clone()))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn search_url(&self) -> Url {
        endpoint(&self.base_url, &["leads"])
    }

    fn lead_url(&self, lead_id: &str) -> Url {
        endpoint(&self.base_url, &["leads", lead_id])
    }

    fn notes_url(&self, lead_id: &str) -> Url {
        endpoint(&self.base_url, &["leads", lead_id, "notes"])
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(StoreError::from_status(status.as_u16(), body, retry_after))
    }
}

/// Parse a base URL that path segments can be appended to
pub(crate) fn parse_base_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    (!url.cannot_be_a_base()).then_some(url)
}

/// `base` with `segments` appended, each one percent-encoded
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Read a `retry-after` header given in whole seconds
pub(crate) fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn search_query(filter: &LeadFilter, page: u32) -> Vec<(String, String)> {
    let mut query = vec![
        ("page".to_string(), page.to_string()),
        ("page_size".to_string(), filter.page_size.to_string()),
    ];
    query.extend(filter.criteria.iter().map(|(k, v)| (k.clone(), v.clone())));
    query
}

fn parse_search_body(body: &str) -> Result<LeadPage, StoreError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| StoreError::InvalidResponse(format!("search body: {}", e)))?;
    Ok(LeadPage {
        leads: parsed.leads,
        has_more: parsed.has_more,
    })
}

#[async_trait]
impl LeadStore for HttpLeadStore {
    async fn search(&self, filter: &LeadFilter, page: u32) -> Result<LeadPage, StoreError> {
        let request = self.client.get(self.search_url()).query(&search_query(filter, page));
        let body = self.send(request).await?.text().await?;
        parse_search_body(&body)
    }

    async fn update_status(&self, lead_id: &str, fields: &Metadata) -> Result<(), StoreError> {
        let request = self.client.patch(self.lead_url(lead_id)).json(fields);
        self.send(request).await?;
        Ok(())
    }

    async fn append_note(&self, lead_id: &str, text: &str) -> Result<(), StoreError> {
        let request = self.client.post(self.notes_url(lead_id)).json(&json!({ "text": text }));
        self.send(request).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpLeadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLeadStore").field("base_url", &self.base_url.as_str()).finish()
    }
}
