//! Confluence REST client.
//!
//! Fetches pages (with storage-format bodies) and child page listings from
//! the Confluence Content API:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | page | `GET {base}/rest/api/content/{id}?expand=body.storage,version,space,ancestors` |
//! | children | `GET {base}/rest/api/content/{id}/child/page?start=S&limit=L` |
//!
//! # Authentication
//!
//! - `CONFLUENCE_BEARER_TOKEN`: personal access token (Data Center), sent as `Bearer`.
//! - `CONFLUENCE_USERNAME` + `CONFLUENCE_API_TOKEN`: Cloud basic auth.
//! - neither set: anonymous requests (public spaces).
//!
//! # Retry Strategy
//!
//! - HTTP 404 → [`ConfluenceError::NotFound`], no retry
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - fixed delay of `retry_delay_ms` between attempts

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfluenceConfig;
use crate::models::RemotePage;
use crate::traits::PageSource;

/// Upper bound on child listing requests for a single parent.
const MAX_CHILD_REQUESTS: usize = 200;

#[derive(Debug, Error)]
pub enum ConfluenceError {
    #[error("page not found: {0}")]
    NotFound(String),
    #[error("Confluence returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Confluence request failed: {0}")]
    Network(String),
    #[error("invalid Confluence response: {0}")]
    Parse(String),
    #[error("Confluence is not configured: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
enum Auth {
    None,
    Basic(String),
    Bearer(String),
}

/// HTTP client for one Confluence site.
pub struct ConfluenceClient {
    base_url: String,
    auth: Auth,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    child_page_size: usize,
}

impl ConfluenceClient {
    /// Build a client from configuration plus credentials in the environment.
    pub fn from_config(config: &ConfluenceConfig) -> Result<Self, ConfluenceError> {
        let base_url = config
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                ConfluenceError::Config(
                    "set [confluence].base_url or CONFLUENCE_BASE_URL".to_string(),
                )
            })?;

        let auth = match std::env::var("CONFLUENCE_BEARER_TOKEN") {
            Ok(token) if !token.is_empty() => Auth::Bearer(token),
            _ => match (&config.username, std::env::var("CONFLUENCE_API_TOKEN")) {
                (Some(user), Ok(token)) if !token.is_empty() => {
                    Auth::Basic(basic_auth(user, &token))
                }
                _ => Auth::None,
            },
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfluenceError::Config(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            client,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            child_page_size: config.child_page_size,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_page(&self, page_id: &str) -> Result<RemotePage, ConfluenceError> {
        let url = format!(
            "{}/rest/api/content/{}?expand=body.storage,version,space,ancestors",
            self.base_url, page_id
        );
        let json = self.get_json(&url, page_id).await?;
        let content: ContentJson =
            serde_json::from_value(json).map_err(|e| ConfluenceError::Parse(e.to_string()))?;
        Ok(self.to_remote_page(content))
    }

    pub async fn list_children(&self, page_id: &str) -> Result<Vec<String>, ConfluenceError> {
        let mut ids = Vec::new();
        let mut start = 0usize;

        for _ in 0..MAX_CHILD_REQUESTS {
            let url = format!(
                "{}/rest/api/content/{}/child/page?start={}&limit={}",
                self.base_url, page_id, start, self.child_page_size
            );
            let json = self.get_json(&url, page_id).await?;
            let listing: ChildListing =
                serde_json::from_value(json).map_err(|e| ConfluenceError::Parse(e.to_string()))?;

            let count = listing.results.len();
            ids.extend(listing.results.into_iter().map(|c| c.id));

            let has_next = listing.links.and_then(|l| l.next).is_some();
            if count == 0 || !has_next {
                break;
            }
            start += count;
        }

        Ok(ids)
    }

    fn to_remote_page(&self, content: ContentJson) -> RemotePage {
        let base = content
            .links
            .as_ref()
            .and_then(|l| l.base.clone())
            .unwrap_or_else(|| self.base_url.clone());
        let url = match content.links.as_ref().and_then(|l| l.webui.clone()) {
            Some(webui) => format!("{}{}", base.trim_end_matches('/'), webui),
            None => format!(
                "{}/pages/viewpage.action?pageId={}",
                base.trim_end_matches('/'),
                content.id
            ),
        };

        RemotePage {
            parent_id: content.ancestors.last().map(|a| a.id.clone()),
            page_id: content.id,
            title: content.title,
            url,
            space_key: content.space.map(|s| s.key),
            version: content.version.map(|v| v.number),
            storage: content
                .body
                .and_then(|b| b.storage)
                .map(|s| s.value)
                .unwrap_or_default(),
        }
    }

    async fn get_json(
        &self,
        url: &str,
        page_id: &str,
    ) -> Result<serde_json::Value, ConfluenceError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let mut req = self.client.get(url).header("Accept", "application/json");
            req = match &self.auth {
                Auth::None => req,
                Auth::Basic(value) => req.header("Authorization", value),
                Auth::Bearer(token) => req.bearer_auth(token),
            };

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| ConfluenceError::Parse(e.to_string()));
                    }
                    if status.as_u16() == 404 {
                        return Err(ConfluenceError::NotFound(page_id.to_string()));
                    }

                    let body = response.text().await.unwrap_or_default();
                    let err = ConfluenceError::Http {
                        status: status.as_u16(),
                        body: truncate(&body, 300),
                    };
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(attempt, url, status = status.as_u16(), "retrying Confluence request");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(attempt, url, error = %e, "retrying Confluence request");
                    last_err = Some(ConfluenceError::Network(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ConfluenceError::Network("request failed".to_string())))
    }
}

#[async_trait]
impl PageSource for ConfluenceClient {
    async fn fetch_page(&self, page_id: &str) -> Result<RemotePage> {
        Ok(self.get_page(page_id).await?)
    }

    async fn child_ids(&self, page_id: &str) -> Result<Vec<String>> {
        Ok(self.list_children(page_id).await?)
    }
}

fn basic_auth(user: &str, token: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, token));
    format!("Basic {}", encoded)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Extract a page id from a bare id or a Confluence page URL.
///
/// Accepts `12345`, `.../pages/viewpage.action?pageId=12345` and
/// `.../spaces/KEY/pages/12345/Title`.
pub fn parse_page_ref(input: &str) -> Option<String> {
    let input = input.trim();
    if is_page_id(input) {
        return Some(input.to_string());
    }

    let url = Url::parse(input).ok()?;
    if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "pageId") {
        if is_page_id(&id) {
            return Some(id.into_owned());
        }
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(2)
        .find(|w| w[0] == "pages" && is_page_id(w[1]))
        .map(|w| w[1].to_string())
}

fn is_page_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

// ============ Response shapes ============

#[derive(Debug, Deserialize)]
struct ContentJson {
    id: String,
    title: String,
    #[serde(default)]
    space: Option<SpaceJson>,
    #[serde(default)]
    version: Option<VersionJson>,
    #[serde(default)]
    ancestors: Vec<IdJson>,
    #[serde(default)]
    body: Option<BodyJson>,
    #[serde(default, rename = "_links")]
    links: Option<LinksJson>,
}

#[derive(Debug, Deserialize)]
struct SpaceJson {
    key: String,
}

#[derive(Debug, Deserialize)]
struct VersionJson {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct IdJson {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BodyJson {
    #[serde(default)]
    storage: Option<StorageJson>,
}

#[derive(Debug, Deserialize)]
struct StorageJson {
    value: String,
}

#[derive(Debug, Deserialize)]
struct LinksJson {
    #[serde(default)]
    webui: Option<String>,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildListing {
    #[serde(default)]
    results: Vec<IdJson>,
    #[serde(default, rename = "_links")]
    links: Option<LinksJson>,
}
