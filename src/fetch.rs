use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{FetchStrategy, RelayConfig};

pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36"
);

/// Pages at or below this many characters are treated as stubs.
pub const MIN_BODY_CHARS: usize = 1500;

/// Outcome of a single page retrieval.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResult {
    pub ok: bool,
    pub status: u16,
    pub content_type: String,
    pub text: String,
}

impl FetchResult {
    pub fn failed(status: u16, content_type: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            content_type: content_type.into(),
            text: String::new(),
        }
    }

    pub fn html(text: String) -> Self {
        Self {
            ok: true,
            status: 200,
            content_type: "text/html".into(),
            text,
        }
    }

    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    /// Successful, HTML, and larger than a stub page.
    pub fn is_usable(&self) -> bool {
        self.ok && self.content_type.contains("text/html") && self.len() > MIN_BODY_CHARS
    }
}

/// Retrieves a page by URL.
///
/// Transport failures are reported through `FetchResult::ok`; `Err` is reserved
/// for responses that break the retrieval contract.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResult>;
}

/// reqwest-backed fetcher using either a direct request or the relay.
pub struct HttpFetcher {
    client: reqwest::Client,
    strategy: FetchStrategy,
}

impl HttpFetcher {
    pub fn new(strategy: FetchStrategy, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { client, strategy })
    }

    async fn fetch_direct(&self, url: &str) -> FetchResult {
        let resp = match self.client.get(url).headers(browser_headers()).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Request failed for {}: {}", url, e);
                return FetchResult::failed(0, "");
            }
        };

        let status = resp.status();
        let content_type = header_str(resp.headers(), CONTENT_TYPE);
        if !status.is_success() {
            return FetchResult::failed(status.as_u16(), content_type);
        }

        match resp.text().await {
            Ok(text) => FetchResult {
                ok: true,
                status: status.as_u16(),
                content_type,
                text,
            },
            Err(e) => {
                warn!("Failed to read body of {}: {}", url, e);
                FetchResult::failed(status.as_u16(), content_type)
            }
        }
    }

    async fn fetch_relay(&self, relay: &RelayConfig, url: &str) -> Result<FetchResult> {
        let resp = match self
            .client
            .get(&relay.endpoint)
            .query(&relay_query(relay, url))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Relay request failed for {}: {}", url, e);
                return Ok(FetchResult::failed(0, ""));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let content_type = header_str(resp.headers(), CONTENT_TYPE);
            return Ok(FetchResult::failed(status.as_u16(), content_type));
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read relay response for {}", url))?;
        unwrap_relay_envelope(&body)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResult> {
        let result = match &self.strategy {
            FetchStrategy::Direct => self.fetch_direct(url).await,
            FetchStrategy::Relay(relay) => self.fetch_relay(relay, url).await?,
        };
        debug!(
            "{} fetch {} -> {} {:?} ({} chars)",
            self.strategy.label(),
            url,
            result.status,
            result.content_type,
            result.len()
        );
        Ok(result)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("fr-FR,fr;q=0.9,en;q=0.8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn relay_query(relay: &RelayConfig, url: &str) -> Vec<(&'static str, String)> {
    vec![
        ("key", relay.api_key.clone()),
        ("url", url.to_string()),
        ("country", relay.country.clone()),
        ("asp", relay.asp.to_string()),
        ("retry", relay.retry.to_string()),
        ("timeout", relay.timeout_ms.to_string()),
    ]
}

#[derive(Debug, Deserialize)]
struct RelayEnvelope {
    result: Option<RelayPayload>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayPayload {
    content: Option<String>,
}

/// Extract the page body from a relay JSON envelope.
fn unwrap_relay_envelope(body: &str) -> Result<FetchResult> {
    let envelope: RelayEnvelope =
        serde_json::from_str(body).context("Relay returned a non-JSON envelope")?;
    let html = envelope
        .result
        .and_then(|r| r.content)
        .filter(|c| !c.is_empty())
        .or(envelope.content)
        .unwrap_or_default();

    if html.is_empty() {
        Ok(FetchResult::failed(500, "text/html"))
    } else {
        Ok(FetchResult::html(html))
    }
}
