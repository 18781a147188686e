use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_GEO_API_BASE: &str = "https://geo.api.gouv.fr";
const DEFAULT_RELAY_ENDPOINT: &str = "https://api.scrapfly.io/scrape";
const DEFAULT_DVF_BASE: &str = "https://files.data.gouv.fr/geo-dvf/latest/csv";

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub geo_api_base: String,
    pub strategy: FetchStrategy,
    pub fetch_timeout: Option<Duration>,
    pub site: SiteConfig,
    /// Yearly geo-dvf exports live at `{dvf_base}/{year}/full.csv.gz`.
    pub dvf_base: String,
}

/// How listing pages are retrieved.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStrategy {
    Direct,
    Relay(RelayConfig),
}

/// Anti-bot relay parameters forwarded on every relayed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub api_key: String,
    pub endpoint: String,
    pub country: String,
    pub asp: bool,
    pub retry: u32,
    pub timeout_ms: u64,
}

impl RelayConfig {
    pub fn new(api_key: String, endpoint: String) -> Self {
        Self {
            api_key,
            endpoint,
            country: "fr".into(),
            asp: true,
            retry: 2,
            timeout_ms: 30_000,
        }
    }
}

/// Listing site and search engine the pipeline targets.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Price pages live under this prefix; always ends with '/'.
    pub listing_base: String,
    pub domain: String,
    pub search_endpoint: String,
}

impl SiteConfig {
    /// Path of the price pages, e.g. "/prix-de-l-immo/vente/".
    pub fn listing_path(&self) -> &str {
        self.listing_base
            .split("//")
            .nth(1)
            .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
            .unwrap_or("/")
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            listing_base: "https://www.seloger.com/prix-de-l-immo/vente/".into(),
            domain: "seloger.com".into(),
            search_endpoint: "https://duckduckgo.com/html/".into(),
        }
    }
}

impl FetchStrategy {
    /// Relay when a non-blank key is present, direct otherwise.
    pub fn from_key(key: Option<String>, endpoint: Option<String>) -> Self {
        match key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
            Some(key) => FetchStrategy::Relay(RelayConfig::new(
                key,
                endpoint.unwrap_or_else(|| DEFAULT_RELAY_ENDPOINT.into()),
            )),
            None => FetchStrategy::Direct,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchStrategy::Direct => "direct",
            FetchStrategy::Relay(_) => "relay",
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let fetch_timeout = match env::var("FETCH_TIMEOUT_SECS") {
            Ok(v) => Some(Duration::from_secs(
                v.trim()
                    .parse()
                    .with_context(|| format!("invalid FETCH_TIMEOUT_SECS: {:?}", v))?,
            )),
            Err(_) => None,
        };

        Ok(Self {
            geo_api_base: env::var("GEO_API_BASE")
                .unwrap_or_else(|_| DEFAULT_GEO_API_BASE.into()),
            strategy: FetchStrategy::from_key(
                env::var("SCRAPFLY_KEY").ok(),
                env::var("SCRAPFLY_ENDPOINT").ok(),
            ),
            fetch_timeout,
            site: SiteConfig::default(),
            dvf_base: env::var("DVF_BASE").unwrap_or_else(|_| DEFAULT_DVF_BASE.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_means_direct() {
        assert_eq!(FetchStrategy::from_key(None, None), FetchStrategy::Direct);
        assert_eq!(
            FetchStrategy::from_key(Some("   ".into()), None),
            FetchStrategy::Direct
        );
    }

    #[test]
    fn key_selects_relay_with_defaults() {
        let strategy = FetchStrategy::from_key(Some("abc".into()), None);
        let FetchStrategy::Relay(relay) = strategy else {
            panic!("expected relay strategy");
        };
        assert_eq!(relay.api_key, "abc");
        assert_eq!(relay.endpoint, DEFAULT_RELAY_ENDPOINT);
        assert_eq!(relay.country, "fr");
        assert!(relay.asp);
        assert_eq!(relay.retry, 2);
        assert_eq!(relay.timeout_ms, 30_000);
    }

    #[test]
    fn listing_path_from_base() {
        assert_eq!(SiteConfig::default().listing_path(), "/prix-de-l-immo/vente/");
    }
}
