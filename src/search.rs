use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::config::SiteConfig;

static RESULT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.result__a").unwrap());

/// Search-engine results URL for a municipality's price page.
pub fn query_url(site: &SiteConfig, name: &str) -> String {
    let query = format!("site:{} \"prix de l'immo\" vente {}", site.domain, name);
    format!("{}?q={}", site.search_endpoint, urlencoding::encode(&query))
}

/// First price-page URL in a results page.
///
/// Tries a plain URL match over the raw HTML first, then result anchors whose
/// (possibly redirect-wrapped) href points at a price page.
pub fn find_listing_url(site: &SiteConfig, results_html: &str) -> Option<String> {
    find_by_pattern(site, results_html).or_else(|| find_by_anchor(site, results_html))
}

fn find_by_pattern(site: &SiteConfig, html: &str) -> Option<String> {
    let pattern = format!(
        r#"(?i)https?://{}[^\s"'<>]+"#,
        regex::escape(host_and_path(site))
    );
    let re = Regex::new(&pattern).ok()?;
    let url = re.find(html)?.as_str().to_string();
    debug!("Search hit by pattern: {}", url);
    Some(url)
}

fn find_by_anchor(site: &SiteConfig, html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let path = site.listing_path();

    document
        .select(&RESULT_LINK)
        .filter_map(|a| a.value().attr("href"))
        .map(unwrap_redirect)
        .find(|href| href.contains(path) && href.contains(&site.domain))
        .inspect(|url| debug!("Search hit by anchor: {}", url))
}

/// Result links may be wrapped as `//duckduckgo.com/l/?uddg=<encoded>&rut=...`.
fn unwrap_redirect(href: &str) -> String {
    let target = href
        .split(['?', '&'])
        .find_map(|part| part.strip_prefix("uddg="))
        .and_then(|enc| urlencoding::decode(enc).ok())
        .map(|dec| dec.into_owned());
    target.unwrap_or_else(|| href.to_string())
}

fn host_and_path(site: &SiteConfig) -> &str {
    site.listing_base
        .split_once("//")
        .map(|(_, rest)| rest)
        .unwrap_or(&site.listing_base)
}
