use anyhow::Result;
use tracing::{debug, info, warn};

use crate::candidates::build_candidates;
use crate::config::SiteConfig;
use crate::extract::extract_prices;
use crate::fetch::PageFetcher;
use crate::geo::{resolve_location, GeoApi};
use crate::model::{Attempt, PriceResponse};
use crate::search;

/// A page accepted as the price source.
struct Hit {
    url: String,
    html: String,
}

/// Run the whole lookup for one municipality.
///
/// Never fails: unexpected errors become a response carrying `error`.
pub async fn lookup(
    geo: &dyn GeoApi,
    fetcher: &dyn PageFetcher,
    site: &SiteConfig,
    name: &str,
    insee: &str,
    debug: bool,
) -> PriceResponse {
    match run(geo, fetcher, site, name, insee).await {
        Ok((response, tried)) if debug => response.with_trace(tried),
        Ok((response, _)) => response,
        Err(e) => {
            warn!("Lookup failed for {} ({}): {:#}", name, insee, e);
            PriceResponse::failed(&e)
        }
    }
}

async fn run(
    geo: &dyn GeoApi,
    fetcher: &dyn PageFetcher,
    site: &SiteConfig,
    name: &str,
    insee: &str,
) -> Result<(PriceResponse, Vec<Attempt>)> {
    let location = resolve_location(geo, name, insee).await;
    let candidates = build_candidates(&site.listing_base, &location.slugs());
    debug!("{} candidates for {} ({})", candidates.len(), name, location.insee_code);

    let mut tried = Vec::new();
    let mut hit = try_candidates(fetcher, &candidates, &mut tried).await?;

    if hit.is_none() {
        hit = search_fallback(fetcher, site, name, &mut tried).await?;
    }

    let Some(hit) = hit else {
        info!("No price page found for {} ({})", name, insee);
        return Ok((PriceResponse::not_found(), tried));
    };

    let prices = extract_prices(&hit.html);
    info!(
        "{} ({}): appart={:?} maison={:?} from {}",
        name, insee, prices.appart, prices.maison, hit.url
    );
    Ok((
        PriceResponse::new(prices.appart, prices.maison, Some(hit.url)),
        tried,
    ))
}

/// Fetch candidates in order, stopping at the first usable page.
async fn try_candidates(
    fetcher: &dyn PageFetcher,
    candidates: &[String],
    tried: &mut Vec<Attempt>,
) -> Result<Option<Hit>> {
    for url in candidates {
        if let Some(hit) = attempt(fetcher, url, None, tried).await? {
            return Ok(Some(hit));
        }
    }
    Ok(None)
}

async fn search_fallback(
    fetcher: &dyn PageFetcher,
    site: &SiteConfig,
    name: &str,
    tried: &mut Vec<Attempt>,
) -> Result<Option<Hit>> {
    let results = fetcher.fetch(&search::query_url(site, name)).await?;
    let Some(url) = search::find_listing_url(site, &results.text) else {
        debug!("Search fallback found nothing for {}", name);
        return Ok(None);
    };
    attempt(fetcher, &url, Some("search"), tried).await
}

async fn attempt(
    fetcher: &dyn PageFetcher,
    url: &str,
    from: Option<&'static str>,
    tried: &mut Vec<Attempt>,
) -> Result<Option<Hit>> {
    let result = fetcher.fetch(url).await?;
    tried.push(Attempt {
        url: url.to_string(),
        status: result.status,
        content_type: result.content_type.clone(),
        len: result.len(),
        from,
    });

    if result.is_usable() {
        Ok(Some(Hit {
            url: url.to_string(),
            html: result.text,
        }))
    } else {
        debug!("Rejected {} (status {}, {} chars)", url, result.status, result.len());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{page_with, FakeFetcher};
    use crate::fetch::FetchResult;
    use crate::geo::tests::{paris_geo, FakeGeo};
    use crate::model::Outcome;
    use async_trait::async_trait;
    use serde_json::json;

    const PARIS_FIRST: &str =
        "https://www.seloger.com/prix-de-l-immo/vente/ile-de-france/paris/paris-75001/";
    const PARIS_CITY: &str = "https://www.seloger.com/prix-de-l-immo/vente/paris.htm";

    #[tokio::test]
    async fn all_candidates_fail_is_not_found() {
        let site = SiteConfig::default();
        let fetcher = FakeFetcher::default();
        let r = lookup(&paris_geo(), &fetcher, &site, "Paris", "75056", false).await;
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({ "appart": null, "maison": null, "source_url": null, "note": "not-found" })
        );
        // five candidates plus the search results page
        assert_eq!(fetcher.requested().len(), 6);
        assert_eq!(fetcher.requested()[0], PARIS_FIRST);
    }

    #[tokio::test]
    async fn apartment_only_is_ok() {
        let site = SiteConfig::default();
        let fetcher = FakeFetcher::default()
            .with_page(PARIS_FIRST, page_with("<p>Appartements 4 200 €/m²</p>"));
        let r = lookup(&paris_geo(), &fetcher, &site, "Paris", "75056", false).await;
        assert_eq!(r.appart, Some(4200));
        assert_eq!(r.maison, None);
        assert_eq!(r.note, Some(Outcome::Ok));
        assert_eq!(r.source_url.as_deref(), Some(PARIS_FIRST));
        assert!(r.tried.is_none());
        assert_eq!(fetcher.requested(), vec![PARIS_FIRST.to_string()]);
    }

    #[tokio::test]
    async fn stops_at_first_usable_candidate() {
        let site = SiteConfig::default();
        let html = std::fs::read_to_string("tests/fixtures/price_page.html").unwrap();
        let fetcher = FakeFetcher::default()
            .with_page(PARIS_FIRST, FetchResult::html("<html><body>redirect</body></html>".into()))
            .with_page(PARIS_CITY, FetchResult::html(html));
        let r = lookup(&paris_geo(), &fetcher, &site, "Paris", "75056", true).await;
        assert_eq!(r.appart, Some(5432));
        assert_eq!(r.maison, Some(6120));
        assert_eq!(r.source_url.as_deref(), Some(PARIS_CITY));

        let tried = r.tried.unwrap();
        assert_eq!(tried.len(), 5);
        assert_eq!(tried[0].url, PARIS_FIRST);
        assert_eq!(tried[0].status, 200);
        assert_eq!(tried[1].status, 404);
        assert_eq!(tried[4].url, PARIS_CITY);
        assert!(tried[4].len > 1500);
        assert!(tried.iter().all(|a| a.from.is_none()));
    }

    #[tokio::test]
    async fn page_without_prices_is_parsed_but_empty() {
        let site = SiteConfig::default();
        let fetcher = FakeFetcher::default().with_page(PARIS_FIRST, page_with("<h1>Paris</h1>"));
        let r = lookup(&paris_geo(), &fetcher, &site, "Paris", "75056", false).await;
        assert_eq!(r.note, Some(Outcome::ParsedButEmpty));
        assert_eq!(r.source_url.as_deref(), Some(PARIS_FIRST));
        assert_eq!((r.appart, r.maison), (None, None));
    }

    #[tokio::test]
    async fn search_fallback_hit() {
        let site = SiteConfig::default();
        let found =
            "https://www.seloger.com/prix-de-l-immo/vente/auvergne/cantal/saint-flour-15100/";
        let results = format!(
            r#"<html><body><a class="result__a" href="{}">Prix Saint-Flour</a></body></html>"#,
            found
        );
        let fetcher = FakeFetcher::default()
            .with_page(&search::query_url(&site, "Saint-Flour"), FetchResult::html(results))
            .with_page(found, page_with("<p>Maison 1 480 €/m²</p>"));

        // geo knows nothing: only the city-only candidate is tried before searching
        let r = lookup(&FakeGeo::default(), &fetcher, &site, "Saint-Flour", "15187", true).await;
        assert_eq!(r.maison, Some(1480));
        assert_eq!(r.source_url.as_deref(), Some(found));

        let tried = r.tried.unwrap();
        assert_eq!(tried.len(), 2);
        assert_eq!(tried[0].url, "https://www.seloger.com/prix-de-l-immo/vente/saint-flour.htm");
        assert_eq!(tried[1].from, Some("search"));
        assert_eq!(
            serde_json::to_value(&tried[1]).unwrap()["from"],
            json!("search")
        );
    }

    #[tokio::test]
    async fn search_hit_still_needs_usable_page() {
        let site = SiteConfig::default();
        let found = "https://www.seloger.com/prix-de-l-immo/vente/x/";
        let fetcher = FakeFetcher::default()
            .with_page(
                &search::query_url(&site, "X"),
                FetchResult::html(format!("<p>{}</p>", found)),
            )
            .with_page(found, FetchResult::html("<p>Maison 1 480 €/m²</p>".into()));
        let r = lookup(&FakeGeo::default(), &fetcher, &site, "X", "00000", false).await;
        assert_eq!(r.note, Some(Outcome::NotFound));
        assert!(r.source_url.is_none());
    }

    struct BrokenRelay;

    #[async_trait]
    impl PageFetcher for BrokenRelay {
        async fn fetch(&self, _url: &str) -> anyhow::Result<FetchResult> {
            Err(anyhow::anyhow!("Relay returned a non-JSON envelope"))
        }
    }

    #[tokio::test]
    async fn unexpected_error_reported_in_body() {
        let site = SiteConfig::default();
        let r = lookup(&paris_geo(), &BrokenRelay, &site, "Paris", "75056", true).await;
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["error"], "Relay returned a non-JSON envelope");
        assert!(v["appart"].is_null());
        assert!(v.get("note").is_none());
        assert!(v.get("source_url").is_none());
        assert!(v.get("tried").is_none());
    }
}
