use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::config::SiteConfig;
use crate::fetch::PageFetcher;
use crate::geo::GeoApi;
use crate::lookup::lookup;

#[derive(Clone)]
pub struct AppState {
    pub geo: Arc<dyn GeoApi>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub site: Arc<SiteConfig>,
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    name: Option<String>,
    insee: Option<String>,
    debug: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/prices", get(prices))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn prices(State(state): State<AppState>, Query(q): Query<PriceQuery>) -> Response {
    let name = q.name.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let insee = q.insee.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (Some(name), Some(insee)) = (name, insee) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing params: name,insee" })),
        )
            .into_response();
    };

    let response = lookup(
        state.geo.as_ref(),
        state.fetcher.as_ref(),
        &state.site,
        name,
        insee,
        debug_enabled(q.debug.as_deref()),
    )
    .await;
    (StatusCode::OK, Json(response)).into_response()
}

/// `?debug`, `?debug=1`, `?debug=true` enable the trace; `0`, `false` disable it.
fn debug_enabled(flag: Option<&str>) -> bool {
    match flag {
        None => false,
        Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"),
    }
}
