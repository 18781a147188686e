use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fetch::USER_AGENT;
use crate::model::Location;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commune {
    #[serde(default)]
    pub codes_postaux: Vec<String>,
    #[serde(default)]
    pub departement: Option<DepartementRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartementRef {
    pub code: Option<String>,
    pub nom: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departement {
    pub code_region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub nom: Option<String>,
}

/// One entry of the full commune list. Which fields are present depends on the
/// `fields` requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommuneSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_departement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centre: Option<Centre>,
}

/// GeoJSON point; coordinates are `[lon, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centre {
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

/// Fields for the commune list used by the price tables.
pub const PRICE_TABLE_FIELDS: &str = "nom,code,codeDepartement";
/// Fields for the compact commune file.
pub const MIN_FIELDS: &str = "nom,code,codeDepartement,population,centre";
/// Fields for the population file.
pub const POPULATION_FIELDS: &str = "nom,code,population";

/// Administrative reference lookups by code.
#[async_trait]
pub trait GeoApi: Send + Sync {
    async fn commune(&self, insee: &str) -> Result<Commune>;
    async fn departement(&self, code: &str) -> Result<Departement>;
    async fn region(&self, code: &str) -> Result<Region>;
}

/// geo.api.gouv.fr client.
pub struct GeoClient {
    client: reqwest::Client,
    base: String,
}

impl GeoClient {
    pub fn new(base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build geo client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json,text/plain,*/*")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {} for {}", status.as_u16(), url));
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("Unexpected JSON shape from {}", url))
    }

    /// Every commune, with the requested fields.
    pub async fn all_communes(&self, fields: &str) -> Result<Vec<CommuneSummary>> {
        let url = format!(
            "{}/communes?fields={}&format=json&geometry=centre",
            self.base, fields
        );
        let communes: Vec<CommuneSummary> = self.get_json(&url).await?;
        info!("Fetched {} communes", communes.len());
        Ok(communes)
    }
}

#[async_trait]
impl GeoApi for GeoClient {
    async fn commune(&self, insee: &str) -> Result<Commune> {
        let url = format!(
            "{}/communes/{}?fields=nom,codesPostaux,departement&format=json",
            self.base,
            urlencoding::encode(insee)
        );
        self.get_json(&url).await
    }

    async fn departement(&self, code: &str) -> Result<Departement> {
        let url = format!(
            "{}/departements/{}?fields=nom,codeRegion",
            self.base,
            urlencoding::encode(code)
        );
        self.get_json(&url).await
    }

    async fn region(&self, code: &str) -> Result<Region> {
        let url = format!(
            "{}/regions/{}?fields=nom",
            self.base,
            urlencoding::encode(code)
        );
        self.get_json(&url).await
    }
}

/// Resolve postal code, department and region for an INSEE code.
///
/// Lookup failures are logged and leave the affected fields empty; this never fails.
pub async fn resolve_location(geo: &dyn GeoApi, name: &str, insee: &str) -> Location {
    let mut location = Location {
        name: name.to_string(),
        insee_code: insee.to_string(),
        ..Default::default()
    };

    let commune = match geo.commune(insee).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Commune lookup failed for {}: {:#}", insee, e);
            return location;
        }
    };

    location.postal_code = commune.codes_postaux.into_iter().find(|c| !c.trim().is_empty());
    let (dept_code, dept_name) = match commune.departement {
        Some(d) => (non_blank(d.code), non_blank(d.nom)),
        None => (None, None),
    };
    location.department_name = dept_name;

    let Some(dept_code) = dept_code else {
        return location;
    };

    let region_code = match geo.departement(&dept_code).await {
        Ok(d) => non_blank(d.code_region),
        Err(e) => {
            warn!("Department lookup failed for {}: {:#}", dept_code, e);
            None
        }
    };

    if let Some(region_code) = region_code {
        match geo.region(&region_code).await {
            Ok(r) => location.region_name = non_blank(r.nom),
            Err(e) => warn!("Region lookup failed for {}: {:#}", region_code, e),
        }
    }

    debug!("Resolved location: {:?}", location);
    location
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory geo source keyed by code; missing keys fail like a 404.
    #[derive(Default)]
    pub struct FakeGeo {
        pub communes: HashMap<String, serde_json::Value>,
        pub departements: HashMap<String, serde_json::Value>,
        pub regions: HashMap<String, serde_json::Value>,
    }

    fn lookup<T: serde::de::DeserializeOwned>(
        map: &HashMap<String, serde_json::Value>,
        code: &str,
    ) -> Result<T> {
        let v = map.get(code).ok_or_else(|| anyhow!("HTTP 404"))?;
        Ok(serde_json::from_value(v.clone())?)
    }

    #[async_trait]
    impl GeoApi for FakeGeo {
        async fn commune(&self, insee: &str) -> Result<Commune> {
            lookup(&self.communes, insee)
        }
        async fn departement(&self, code: &str) -> Result<Departement> {
            lookup(&self.departements, code)
        }
        async fn region(&self, code: &str) -> Result<Region> {
            lookup(&self.regions, code)
        }
    }

    pub fn paris_geo() -> FakeGeo {
        let mut geo = FakeGeo::default();
        geo.communes.insert(
            "75056".into(),
            serde_json::json!({
                "nom": "Paris",
                "codesPostaux": ["75001", "75002"],
                "departement": { "code": "75", "nom": "Paris" }
            }),
        );
        geo.departements.insert(
            "75".into(),
            serde_json::json!({ "nom": "Paris", "codeRegion": "11" }),
        );
        geo.regions
            .insert("11".into(), serde_json::json!({ "nom": "Île-de-France" }));
        geo
    }

    #[tokio::test]
    async fn full_chain() {
        let loc = resolve_location(&paris_geo(), "Paris", "75056").await;
        assert_eq!(loc.postal_code.as_deref(), Some("75001"));
        assert_eq!(loc.department_name.as_deref(), Some("Paris"));
        assert_eq!(loc.region_name.as_deref(), Some("Île-de-France"));
    }

    #[tokio::test]
    async fn unknown_commune_degrades_to_name_only() {
        let loc = resolve_location(&paris_geo(), "Nowhere", "99999").await;
        assert_eq!(loc.name, "Nowhere");
        assert_eq!(loc.insee_code, "99999");
        assert!(loc.postal_code.is_none());
        assert!(loc.department_name.is_none());
        assert!(loc.region_name.is_none());
    }

    #[tokio::test]
    async fn department_failure_keeps_commune_fields() {
        let mut geo = paris_geo();
        geo.departements.clear();
        let loc = resolve_location(&geo, "Paris", "75056").await;
        assert_eq!(loc.postal_code.as_deref(), Some("75001"));
        assert_eq!(loc.department_name.as_deref(), Some("Paris"));
        assert!(loc.region_name.is_none());
    }

    #[tokio::test]
    async fn malformed_commune_is_swallowed() {
        let mut geo = FakeGeo::default();
        geo.communes
            .insert("01001".into(), serde_json::json!({ "codesPostaux": "not-a-list" }));
        let loc = resolve_location(&geo, "L'Abergement-Clémenciat", "01001").await;
        assert!(loc.postal_code.is_none());
    }

    #[tokio::test]
    async fn missing_department_field() {
        let mut geo = FakeGeo::default();
        geo.communes
            .insert("97411".into(), serde_json::json!({ "codesPostaux": ["97400"] }));
        let loc = resolve_location(&geo, "Saint-Denis", "97411").await;
        assert_eq!(loc.postal_code.as_deref(), Some("97400"));
        assert!(loc.department_name.is_none());
        assert!(loc.region_name.is_none());
    }

    mod over_http {
        use super::*;
        use crate::test_support::{closed_port_url, spawn_server};
        use axum::{
            extract::{Path, Query},
            http::StatusCode,
            response::{IntoResponse, Response},
            routing::get,
            Json, Router,
        };
        use serde_json::json;

        type Params = Query<HashMap<String, String>>;

        fn fields_are(q: &Params, expected: &str) -> bool {
            q.get("fields").map(String::as_str) == Some(expected)
        }

        async fn commune(Path(code): Path<String>, q: Params) -> Response {
            if !fields_are(&q, "nom,codesPostaux,departement") {
                return StatusCode::BAD_REQUEST.into_response();
            }
            match code.as_str() {
                "75056" => Json(json!({
                    "nom": "Paris",
                    "codesPostaux": ["75001"],
                    "departement": { "code": "75", "nom": "Paris" }
                }))
                .into_response(),
                "00000" => "<html>maintenance</html>".into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        async fn departement(Path(code): Path<String>, q: Params) -> Response {
            match (code.as_str(), fields_are(&q, "nom,codeRegion")) {
                ("75", true) => Json(json!({ "nom": "Paris", "codeRegion": "11" })).into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        async fn region(Path(code): Path<String>, q: Params) -> Response {
            match (code.as_str(), fields_are(&q, "nom")) {
                ("11", true) => Json(json!({ "nom": "Île-de-France" })).into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        async fn commune_list(q: Params) -> Response {
            if q.get("geometry").map(String::as_str) != Some("centre") {
                return StatusCode::BAD_REQUEST.into_response();
            }
            let fields = q.get("fields").map(String::as_str).unwrap_or("");
            if fields == MIN_FIELDS {
                Json(json!([
                    {
                        "code": "75056",
                        "nom": "Paris",
                        "codeDepartement": "75",
                        "population": 2133111,
                        "centre": { "type": "Point", "coordinates": [2.347, 48.8589] }
                    },
                    { "code": "97501", "nom": "Miquelon-Langlade", "codeDepartement": "975" }
                ]))
                .into_response()
            } else {
                StatusCode::BAD_REQUEST.into_response()
            }
        }

        async fn geo_client() -> GeoClient {
            let app = Router::new()
                .route("/communes", get(commune_list))
                .route("/communes/:code", get(commune))
                .route("/departements/:code", get(departement))
                .route("/regions/:code", get(region));
            let base = spawn_server(app).await;
            GeoClient::new(&format!("{}/", base)).unwrap()
        }

        #[tokio::test]
        async fn typed_records_from_api() {
            let client = geo_client().await;
            let c = client.commune("75056").await.unwrap();
            assert_eq!(c.codes_postaux, vec!["75001".to_string()]);
            assert_eq!(c.departement.and_then(|d| d.code).as_deref(), Some("75"));
            let d = client.departement("75").await.unwrap();
            assert_eq!(d.code_region.as_deref(), Some("11"));
            let r = client.region("11").await.unwrap();
            assert_eq!(r.nom.as_deref(), Some("Île-de-France"));
        }

        #[tokio::test]
        async fn non_2xx_is_err() {
            let client = geo_client().await;
            let err = client.commune("99999").await.unwrap_err();
            assert!(err.to_string().starts_with("HTTP 404 for "));
        }

        #[tokio::test]
        async fn non_json_body_is_err() {
            let client = geo_client().await;
            let err = client.commune("00000").await.unwrap_err();
            assert!(err.to_string().contains("Unexpected JSON shape"));
        }

        #[tokio::test]
        async fn unreachable_api_is_err() {
            let base = closed_port_url().await;
            let client = GeoClient::new(&base).unwrap();
            assert!(client.region("11").await.is_err());
        }

        #[tokio::test]
        async fn commune_list_with_fields() {
            let client = geo_client().await;
            let communes = client.all_communes(MIN_FIELDS).await.unwrap();
            assert_eq!(communes.len(), 2);
            assert_eq!(communes[0].code_departement.as_deref(), Some("75"));
            assert_eq!(communes[0].population.as_ref().and_then(|p| p.as_i64()), Some(2133111));
            assert_eq!(
                communes[0].centre.as_ref().map(|c| c.coordinates.clone()),
                Some(vec![2.347, 48.8589])
            );
            assert!(communes[1].centre.is_none());

            assert!(client.all_communes(PRICE_TABLE_FIELDS).await.is_err());
        }

        #[tokio::test]
        async fn resolves_over_http() {
            let client = geo_client().await;
            let loc = resolve_location(&client, "Paris", "75056").await;
            assert_eq!(loc.postal_code.as_deref(), Some("75001"));
            assert_eq!(loc.department_name.as_deref(), Some("Paris"));
            assert_eq!(loc.region_name.as_deref(), Some("Île-de-France"));

            let loc = resolve_location(&client, "Ailleurs", "99999").await;
            assert!(loc.postal_code.is_none());
        }
    }
}
