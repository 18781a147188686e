use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::slug::slugify;

/// A municipality and whatever administrative context could be resolved for it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Location {
    pub name: String,
    pub insee_code: String,
    pub postal_code: Option<String>,
    pub department_name: Option<String>,
    pub region_name: Option<String>,
}

/// URL-safe parts of a Location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSlugs {
    pub city: String,
    pub postal: Option<String>,
    pub department: Option<String>,
    pub region: Option<String>,
}

impl Location {
    pub fn slugs(&self) -> LocationSlugs {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        LocationSlugs {
            city: slugify(&self.name),
            postal: self
                .postal_code
                .as_deref()
                .map(|p| p.trim().to_string())
                .and_then(non_empty),
            department: self.department_name.as_deref().map(slugify).and_then(non_empty),
            region: self.region_name.as_deref().map(slugify).and_then(non_empty),
        }
    }
}

/// One page retrieval, as reported in the debug trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Ok,
    ParsedButEmpty,
    NotFound,
}

impl Outcome {
    pub fn classify(fetched: bool, appart: Option<i64>, maison: Option<i64>) -> Self {
        if appart.is_some() || maison.is_some() {
            Outcome::Ok
        } else if fetched {
            Outcome::ParsedButEmpty
        } else {
            Outcome::NotFound
        }
    }
}

/// JSON body returned for a lookup.
///
/// A successful lookup always carries `source_url` (possibly null) and `note`;
/// a failed one carries only `appart`, `maison` and `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceResponse {
    pub appart: Option<i64>,
    pub maison: Option<i64>,
    pub source_url: Option<String>,
    pub note: Option<Outcome>,
    pub error: Option<String>,
    pub tried: Option<Vec<Attempt>>,
}

impl Serialize for PriceResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("appart", &self.appart)?;
        map.serialize_entry("maison", &self.maison)?;
        match &self.error {
            Some(error) => map.serialize_entry("error", error)?,
            None => {
                map.serialize_entry("source_url", &self.source_url)?;
                if let Some(note) = &self.note {
                    map.serialize_entry("note", note)?;
                }
            }
        }
        if let Some(tried) = &self.tried {
            map.serialize_entry("tried", tried)?;
        }
        map.end()
    }
}

const MAX_ERROR_CHARS: usize = 200;

impl PriceResponse {
    pub fn new(appart: Option<i64>, maison: Option<i64>, source_url: Option<String>) -> Self {
        let note = Outcome::classify(source_url.is_some(), appart, maison);
        Self {
            appart,
            maison,
            source_url,
            note: Some(note),
            error: None,
            tried: None,
        }
    }

    pub fn not_found() -> Self {
        Self::new(None, None, None)
    }

    /// Response for an unexpected internal failure; the message is truncated.
    pub fn failed(err: &anyhow::Error) -> Self {
        let message: String = format!("{:#}", err).chars().take(MAX_ERROR_CHARS).collect();
        Self {
            appart: None,
            maison: None,
            source_url: None,
            note: None,
            error: Some(message),
            tried: None,
        }
    }

    pub fn with_trace(mut self, tried: Vec<Attempt>) -> Self {
        self.tried = Some(tried);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn not_found_shape() {
        let v = serde_json::to_value(PriceResponse::not_found()).unwrap();
        assert_eq!(
            v,
            json!({ "appart": null, "maison": null, "source_url": null, "note": "not-found" })
        );
    }

    #[test]
    fn one_value_is_ok() {
        let r = PriceResponse::new(Some(4200), None, Some("https://x".into()));
        assert_eq!(r.note, Some(Outcome::Ok));
    }

    #[test]
    fn fetched_without_values_is_parsed_but_empty() {
        let r = PriceResponse::new(None, None, Some("https://x".into()));
        let v = serde_json::to_value(r).unwrap();
        assert_eq!(v["note"], "parsed-but-empty");
    }

    #[test]
    fn error_message_truncated() {
        let err = anyhow::anyhow!("{}", "x".repeat(500));
        let r = PriceResponse::failed(&err);
        assert_eq!(r.error.as_ref().map(|e| e.chars().count()), Some(200));
        let v = serde_json::to_value(r).unwrap();
        assert!(v.get("note").is_none());
        assert!(v["appart"].is_null());
    }

    #[test]
    fn error_shape_has_no_source_url() {
        let r = PriceResponse::failed(&anyhow::anyhow!("relay down"));
        assert_eq!(
            serde_json::to_value(r).unwrap(),
            json!({ "appart": null, "maison": null, "error": "relay down" })
        );
    }

    #[test]
    fn trace_follows_note() {
        let attempt = Attempt {
            url: "https://x".into(),
            status: 404,
            content_type: "text/html".into(),
            len: 0,
            from: None,
        };
        let r = PriceResponse::not_found().with_trace(vec![attempt]);
        let v = serde_json::to_value(r).unwrap();
        assert_eq!(v["note"], "not-found");
        assert!(v["source_url"].is_null());
        assert_eq!(v["tried"][0]["status"], 404);
    }

    #[test]
    fn slugs_skip_blank_fields() {
        let loc = Location {
            name: "Saint-Étienne".into(),
            insee_code: "42218".into(),
            postal_code: Some("".into()),
            department_name: Some("Loire".into()),
            region_name: Some("   ".into()),
        };
        let s = loc.slugs();
        assert_eq!(s.city, "saint-etienne");
        assert_eq!(s.postal, None);
        assert_eq!(s.department.as_deref(), Some("loire"));
        assert_eq!(s.region, None);
    }
}
