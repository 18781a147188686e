use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::geo::CommuneSummary;

/// One line of `communes_min.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommuneRow {
    pub code: String,
    pub nom: String,
    pub dept: String,
    pub lat: f64,
    pub lon: f64,
    pub population: Option<i64>,
}

/// Name and department of a commune, by INSEE code.
#[derive(Debug, Clone, PartialEq)]
pub struct CommuneRef {
    pub nom: String,
    pub dept: Option<String>,
}

fn present(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|v| !v.is_empty())
}

/// Communes with a code, name, department and a `[lon, lat]` centre.
pub fn min_rows(communes: &[CommuneSummary]) -> Vec<CommuneRow> {
    communes
        .iter()
        .filter_map(|c| {
            let &[lon, lat] = c.centre.as_ref()?.coordinates.as_slice() else {
                return None;
            };
            Some(CommuneRow {
                code: present(&c.code)?.to_string(),
                nom: present(&c.nom)?.to_string(),
                dept: present(&c.code_departement)?.to_string(),
                lat,
                lon,
                population: c.population.as_ref().and_then(|p| p.as_i64()),
            })
        })
        .collect()
}

/// INSEE code → population, for communes with an integer population.
pub fn population_map(communes: &[CommuneSummary]) -> BTreeMap<String, i64> {
    communes
        .iter()
        .filter_map(|c| {
            let pop = c.population.as_ref()?.as_i64()?;
            Some((present(&c.code)?.to_string(), pop))
        })
        .collect()
}

/// Lookup table used when naming communes in the price files.
pub fn by_code(communes: &[CommuneSummary]) -> HashMap<String, CommuneRef> {
    communes
        .iter()
        .filter_map(|c| {
            let code = c.code.clone()?;
            let nom = c.nom.clone()?;
            Some((
                code,
                CommuneRef {
                    nom,
                    dept: c.code_departement.clone(),
                },
            ))
        })
        .collect()
}
