use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::ops::RangeInclusive;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::communes::CommuneRef;
use crate::extract::patterns::Category;

const SURFACE_M2: RangeInclusive<f64> = 10.0..=1000.0;
const MIN_VALUE_EUR: f64 = 1000.0;
const PRICE_PER_M2: RangeInclusive<f64> = 300.0..=20000.0;

pub const CURRENCY: &str = "EUR/m²";
pub const SOURCE: &str =
    "DVF (geo-dvf) — ventes logements, médiane €/m², filtres anti-outliers";

/// Columns read from a geo-dvf CSV; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct DvfRow {
    date_mutation: Option<String>,
    nature_mutation: Option<String>,
    type_local: Option<String>,
    surface_reelle_bati: Option<String>,
    valeur_fonciere: Option<String>,
    code_commune: Option<String>,
}

/// A residential sale that passed the outlier filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    pub code: String,
    pub category: Category,
    pub date: NaiveDate,
    pub price_m2: f64,
}

fn decimal(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

impl DvfRow {
    /// `None` unless this is a sale of a house or apartment with plausible
    /// surface, value and price per m².
    pub fn into_sale(self) -> Option<Sale> {
        if self.nature_mutation.as_deref() != Some("Vente") {
            return None;
        }
        let category = match self.type_local.as_deref()? {
            "Appartement" => Category::Apartment,
            "Maison" => Category::House,
            _ => return None,
        };
        let date =
            NaiveDate::parse_from_str(self.date_mutation.as_deref()?.trim(), "%Y-%m-%d").ok()?;
        let surface = decimal(self.surface_reelle_bati.as_deref())?;
        let value = decimal(self.valeur_fonciere.as_deref())?;
        if !SURFACE_M2.contains(&surface) || value <= MIN_VALUE_EUR {
            return None;
        }
        let price_m2 = value / surface;
        if !PRICE_PER_M2.contains(&price_m2) {
            return None;
        }
        let code = self.code_commune.filter(|c| !c.trim().is_empty())?;
        Some(Sale {
            code: code.trim().to_string(),
            category,
            date,
            price_m2,
        })
    }
}

#[derive(Debug, Default)]
struct Samples {
    appart: Vec<f64>,
    maison: Vec<f64>,
}

impl Samples {
    fn push(&mut self, category: Category, price_m2: f64) {
        match category {
            Category::Apartment => self.appart.push(price_m2),
            Category::House => self.maison.push(price_m2),
        }
    }
}

/// Sales since `start`, grouped by commune.
#[derive(Debug)]
struct Window {
    days: i64,
    start: NaiveDate,
    by_code: HashMap<String, Samples>,
}

/// Row counts for one CSV source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadStats {
    pub rows: u64,
    pub kept: u64,
    pub malformed: u64,
}

/// Collects sale prices for several look-back windows in one pass over the data.
#[derive(Debug)]
pub struct Aggregator {
    today: NaiveDate,
    windows: Vec<Window>,
}

impl Aggregator {
    pub fn new(today: NaiveDate, window_days: &[i64]) -> Self {
        let windows = window_days
            .iter()
            .map(|&days| Window {
                days,
                start: today - Duration::days(days),
                by_code: HashMap::new(),
            })
            .collect();
        Self { today, windows }
    }

    /// Earliest window start; older sales can be skipped.
    pub fn earliest_start(&self) -> Option<NaiveDate> {
        self.windows.iter().map(|w| w.start).min()
    }

    pub fn add(&mut self, sale: &Sale) {
        for window in &mut self.windows {
            if sale.date >= window.start {
                window
                    .by_code
                    .entry(sale.code.clone())
                    .or_default()
                    .push(sale.category, sale.price_m2);
            }
        }
    }

    /// Stream a DVF CSV (header row required) into the windows.
    pub fn read<R: Read>(&mut self, reader: R) -> Result<ReadStats> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut stats = ReadStats::default();
        for result in rdr.deserialize::<DvfRow>() {
            stats.rows += 1;
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    if e.is_io_error() {
                        return Err(e).context("Failed to read DVF data");
                    }
                    debug!("Skipping malformed DVF row: {}", e);
                    stats.malformed += 1;
                    continue;
                }
            };
            if let Some(sale) = row.into_sale() {
                stats.kept += 1;
                self.add(&sale);
            }
        }
        Ok(stats)
    }

    /// One price table per window, limited to communes present in `communes`.
    pub fn into_tables(self, communes: &HashMap<String, CommuneRef>) -> Vec<(i64, PriceTable)> {
        let today = self.today;
        self.windows
            .into_iter()
            .map(|window| {
                let mut data = BTreeMap::new();
                for (code, mut samples) in window.by_code {
                    let Some(commune) = communes.get(&code) else {
                        continue;
                    };
                    data.insert(
                        code,
                        CommunePrices {
                            ville: commune.nom.clone(),
                            dept: commune.dept.clone(),
                            appart: median(&mut samples.appart),
                            maison: median(&mut samples.maison),
                            n_ventes: SalesCount {
                                appart: count(&samples.appart),
                                maison: count(&samples.maison),
                            },
                        },
                    );
                }
                info!("{} days window: {} communes", window.days, data.len());
                let table = PriceTable {
                    periode: period_label(window.start, today),
                    devise: CURRENCY.to_string(),
                    source: SOURCE.to_string(),
                    data,
                };
                (window.days, table)
            })
            .collect()
    }
}

/// `prices_*.json` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub periode: String,
    pub devise: String,
    pub source: String,
    pub data: BTreeMap<String, CommunePrices>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunePrices {
    pub ville: String,
    pub dept: Option<String>,
    pub appart: Option<f64>,
    pub maison: Option<f64>,
    pub n_ventes: SalesCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesCount {
    pub appart: Option<u64>,
    pub maison: Option<u64>,
}

/// e.g. "2024-10-18 à 2025-10-18 (12 mois)".
pub fn period_label(start: NaiveDate, today: NaiveDate) -> String {
    let months = (today - start).num_days() / 30;
    format!("{} à {} ({} mois)", start, today, months)
}

/// Output file name for a window, e.g. `prices_12.json` for 365 days.
pub fn table_file_name(days: i64) -> String {
    format!("prices_{}.json", days / 30)
}

/// Continuous median: the mean of the two middle values for an even count.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn count(values: &[f64]) -> Option<u64> {
    if values.is_empty() {
        None
    } else {
        Some(values.len() as u64)
    }
}
