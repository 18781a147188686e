use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::communes;
use crate::dvf::{self, Aggregator};
use crate::fetch::USER_AGENT;
use crate::geo::{CommuneSummary, GeoClient, MIN_FIELDS, POPULATION_FIELDS, PRICE_TABLE_FIELDS};

/// DVF files cover the current year and this many before it.
const DVF_YEARS_BACK: i32 = 2;

/// Inputs of a price-table build.
#[derive(Debug, Clone)]
pub struct PriceBuild {
    /// Local DVF files; downloaded into `cache_dir` when empty.
    pub dvf_files: Vec<PathBuf>,
    pub window_days: Vec<i64>,
    pub out_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub today: NaiveDate,
    pub dvf_base: String,
}

/// Median price tables, one `prices_<months>.json` per window. Returns the written paths.
pub async fn build_prices(geo: &GeoClient, job: &PriceBuild) -> Result<Vec<PathBuf>> {
    let communes = cached_communes(geo, &job.cache_dir.join("communes.json")).await?;

    let files = if job.dvf_files.is_empty() {
        let client = download_client()?;
        download_dvf(&client, &job.dvf_base, &job.cache_dir, job.today.year()).await?
    } else {
        job.dvf_files.clone()
    };

    let mut aggregator = Aggregator::new(job.today, &job.window_days);
    if let Some(start) = aggregator.earliest_start() {
        info!("Aggregating sales since {} from {} file(s)", start, files.len());
    }
    for path in files {
        aggregator = read_dvf_file(aggregator, path).await?;
    }

    let by_code = communes::by_code(&communes);
    let mut written = Vec::new();
    for (days, table) in aggregator.into_tables(&by_code) {
        let path = job.out_dir.join(dvf::table_file_name(days));
        write_json(&path, &table).await?;
        info!("Wrote {} ({} communes)", path.display(), table.data.len());
        written.push(path);
    }
    Ok(written)
}

/// `[{code, nom, dept, lat, lon, population}]` for every located commune.
pub async fn write_communes_min(geo: &GeoClient, out: &Path) -> Result<usize> {
    let rows = communes::min_rows(&geo.all_communes(MIN_FIELDS).await?);
    write_json(out, &rows).await?;
    info!("Wrote {} ({} communes)", out.display(), rows.len());
    Ok(rows.len())
}

/// `{code: population}` for every commune with a known population.
pub async fn write_population(geo: &GeoClient, out: &Path) -> Result<usize> {
    let map = communes::population_map(&geo.all_communes(POPULATION_FIELDS).await?);
    write_json(out, &map).await?;
    info!("Wrote {} ({} communes)", out.display(), map.len());
    Ok(map.len())
}

async fn cached_communes(geo: &GeoClient, path: &Path) -> Result<Vec<CommuneSummary>> {
    if path.exists() {
        let raw = tokio::fs::read(path).await?;
        let communes: Vec<CommuneSummary> = serde_json::from_slice(&raw)
            .with_context(|| format!("Invalid commune cache {}", path.display()))?;
        info!("Using {} ({} communes)", path.display(), communes.len());
        return Ok(communes);
    }
    let communes = geo.all_communes(PRICE_TABLE_FIELDS).await?;
    save(path, serde_json::to_vec_pretty(&communes)?).await?;
    Ok(communes)
}

fn download_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build download client")
}

/// Yearly DVF exports, newest first. Years already in `dir` are reused; years the
/// server does not have yet are skipped.
async fn download_dvf(
    client: &reqwest::Client,
    base: &str,
    dir: &Path,
    year: i32,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let mut paths = Vec::new();
    for y in (year - DVF_YEARS_BACK..=year).rev() {
        let dest = dir.join(format!("dvf_{}.csv.gz", y));
        if !dest.exists() {
            let url = format!("{}/{}/full.csv.gz", base.trim_end_matches('/'), y);
            if let Err(e) = download(client, &url, &dest).await {
                warn!("DVF {} unavailable: {:#}", y, e);
                continue;
            }
        }
        paths.push(dest);
    }
    if paths.is_empty() {
        bail!("No DVF file could be downloaded from {}", base);
    }
    info!("DVF files: {:?}", paths);
    Ok(paths)
}

async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {}", url);
    let mut resp = client.get(url).send().await?.error_for_status()?;

    let pb = ProgressBar::new(resp.content_length().unwrap_or(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")?
            .progress_chars("=> "),
    );

    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await?;
    pb.finish_and_clear();

    tokio::fs::rename(&partial, dest).await?;
    Ok(())
}

/// Feed one CSV (plain or `.gz`) into the aggregator on the blocking pool.
async fn read_dvf_file(mut aggregator: Aggregator, path: PathBuf) -> Result<Aggregator> {
    tokio::task::spawn_blocking(move || {
        let file =
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let reader = BufReader::new(file);
        let stats = if path.extension().is_some_and(|e| e == "gz") {
            aggregator.read(MultiGzDecoder::new(reader))
        } else {
            aggregator.read(reader)
        }
        .with_context(|| format!("Failed to read {}", path.display()))?;
        info!(
            "{}: {} rows, {} sales kept, {} malformed",
            path.display(),
            stats.rows,
            stats.kept,
            stats.malformed
        );
        Ok::<_, anyhow::Error>(aggregator)
    })
    .await?
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    save(path, serde_json::to_vec(value)?).await
}

async fn save(path: &Path, bytes: Vec<u8>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
