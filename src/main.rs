mod batch;
mod candidates;
mod communes;
mod config;
mod dvf;
mod extract;
mod fetch;
mod geo;
mod lookup;
mod model;
mod search;
mod server;
mod slug;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::fetch::HttpFetcher;
use crate::geo::GeoClient;

#[derive(Parser)]
#[command(name = "immo_prices", about = "Price per m² lookup for French municipalities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the lookup over HTTP (GET /api/prices?name=..&insee=..)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },
    /// Run one lookup and print the JSON response
    Lookup {
        /// Municipality name (e.g. "Saint-Étienne")
        #[arg(long)]
        name: String,
        /// INSEE code (e.g. 42218)
        #[arg(long)]
        insee: String,
        /// Include the attempt trace
        #[arg(long)]
        debug: bool,
    },
    /// Resolve the location and list candidate URLs without fetching them
    Candidates {
        #[arg(long)]
        name: String,
        #[arg(long)]
        insee: String,
    },
    /// Build median price-per-m² tables per commune from DVF sales
    BuildPrices {
        /// DVF CSV files (.csv or .csv.gz); the last three yearly exports are
        /// downloaded into --cache-dir when none is given
        #[arg(long = "dvf")]
        dvf: Vec<PathBuf>,
        /// Look-back windows in days; one prices_<months>.json per window
        #[arg(long, default_values_t = [365, 730])]
        window_days: Vec<i64>,
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
        /// Where communes.json and downloaded DVF files are kept between runs
        #[arg(long, default_value = "data/cache")]
        cache_dir: PathBuf,
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Write the compact commune list (code, name, department, centre, population)
    Communes {
        #[arg(long, default_value = "data/communes_min.json")]
        out: PathBuf,
    },
    /// Write INSEE code -> population
    Population {
        #[arg(long, default_value = "data/population.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("Fetch strategy: {}", config.strategy.label());

    let geo_api = GeoClient::new(&config.geo_api_base)?;

    match cli.command {
        Commands::Serve { bind } => {
            let fetcher = HttpFetcher::new(config.strategy, config.fetch_timeout)?;
            let state = server::AppState {
                geo: Arc::new(geo_api),
                fetcher: Arc::new(fetcher),
                site: Arc::new(config.site),
            };
            server::serve(bind, state).await
        }
        Commands::Lookup { name, insee, debug } => {
            let fetcher = HttpFetcher::new(config.strategy, config.fetch_timeout)?;
            let response =
                lookup::lookup(&geo_api, &fetcher, &config.site, &name, &insee, debug).await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            let elapsed = t0.elapsed();
            if elapsed.as_secs() >= 1 {
                eprintln!("\nDone in {}", format_duration(elapsed));
            }
            Ok(())
        }
        Commands::Candidates { name, insee } => {
            let location = geo::resolve_location(&geo_api, &name, &insee).await;
            println!(
                "{} ({}) | postal: {} | department: {} | region: {}",
                location.name,
                location.insee_code,
                location.postal_code.as_deref().unwrap_or("-"),
                location.department_name.as_deref().unwrap_or("-"),
                location.region_name.as_deref().unwrap_or("-"),
            );
            println!("{}", "-".repeat(60));
            let urls = candidates::build_candidates(&config.site.listing_base, &location.slugs());
            for (i, url) in urls.iter().enumerate() {
                println!("{:>2}. {}", i + 1, url);
            }
            Ok(())
        }
        Commands::BuildPrices {
            dvf,
            window_days,
            out_dir,
            cache_dir,
            today,
        } => {
            let job = batch::PriceBuild {
                dvf_files: dvf,
                window_days,
                out_dir,
                cache_dir,
                today: today.unwrap_or_else(|| chrono::Local::now().date_naive()),
                dvf_base: config.dvf_base,
            };
            let written = batch::build_prices(&geo_api, &job).await?;
            for path in &written {
                println!("{}", path.display());
            }
            eprintln!("\nDone in {}", format_duration(t0.elapsed()));
            Ok(())
        }
        Commands::Communes { out } => {
            let n = batch::write_communes_min(&geo_api, &out).await?;
            println!("{} ({} communes)", out.display(), n);
            Ok(())
        }
        Commands::Population { out } => {
            let n = batch::write_population(&geo_api, &out).await?;
            println!("{} ({} communes)", out.display(), n);
            Ok(())
        }
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
