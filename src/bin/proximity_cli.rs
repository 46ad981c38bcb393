//! Proximity CLI - operator queries against the establishment store
//!
//! Usage:
//!   cargo run --bin proximity-cli -- rank --lat 38.7169 --lon -9.1393 --limit 10
//!   cargo run --bin proximity-cli -- can-review --establishment e1 --user u1 --lat 38.7169 --lon -9.1393
//!   cargo run --bin proximity-cli -- distance 38.7169 -9.1393 38.7169 -9.1400

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use proximity_engine::domain::geo::haversine_m;
use proximity_engine::domain::{Coordinates, PositionFix, ReviewAttempt};
use proximity_engine::infra::Config;
use proximity_engine::io::document_store::last_review_at;
use proximity_engine::io::{DocumentStore, HttpDocumentStore};
use proximity_engine::services::proximity_index::top_n;
use proximity_engine::services::{Eligibility, ReviewEligibilityGate};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proximity-cli", version)]
#[command(about = "Query establishment ranking and review eligibility")]
struct Args {
    /// Path to TOML configuration file [default: $CONFIG_FILE, then config/dev.toml]
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List establishments closest to a point (default: configured anchor)
    Rank {
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,
        /// Defaults to ranking.default_top_n
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Check whether a user at a position may review an establishment now
    CanReview {
        #[arg(long)]
        establishment: String,
        #[arg(long)]
        user: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Haversine distance in meters between two points
    Distance {
        #[arg(allow_hyphen_values = true)]
        lat1: f64,
        #[arg(allow_hyphen_values = true)]
        lon1: f64,
        #[arg(allow_hyphen_values = true)]
        lat2: f64,
        #[arg(allow_hyphen_values = true)]
        lon2: f64,
    },
}

fn store(config: &Config) -> anyhow::Result<HttpDocumentStore> {
    HttpDocumentStore::new(config.store_base_url(), config.store_timeout(), config.store_api_key())
}

async fn rank(config: &Config, origin: Coordinates, limit: usize) -> anyhow::Result<()> {
    let candidates = store(config)?.establishments().await.context("Failed to fetch establishments")?;
    let ranked = top_n(origin, candidates, limit);

    println!("Closest {} establishments to {}", ranked.len(), origin);
    for (i, r) in ranked.iter().enumerate() {
        println!("{:>4}. {:>10.1} m  {:<24} {}", i + 1, r.distance_meters, r.candidate.id, r.candidate.name);
    }
    Ok(())
}

async fn can_review(
    config: &Config,
    establishment_id: &str,
    user_id: &str,
    position: Coordinates,
) -> anyhow::Result<bool> {
    let store = store(config)?;
    let establishment = store
        .establishment(establishment_id)
        .await?
        .with_context(|| format!("establishment {} not found", establishment_id))?;
    let prior_review_at = last_review_at(&store, establishment_id, user_id).await?;

    let gate = ReviewEligibilityGate::new(config.review_cooldown(), config.review_max_distance_m());
    let attempt = ReviewAttempt {
        establishment_id: establishment_id.to_string(),
        user_id: user_id.to_string(),
        user_position: PositionFix::now(position.latitude, position.longitude),
        prior_review_at,
    };

    match gate.evaluate(&attempt, establishment.coordinates(), Utc::now()) {
        Eligibility::Allowed => {
            println!("allowed: {} may review {}", user_id, establishment.name);
            Ok(true)
        }
        Eligibility::CoolingDown { remaining } => {
            println!("denied: last review too recent, {}s of cool-down left", remaining.num_seconds());
            Ok(false)
        }
        Eligibility::TooFar { distance_meters } => {
            println!(
                "denied: {:.1} m from {} (limit {:.0} m)",
                distance_meters,
                establishment.name,
                config.review_max_distance_m()
            );
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&Config::config_path(args.config));

    match args.command {
        Command::Rank { lat, lon, limit } => {
            let origin = match (lat, lon) {
                (Some(lat), Some(lon)) => Coordinates::new(lat, lon),
                _ => config.default_anchor(),
            };
            rank(&config, origin, limit.unwrap_or(config.default_top_n())).await?;
        }
        Command::CanReview { establishment, user, lat, lon } => {
            if !can_review(&config, &establishment, &user, Coordinates::new(lat, lon)).await? {
                std::process::exit(1);
            }
        }
        Command::Distance { lat1, lon1, lat2, lon2 } => {
            println!("{:.2}", haversine_m(lat1, lon1, lat2, lon2));
        }
    }
    Ok(())
}
