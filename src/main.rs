mod aggregator;
mod api;
mod config;
mod dates;
mod loader;
mod models;
mod pipeline;
mod sink;
mod storage;
mod utils;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::aggregator::MetricsAggregator;
use crate::api::token::RefreshingTokenProvider;
use crate::config::AppConfig;
use crate::dates::{days_before, normalize_pair, read_dates_file, relative_range, ResolvedRanges};
use crate::loader::{discover_json_files, flatten_payload, load_payload};
use crate::pipeline::Pipeline;
use crate::sink::export_rows;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "tiktok-insights", about = "TikTok Business profile metrics ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, aggregate and store profile metrics for the default and user periods
    Profile {
        /// User period start (any supported date format)
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// User period end
        #[arg(long, requires = "start")]
        end: Option<String>,

        /// CSV export of the sheet's date cells (user start, user end, default start, default end)
        #[arg(long, env = "TIKTOK_DATES_FILE")]
        dates_file: Option<PathBuf>,
    },

    /// Aggregate a saved payload file offline and print the result as JSON
    Aggregate {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },

    /// Fetch the video list and archive the raw payload
    Videos {
        #[arg(long, requires = "end")]
        start: Option<String>,

        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Exchange the stored refresh token and rewrite the credential file
    RefreshToken,

    /// Load archived profile payloads (*.json) into the warehouse
    Import {
        /// Directory of payload files (default: output.raw_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Write the last N days of warehouse rows to a CSV worksheet
    Export {
        #[arg(short, long, default_value_t = 7)]
        days: i64,

        #[arg(short, long, default_value = "data/profile_export.csv")]
        out: PathBuf,
    },

    /// Show warehouse statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "tiktok_insights=info,warn",
        1 => "tiktok_insights=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Profile { start, end, dates_file } => {
            let _t = utils::Timer::start("Profile metrics");

            let mut ranges = match dates_file.or_else(|| config.pipeline.dates_file.clone()) {
                Some(path) => read_dates_file(&path)?,
                None => ResolvedRanges::default(),
            };
            if start.is_some() {
                ranges.user = normalize_pair(start.as_deref(), end.as_deref());
                if ranges.user.is_none() {
                    bail!("Could not parse --start/--end");
                }
            }

            let report = Pipeline::new(config).run(&ranges).await?;
            for (label, result) in &report.results {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                    "period": label,
                    "result": result,
                }))?);
            }
            info!(
                "Done: {} periods, {} aggregated, {} rows loaded, {} errors",
                report.stats.periods, report.stats.aggregated,
                report.stats.rows_loaded, report.stats.errors
            );
        }

        Command::Aggregate { file, start, end } => {
            let payload = load_payload(&file)?;
            let aggregator = MetricsAggregator::from_config(&config.metrics);
            let result = aggregator
                .aggregate_str(&payload, &start, &end)
                .with_context(|| format!("Aggregation of {:?} failed", file))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Videos { start, end } => {
            let _t = utils::Timer::start("Video list");
            let range = match normalize_pair(start.as_deref(), end.as_deref()) {
                Some(r) => r,
                None if start.is_some() => bail!("Could not parse --start/--end"),
                None => relative_range(
                    Local::now().date_naive(),
                    config.pipeline.default_start_days_ago,
                    config.pipeline.default_end_days_ago,
                )
                .ok_or_else(|| anyhow!("pipeline.default_*_days_ago is out of range"))?,
            };
            let payload = Pipeline::new(config).run_videos(&range).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }

        Command::RefreshToken => {
            let provider = RefreshingTokenProvider::new(&config.api, &config.auth)?;
            let pair = provider.refresh().await?;
            println!(
                "Access token refreshed ({}…); refresh token {}.",
                pair.access_token.chars().take(8).collect::<String>(),
                if pair.refresh_token.is_some() { "rotated" } else { "unchanged" }
            );
        }

        Command::Import { dir } => {
            let _t = utils::Timer::start("Payload import");
            let dir = dir.unwrap_or_else(|| config.output.raw_dir.clone());
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;

            let files = discover_json_files(&dir)?;
            info!("Found {} payload files in {:?}", files.len(), dir);

            let mut total_rows = 0usize;
            let mut errors = 0usize;
            let now = Utc::now().naive_utc();

            for path in &files {
                match load_payload(path) {
                    Ok(payload) => {
                        let rows = flatten_payload(&payload, now);
                        if rows.is_empty() {
                            warn!("{:?}: no daily rows", path);
                        }
                        total_rows += repo.append_profile_rows(&rows)?;
                    }
                    Err(e) => {
                        warn!("Error loading {:?}: {:#}", path, e);
                        errors += 1;
                    }
                }
            }

            info!("Done: {} rows inserted, {} errors", total_rows, errors);
        }

        Command::Export { days, out } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let since = days_before(Local::now().date_naive(), days)
                .ok_or_else(|| anyhow!("--days {} is out of range", days))?;
            let rows = repo.rows_since(since)?;
            let n = export_rows(&rows, &out)?;
            println!("Exported {} rows since {} to {:?}", n, since, out);
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let rows = repo.row_count()?;
            let accounts = repo.account_count()?;
            let results = repo.aggregation_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            let last = repo.last_run_status().ok().flatten();
            println!("─────────────────────────────────");
            println!("  TikTok Insights — Warehouse Stats");
            println!("─────────────────────────────────");
            println!("  Accounts   : {}", utils::fmt_number(accounts));
            println!("  Daily rows : {}", utils::fmt_number(rows));
            println!("  Results    : {}", utils::fmt_number(results));
            println!("  From       : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To         : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  Last run   : {}", last.unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
