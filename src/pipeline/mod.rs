//! Pipeline orchestrator: ties token → fetch → aggregate → sinks together.
//!
//! ## Periods
//!
//! A run covers up to two periods, mirroring the reporting sheet:
//!   1. the *default* period (C/D cells, or the N-days-ago window when absent)
//!   2. the *user* period (A/B cells or `--start/--end`), skipped when absent
//!
//! Both periods are fetched concurrently; aggregation and sink writes happen
//! in period order on the calling task. A failure in one period is logged and
//! counted, never fatal to the other.

use crate::aggregator::MetricsAggregator;
use crate::api::token::{self, TokenProvider};
use crate::api::{MetricsFetcher, TikTokClient};
use crate::config::AppConfig;
use crate::dates::{relative_range, ResolvedRanges};
use crate::loader::archive_payload;
use crate::models::{AggregationResult, DateRange};
use crate::sink::{PeriodOutput, ResultSink, WarehouseSink, WorksheetSink};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub label: &'static str,
    pub range: DateRange,
}

/// Default period first (falling back to the relative window), then the user period.
/// A relative window outside chrono's date range drops the default period.
pub fn plan_periods(
    ranges: &ResolvedRanges,
    today: NaiveDate,
    start_days_ago: i64,
    end_days_ago: i64,
) -> Vec<Period> {
    let default = ranges
        .default
        .or_else(|| relative_range(today, start_days_ago, end_days_ago));

    let mut periods = Vec::with_capacity(2);
    match default {
        Some(range) => periods.push(Period { label: "default", range }),
        None => warn!(
            "Default window {}..{} days ago is out of range; skipping the default period",
            start_days_ago, end_days_ago
        ),
    }
    match ranges.user {
        Some(range) => periods.push(Period { label: "user", range }),
        None => info!("No user-specified period; running the default period only"),
    }
    periods
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn periods(&self, ranges: &ResolvedRanges) -> Vec<Period> {
        plan_periods(
            ranges,
            chrono::Local::now().date_naive(),
            self.config.pipeline.default_start_days_ago,
            self.config.pipeline.default_end_days_ago,
        )
    }

    pub async fn run(&self, ranges: &ResolvedRanges) -> Result<PipelineReport> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let fetcher: Arc<dyn MetricsFetcher> = Arc::new(
            TikTokClient::new(&self.config.api).context("Failed to build API client")?,
        );
        let tokens = token::from_config(&self.config).context("No usable token source")?;

        let run_id = repo.begin_fetch_run().unwrap_or(0);
        let periods = self.periods(ranges);
        let outcome = self.execute(fetcher, tokens.as_ref(), &repo, &periods).await;

        let (periods_done, rows, err_msg) = match &outcome {
            Ok(r) => (
                r.stats.periods,
                r.stats.rows_loaded,
                (r.stats.errors > 0).then(|| format!("{} errors", r.stats.errors)),
            ),
            Err(e) => (0, 0, Some(format!("{:#}", e))),
        };
        repo.finish_fetch_run(run_id, periods_done, rows, err_msg.as_deref()).ok();

        outcome
    }

    /// Core of [`run`](Self::run) with collaborators supplied by the caller.
    pub async fn execute(
        &self,
        fetcher: Arc<dyn MetricsFetcher>,
        tokens: &dyn TokenProvider,
        repo: &Repository,
        periods: &[Period],
    ) -> Result<PipelineReport> {
        // ── 1. Token ───────────────────────────────────────────────────────────
        let access_token = tokens
            .access_token()
            .await
            .context("Could not obtain an access token; nothing was fetched")?;

        // ── 2. Fetch all periods ───────────────────────────────────────────────
        info!("=== Fetching {} period(s) ===", periods.len());
        let payloads = fetch_all(fetcher, &access_token, periods, self.config.pipeline.concurrency).await;

        // ── 3. Aggregate + sink ────────────────────────────────────────────────
        let aggregator = MetricsAggregator::from_config(&self.config.metrics);
        let worksheet = WorksheetSink::new(&self.config.output.sheet_path)
            .with_labels(self.config.output.header_labels.clone());
        let warehouse = WarehouseSink::new(repo);
        let sinks: [&dyn ResultSink; 2] = [&worksheet, &warehouse];

        let mut report = PipelineReport::default();
        report.stats.periods = periods.len();

        for (period, fetched) in payloads {
            let payload = match fetched {
                Ok(p) => p,
                Err(e) => {
                    warn!("{} period {}: fetch failed: {:#}", period.label, period.range, e);
                    report.stats.errors += 1;
                    continue;
                }
            };

            let processed_at = Utc::now().naive_utc();
            if self.config.output.archive_raw {
                if let Err(e) = archive_payload(&self.config.output.raw_dir, "profile", &payload, processed_at) {
                    warn!("Could not archive payload: {:#}", e);
                }
            }

            let result = match aggregator.aggregate(&payload, &period.range) {
                Ok(r) => r,
                Err(e) => {
                    warn!("{} period {}: {}", period.label, period.range, e);
                    report.stats.errors += 1;
                    continue;
                }
            };
            log_result(period.label, &result);
            report.stats.aggregated += 1;

            let output = PeriodOutput { result: &result, payload: &payload, processed_at };
            for sink in sinks {
                match sink.write(&output) {
                    Ok(n) if sink.name() == "warehouse" => report.stats.rows_loaded += n,
                    Ok(_) => {}
                    Err(e) => {
                        error!("{} sink failed for {}: {:#}", sink.name(), result.date_range, e);
                        report.stats.errors += 1;
                    }
                }
            }

            report.results.push((period.label, result));
        }

        info!(
            "=== Done: {} periods | {} aggregated | {} rows loaded | {} errors ===",
            report.stats.periods, report.stats.aggregated, report.stats.rows_loaded, report.stats.errors,
        );
        Ok(report)
    }

    /// Fetch the video list for `range` and archive it.
    pub async fn run_videos(&self, range: &DateRange) -> Result<Value> {
        let client = TikTokClient::new(&self.config.api).context("Failed to build API client")?;
        let tokens = token::from_config(&self.config).context("No usable token source")?;
        let access_token = tokens.access_token().await?;

        let payload = client.fetch_videos(&access_token, range).await?;
        archive_payload(&self.config.output.raw_dir, "video", &payload, Utc::now().naive_utc())?;
        Ok(payload)
    }
}

async fn fetch_all(
    fetcher: Arc<dyn MetricsFetcher>,
    access_token: &str,
    periods: &[Period],
    concurrency: usize,
) -> Vec<(Period, Result<Value>)> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::new();

    for period in periods.iter().copied() {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&sem);
        let token = access_token.to_string();

        let handle = tokio::spawn(async move {
            let _permit = sem.acquire().await.ok();
            fetcher
                .fetch_profile(&token, &period.range)
                .await
                .map_err(anyhow::Error::from)
        });
        handles.push((period, handle));
    }

    let mut out = Vec::with_capacity(handles.len());
    for (period, handle) in handles {
        match handle.await {
            Ok(res) => out.push((period, res)),
            Err(e) => {
                error!("Task panic for {} period: {}", period.label, e);
                out.push((period, Err(anyhow::anyhow!("fetch task failed: {}", e))));
            }
        }
    }
    out
}

fn log_result(label: &str, result: &AggregationResult) {
    info!("--- {} period: {} ({} days) ---", label, result.date_range, result.days_in_range);
    info!("  account: {} / {}", result.username, result.display_name);
    for (name, v) in &result.sums {
        info!("  {:<20} {}", name, v);
    }
    for m in &result.increases {
        match m.increase.value() {
            Some(v) => info!("  {:<20} +{} (total {:?})", m.name, v, m.total),
            None => info!("  {:<20} n/a (total {:?})", m.name, m.total),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub periods: usize,
    pub aggregated: usize,
    pub rows_loaded: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub stats: PipelineStats,
    pub results: Vec<(&'static str, AggregationResult)>,
}
