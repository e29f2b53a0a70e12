//! Destinations for aggregated results.

use crate::loader::flatten_payload;
use crate::models::{AggregationResult, Increase, ProfileMetricRow};
use crate::storage::Repository;
use crate::utils::fmt_metric;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything a sink may need about one aggregated period.
pub struct PeriodOutput<'a> {
    pub result: &'a AggregationResult,
    pub payload: &'a Value,
    pub processed_at: NaiveDateTime,
}

pub trait ResultSink {
    fn name(&self) -> &'static str;

    /// Persist one period; returns the number of rows written.
    fn write(&self, output: &PeriodOutput<'_>) -> Result<usize>;
}

// ── Worksheet (CSV) ───────────────────────────────────────────────────────────

/// Appends one row per result to a CSV worksheet.
pub struct WorksheetSink {
    path: PathBuf,
    labels: HashMap<String, String>,
}

impl WorksheetSink {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf(), labels: HashMap::new() }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    fn header(&self, result: &AggregationResult) -> Vec<String> {
        result
            .column_names()
            .into_iter()
            .map(|col| self.labels.get(&col).cloned().unwrap_or(col))
            .collect()
    }
}

/// Cells in [`AggregationResult::column_names`] order.
pub fn worksheet_cells(result: &AggregationResult) -> Vec<String> {
    let mut cells = vec![result.username.clone(), result.display_name.clone()];
    cells.extend(result.sums.iter().map(|(_, v)| fmt_metric(*v)));
    for m in &result.increases {
        cells.push(match m.increase {
            Increase::Value(v) => fmt_metric(v),
            Increase::NotComputable(_) => "N/A".to_string(),
        });
        cells.push(m.total.map(fmt_metric).unwrap_or_default());
    }
    cells.push(result.date_range.clone());
    cells
}

impl ResultSink for WorksheetSink {
    fn name(&self) -> &'static str {
        "worksheet"
    }

    fn write(&self, output: &PeriodOutput<'_>) -> Result<usize> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }

        let is_new = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open worksheet {:?}", self.path))?;

        let mut writer = csv::Writer::from_writer(file);
        if is_new {
            writer.write_record(self.header(output.result))?;
        }
        writer.write_record(worksheet_cells(output.result))?;
        writer.flush()?;

        info!("Appended {} to {:?}", output.result.date_range, self.path);
        Ok(1)
    }
}

// ── Warehouse (DuckDB) ────────────────────────────────────────────────────────

/// Loads the flattened daily rows plus the aggregation record.
pub struct WarehouseSink<'r> {
    repo: &'r Repository,
}

impl<'r> WarehouseSink<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }
}

impl ResultSink for WarehouseSink<'_> {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    fn write(&self, output: &PeriodOutput<'_>) -> Result<usize> {
        let rows = flatten_payload(output.payload, output.processed_at);
        let n = self.repo.append_period(&rows, output.result)?;
        info!("Loaded {} daily rows for {}", n, output.result.date_range);
        Ok(n)
    }
}

// ── Export ────────────────────────────────────────────────────────────────────

/// Overwrite `path` with warehouse rows, header first.
pub fn export_rows(rows: &[ProfileMetricRow], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}
