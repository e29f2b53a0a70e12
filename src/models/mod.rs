use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

// ── Date range ────────────────────────────────────────────────────────────────

/// Inclusive `[start, end]` window. Always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Builds a range, swapping the bounds when given in reverse.
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Human label carried into every result row.
    pub fn label(&self) -> String {
        format!("{} から {}", self.start, self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.start, self.end)
    }
}

// ── Account snapshot ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub username: String,
    pub display_name: String,
    /// Cumulative counters keyed by increase-metric name, in configured order.
    pub totals: Vec<(String, Option<f64>)>,
}

impl AccountSnapshot {
    pub fn total(&self, metric: &str) -> Option<f64> {
        self.totals
            .iter()
            .find(|(name, _)| name == metric)
            .and_then(|(_, v)| *v)
    }
}

// ── Daily metric ──────────────────────────────────────────────────────────────

/// One day's measurements. A counter that is absent or failed coercion has
/// no entry in `values`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub values: HashMap<String, f64>,
}

impl DailyMetric {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

// ── Aggregation result ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotComputable {
    /// The window contained no daily record at all.
    NoDataInRange,
    /// A boundary record lacked a numeric value for this metric.
    PartialData,
}

impl NotComputable {
    pub fn describe(&self) -> &'static str {
        match self {
            NotComputable::NoDataInRange => "not computable (no data in range)",
            NotComputable::PartialData => "not computable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Increase {
    Value(f64),
    NotComputable(NotComputable),
}

impl Increase {
    pub fn value(&self) -> Option<f64> {
        match self {
            Increase::Value(v) => Some(*v),
            Increase::NotComputable(_) => None,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Increase::Value(v) => json_number(v),
            Increase::NotComputable(reason) => Value::String(reason.describe().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncreaseMetric {
    pub name: String,
    pub increase: Increase,
    /// Taken from the account snapshot, never recomputed from daily rows.
    pub total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    pub range: DateRange,
    pub date_range: String,
    pub username: String,
    pub display_name: String,
    pub sums: Vec<(String, f64)>,
    pub increases: Vec<IncreaseMetric>,
    /// Number of daily records that fell inside the window.
    pub days_in_range: usize,
}

impl AggregationResult {
    pub fn sum(&self, metric: &str) -> Option<f64> {
        self.sums.iter().find(|(n, _)| n == metric).map(|(_, v)| *v)
    }

    pub fn increase(&self, metric: &str) -> Option<&IncreaseMetric> {
        self.increases.iter().find(|m| m.name == metric)
    }

    /// Flat record: identity, sums, `{m}_increase` / `{m}_total`, `date_range`.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut rec = Map::new();
        rec.insert("username".into(), Value::String(self.username.clone()));
        rec.insert("display_name".into(), Value::String(self.display_name.clone()));
        for (name, v) in &self.sums {
            rec.insert(name.clone(), json_number(*v));
        }
        for m in &self.increases {
            rec.insert(format!("{}_increase", m.name), m.increase.to_json());
            rec.insert(
                format!("{}_total", m.name),
                m.total.map(json_number).unwrap_or(Value::Null),
            );
        }
        rec.insert("date_range".into(), Value::String(self.date_range.clone()));
        rec
    }

    /// Column order used by worksheet rows.
    pub fn column_names(&self) -> Vec<String> {
        let mut cols = vec!["username".to_string(), "display_name".to_string()];
        cols.extend(self.sums.iter().map(|(n, _)| n.clone()));
        for m in &self.increases {
            cols.push(format!("{}_increase", m.name));
            cols.push(format!("{}_total", m.name));
        }
        cols.push("date_range".to_string());
        cols
    }
}

impl Serialize for AggregationResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

fn json_number(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// ── Warehouse row ─────────────────────────────────────────────────────────────

/// One flattened daily record joined with its account fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetricRow {
    pub request_id: String,
    pub username: String,
    pub display_name: String,
    pub total_likes: Option<f64>,
    pub followers_count: Option<f64>,
    pub processed_at: NaiveDateTime,
    pub metrics_date: Option<NaiveDate>,
    #[serde(rename = "metrics_video_views")]
    pub video_views: Option<f64>,
    #[serde(rename = "metrics_unique_video_views")]
    pub unique_video_views: Option<f64>,
    #[serde(rename = "metrics_profile_views")]
    pub profile_views: Option<f64>,
    #[serde(rename = "metrics_comments")]
    pub comments: Option<f64>,
    #[serde(rename = "metrics_shares")]
    pub shares: Option<f64>,
    #[serde(rename = "metrics_engaged_audience")]
    pub engaged_audience: Option<f64>,
    #[serde(rename = "metrics_bio_link_clicks")]
    pub bio_link_clicks: Option<f64>,
}
