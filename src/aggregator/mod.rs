//! Period sums and start/end deltas over a `/business/get/` payload.
//!
//! The aggregator is a pure function of `(payload, range)`. Shape problems in
//! the payload envelope are reported as [`AggregateError::MalformedInput`];
//! everything below the envelope degrades per field instead of failing:
//!
//!   * a daily record whose date does not parse is dropped,
//!   * a counter that does not coerce to a number is treated as missing,
//!   * missing counters add 0 to sums but make a delta not computable.

pub mod coerce;

use crate::config::MetricsConfig;
use crate::models::{
    AccountSnapshot, AggregationResult, DailyMetric, DateRange, Increase, IncreaseMetric,
    NotComputable,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use self::coerce::{parse_date, parse_date_value, parse_number, text_or};

pub const DEFAULT_SUM_METRICS: [&str; 7] = [
    "unique_video_views",
    "engaged_audience",
    "shares",
    "video_views",
    "profile_views",
    "comments",
    "bio_link_clicks",
];

pub const DEFAULT_INCREASE_METRICS: [&str; 2] = ["followers_count", "total_likes"];

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    #[error("malformed input: {detail}")]
    MalformedInput { detail: String },

    #[error("invalid date {0:?}")]
    InvalidDate(String),
}

#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    sum_metrics: Vec<String>,
    increase_metrics: Vec<String>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(
            DEFAULT_SUM_METRICS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_INCREASE_METRICS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl MetricsAggregator {
    pub fn new(sum_metrics: Vec<String>, increase_metrics: Vec<String>) -> Self {
        Self {
            sum_metrics,
            increase_metrics,
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(config.sum_fields.clone(), config.increase_fields.clone())
    }

    /// Same as [`aggregate`](Self::aggregate) with `YYYY-MM-DD` bounds.
    pub fn aggregate_str(
        &self,
        payload: &Value,
        start_date: &str,
        end_date: &str,
    ) -> Result<AggregationResult, AggregateError> {
        let start = parse_date(start_date)
            .ok_or_else(|| AggregateError::InvalidDate(start_date.to_string()))?;
        let end =
            parse_date(end_date).ok_or_else(|| AggregateError::InvalidDate(end_date.to_string()))?;
        self.aggregate(payload, &DateRange::new(start, end))
    }

    pub fn aggregate(
        &self,
        payload: &Value,
        range: &DateRange,
    ) -> Result<AggregationResult, AggregateError> {
        debug!("Aggregating {}", range);

        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| malformed(payload, "'data' is missing or not an object"))?;

        let raw_metrics = data
            .get("metrics")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(payload, "'data.metrics' is missing or not an array"))?;

        let snapshot = self.snapshot(data);
        let daily = self.daily_metrics(raw_metrics);

        let in_range: Vec<&DailyMetric> = daily.iter().filter(|m| range.contains(m.date)).collect();
        if in_range.is_empty() {
            info!("No daily records inside {}", range);
        }

        let sums = self
            .sum_metrics
            .iter()
            .map(|name| {
                // `Sum for f64` starts at -0.0; an empty window must report +0.
                let total = in_range
                    .iter()
                    .filter_map(|m| m.get(name))
                    .fold(0.0, |acc, v| acc + v);
                (name.clone(), total)
            })
            .collect();

        let increases = self
            .increase_metrics
            .iter()
            .map(|name| IncreaseMetric {
                name: name.clone(),
                increase: increase_over(&in_range, name),
                total: snapshot.total(name),
            })
            .collect();

        Ok(AggregationResult {
            range: *range,
            date_range: range.label(),
            username: snapshot.username,
            display_name: snapshot.display_name,
            sums,
            increases,
            days_in_range: in_range.len(),
        })
    }

    /// Account-level fields; each one falls back independently.
    pub fn snapshot(&self, data: &Map<String, Value>) -> AccountSnapshot {
        AccountSnapshot {
            username: text_or(data.get("username"), UNKNOWN),
            display_name: text_or(data.get("display_name"), UNKNOWN),
            totals: self
                .increase_metrics
                .iter()
                .map(|name| (name.clone(), data.get(name).and_then(parse_number)))
                .collect(),
        }
    }

    /// Parse, filter and date-sort the `metrics` array.
    pub fn daily_metrics(&self, raw: &[Value]) -> Vec<DailyMetric> {
        let mut out = Vec::with_capacity(raw.len());
        let mut dropped = 0usize;

        for entry in raw {
            let Some(obj) = entry.as_object() else {
                dropped += 1;
                continue;
            };
            let Some(date) = obj.get("date").and_then(parse_date_value) else {
                dropped += 1;
                continue;
            };

            let values = self
                .sum_metrics
                .iter()
                .chain(self.increase_metrics.iter())
                .filter_map(|name| {
                    obj.get(name)
                        .and_then(parse_number)
                        .map(|v| (name.clone(), v))
                })
                .collect();

            out.push(DailyMetric { date, values });
        }

        if dropped > 0 {
            warn!("Dropped {} daily records without a usable date", dropped);
        }

        // Stable: records sharing a date keep their payload order.
        out.sort_by_key(|m| m.date);
        out
    }
}

fn increase_over(in_range: &[&DailyMetric], metric: &str) -> Increase {
    let (Some(first), Some(last)) = (in_range.first(), in_range.last()) else {
        return Increase::NotComputable(NotComputable::NoDataInRange);
    };

    if first.date == last.date {
        return Increase::Value(0.0);
    }

    match (first.get(metric), last.get(metric)) {
        (Some(a), Some(b)) => Increase::Value(b - a),
        _ => {
            warn!(
                "{}: no numeric value on {} or {}, increase not computable",
                metric, first.date, last.date
            );
            Increase::NotComputable(NotComputable::PartialData)
        }
    }
}

fn malformed(payload: &Value, what: &str) -> AggregateError {
    let detail = match payload.get("message").and_then(Value::as_str) {
        Some(msg) => format!("{} (API message: {})", what, msg),
        None => what.to_string(),
    };
    warn!("Malformed payload: {}", detail);
    AggregateError::MalformedInput { detail }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b))
    }

    fn payload(metrics: Value) -> Value {
        json!({
            "code": 0,
            "message": "OK",
            "data": {
                "username": "la_flama_blanca",
                "display_name": "Display Name",
                "followers_count": 1124,
                "total_likes": "3000",
                "metrics": metrics,
            }
        })
    }

    #[test]
    fn test_sums_and_increases_over_window() {
        let p = payload(json!([
            {"date": "2024-05-25", "video_views": 26, "followers_count": 1100, "total_likes": 2900},
            {"date": "2024-05-26", "video_views": 15, "followers_count": 1110, "total_likes": 2950},
            {"date": "2024-05-27", "video_views": 19, "followers_count": 1124, "total_likes": 3000},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-27"))
            .unwrap();

        assert_eq!(result.username, "la_flama_blanca");
        assert_eq!(result.display_name, "Display Name");
        assert_eq!(result.date_range, "2024-05-25 から 2024-05-27");
        assert_eq!(result.sum("video_views"), Some(60.0));
        assert_eq!(result.sum("comments"), Some(0.0));
        assert_eq!(result.days_in_range, 3);

        let followers = result.increase("followers_count").unwrap();
        assert_eq!(followers.increase, Increase::Value(24.0));
        assert_eq!(followers.total, Some(1124.0));

        let likes = result.increase("total_likes").unwrap();
        assert_eq!(likes.increase, Increase::Value(100.0));
        assert_eq!(likes.total, Some(3000.0));
    }

    #[test]
    fn test_string_counters_and_top_level_only_followers() {
        let p = json!({
            "data": {
                "username": "shop",
                "followers_count": 500,
                "metrics": [
                    {"date": "2024-05-25", "video_views": "10"},
                    {"date": "2024-05-27", "video_views": "30"},
                ]
            }
        });

        let result = MetricsAggregator::default()
            .aggregate_str(&p, "2024-05-25", "2024-05-27")
            .unwrap();

        assert_eq!(result.sum("video_views"), Some(40.0));
        assert!(result.increase("video_views").is_none());

        let followers = result.increase("followers_count").unwrap();
        assert_eq!(
            followers.increase,
            Increase::NotComputable(NotComputable::PartialData)
        );
        assert_eq!(followers.total, Some(500.0));
        assert_eq!(result.display_name, "unknown");
    }

    #[test]
    fn test_empty_window_is_not_zero() {
        let p = payload(json!([
            {"date": "2024-05-01", "video_views": 5, "followers_count": 10},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-06-01", "2024-06-07"))
            .unwrap();

        for (_, v) in &result.sums {
            assert_eq!(*v, 0.0);
        }
        for m in &result.increases {
            assert_eq!(
                m.increase,
                Increase::NotComputable(NotComputable::NoDataInRange)
            );
        }
        assert_eq!(result.days_in_range, 0);
    }

    #[test]
    fn test_empty_window_sums_are_positive_zero() {
        let p = payload(json!([
            {"date": "2024-05-25", "followers_count": 100},
            {"date": "2024-05-26", "followers_count": 110},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-26"))
            .unwrap();
        for (name, v) in &result.sums {
            assert!(!v.is_sign_negative(), "{} is -0.0", name);
        }
        assert_eq!(result.to_record()["comments"], json!(0.0));

        let empty = MetricsAggregator::default()
            .aggregate(&p, &range("2025-01-01", "2025-01-02"))
            .unwrap();
        assert!(empty.sums.iter().all(|(_, v)| !v.is_sign_negative()));
        let text = serde_json::to_string(&empty).unwrap();
        assert!(!text.contains("-0.0"), "{}", text);
    }

    #[test]
    fn test_duplicate_dates_are_kept() {
        let p = payload(json!([
            {"date": "2024-05-26", "video_views": 7, "followers_count": 7},
            {"date": "2024-05-25", "video_views": 1, "followers_count": 1},
            {"date": "2024-05-25", "video_views": 2, "followers_count": 2},
            {"date": "2024-05-26", "video_views": 9, "followers_count": 9},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-26"))
            .unwrap();

        assert_eq!(result.days_in_range, 4);
        assert_eq!(result.sum("video_views"), Some(19.0));
        // first record of the earliest date, last record of the latest date
        assert_eq!(
            result.increase("followers_count").unwrap().increase,
            Increase::Value(8.0)
        );
    }

    #[test]
    fn test_empty_metrics_array_still_returns_snapshot() {
        let result = MetricsAggregator::default()
            .aggregate(&payload(json!([])), &range("2024-05-25", "2024-05-27"))
            .unwrap();

        assert_eq!(result.username, "la_flama_blanca");
        assert_eq!(
            result.increase("total_likes").unwrap().increase,
            Increase::NotComputable(NotComputable::NoDataInRange)
        );
        assert_eq!(result.increase("total_likes").unwrap().total, Some(3000.0));
    }

    #[test]
    fn test_single_day_window_reports_zero_increase() {
        let p = payload(json!([
            {"date": "2024-05-25", "followers_count": 1100},
            {"date": "2024-05-26", "followers_count": 1110},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-26", "2024-05-26"))
            .unwrap();

        let followers = result.increase("followers_count").unwrap();
        assert_eq!(followers.increase, Increase::Value(0.0));
        assert_eq!(followers.total, Some(1124.0));
        // total_likes absent from the daily row still reports 0 for one day
        assert_eq!(
            result.increase("total_likes").unwrap().increase,
            Increase::Value(0.0)
        );
    }

    #[test]
    fn test_sum_is_independent_of_record_order() {
        let rows = vec![
            json!({"date": "2024-05-27", "shares": 3, "followers_count": 30}),
            json!({"date": "2024-05-25", "shares": 1, "followers_count": 10}),
            json!({"date": "2024-05-26", "shares": 2}),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();

        let agg = MetricsAggregator::default();
        let w = range("2024-05-25", "2024-05-27");
        let a = agg.aggregate(&payload(Value::Array(rows)), &w).unwrap();
        let b = agg.aggregate(&payload(Value::Array(reversed)), &w).unwrap();

        assert_eq!(a.sums, b.sums);
        assert_eq!(a.sum("shares"), Some(6.0));
        assert_eq!(
            a.increase("followers_count").unwrap().increase,
            Increase::Value(20.0)
        );
        assert_eq!(a.increases, b.increases);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let p = payload(json!([
            {"date": "2024-05-24", "comments": 100},
            {"date": "2024-05-25", "comments": 1},
            {"date": "2024-05-27", "comments": 2},
            {"date": "2024-05-28", "comments": 100},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-27"))
            .unwrap();
        assert_eq!(result.sum("comments"), Some(3.0));
        assert_eq!(result.days_in_range, 2);
    }

    #[test]
    fn test_bad_dates_are_excluded_only() {
        let p = payload(json!([
            {"date": "2024-05-25", "profile_views": 4, "followers_count": 100},
            {"date": "garbage", "profile_views": 1000, "followers_count": 0},
            {"profile_views": 1000},
            "not an object",
            {"date": "2024-05-26", "profile_views": 6, "followers_count": 105},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-26"))
            .unwrap();

        assert_eq!(result.sum("profile_views"), Some(10.0));
        assert_eq!(
            result.increase("followers_count").unwrap().increase,
            Increase::Value(5.0)
        );
    }

    #[test]
    fn test_uncoercible_counter_is_missing_not_zero() {
        let p = payload(json!([
            {"date": "2024-05-25", "video_views": "n/a", "followers_count": "oops", "total_likes": 10},
            {"date": "2024-05-26", "video_views": 7, "followers_count": 20, "total_likes": 15},
        ]));

        let result = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-26"))
            .unwrap();

        assert_eq!(result.sum("video_views"), Some(7.0));
        assert_eq!(
            result.increase("followers_count").unwrap().increase,
            Increase::NotComputable(NotComputable::PartialData)
        );
        assert_eq!(
            result.increase("total_likes").unwrap().increase,
            Increase::Value(5.0)
        );
    }

    #[test]
    fn test_missing_data_is_malformed_input() {
        let p = json!({"code": 40100, "message": "Too many requests"});
        let err = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-27"))
            .unwrap_err();

        match err {
            AggregateError::MalformedInput { detail } => {
                assert!(detail.contains("'data'"));
                assert!(detail.contains("Too many requests"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_array_metrics_is_malformed_input() {
        let p = json!({"data": {"username": "x", "metrics": {"date": "2024-05-25"}}});
        let err = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-27"))
            .unwrap_err();
        assert!(matches!(err, AggregateError::MalformedInput { .. }));

        let p = json!({"data": []});
        let err = MetricsAggregator::default()
            .aggregate(&p, &range("2024-05-25", "2024-05-27"))
            .unwrap_err();
        assert!(matches!(err, AggregateError::MalformedInput { .. }));
    }

    #[test]
    fn test_invalid_bounds_are_rejected() {
        let err = MetricsAggregator::default()
            .aggregate_str(&payload(json!([])), "yesterday", "2024-05-27")
            .unwrap_err();
        assert_eq!(err, AggregateError::InvalidDate("yesterday".into()));
    }

    #[test]
    fn test_custom_metric_lists() {
        let agg = MetricsAggregator::new(vec!["shares".into()], vec!["video_views".into()]);
        let p = payload(json!([
            {"date": "2024-05-25", "shares": 1, "video_views": 100},
            {"date": "2024-05-26", "shares": 2, "video_views": 180},
        ]));

        let result = agg.aggregate(&p, &range("2024-05-25", "2024-05-26")).unwrap();
        assert_eq!(result.sums, vec![("shares".to_string(), 3.0)]);
        assert_eq!(result.increases.len(), 1);
        assert_eq!(result.increases[0].increase, Increase::Value(80.0));
        assert_eq!(result.increases[0].total, None);
    }
}
