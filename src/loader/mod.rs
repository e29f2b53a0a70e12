//! Raw payload files: archive fetched responses and flatten them into
//! warehouse rows.

use crate::aggregator::coerce::{parse_date_value, parse_number, text_or};
use crate::models::ProfileMetricRow;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One row per `data.metrics[]` entry, each carrying the account fields.
/// A payload without `data.metrics` yields no rows.
pub fn flatten_payload(payload: &Value, processed_at: NaiveDateTime) -> Vec<ProfileMetricRow> {
    let Some(data) = payload.get("data").and_then(Value::as_object) else {
        warn!("Payload has no 'data' object; nothing to flatten");
        return vec![];
    };
    let Some(metrics) = data.get("metrics").and_then(Value::as_array) else {
        warn!("Payload has no 'data.metrics' array; nothing to flatten");
        return vec![];
    };

    let request_id = text_or(payload.get("request_id"), "");
    let username = text_or(data.get("username"), "");
    let display_name = text_or(data.get("display_name"), "");
    let total_likes = data.get("total_likes").and_then(parse_number);
    let followers_count = data.get("followers_count").and_then(parse_number);

    let empty = Map::new();
    metrics
        .iter()
        .map(|entry| {
            let m = entry.as_object().unwrap_or(&empty);
            let counter = |name: &str| m.get(name).and_then(parse_number);

            ProfileMetricRow {
                request_id: request_id.clone(),
                username: username.clone(),
                display_name: display_name.clone(),
                total_likes,
                followers_count,
                processed_at,
                metrics_date: m.get("date").and_then(parse_date_value),
                video_views: counter("video_views"),
                unique_video_views: counter("unique_video_views"),
                profile_views: counter("profile_views"),
                comments: counter("comments"),
                shares: counter("shares"),
                engaged_audience: counter("engaged_audience"),
                bio_link_clicks: counter("bio_link_clicks"),
            }
        })
        .collect()
}

pub fn load_payload(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let payload = serde_json::from_str(&text)
        .with_context(|| format!("{:?} is not valid JSON", path))?;
    debug!("Loaded payload from {:?}", path);
    Ok(payload)
}

pub fn discover_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Write `payload` as `{dir}/tiktok_{kind}_{YYYYMMDD_HHMMSS}.json`.
pub fn archive_payload(
    dir: &Path,
    kind: &str,
    payload: &Value,
    at: NaiveDateTime,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;

    let mut path = dir.join(format!("tiktok_{}_{}.json", kind, at.format("%Y%m%d_%H%M%S")));
    // Two periods fetched in the same second must not overwrite each other.
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!(
            "tiktok_{}_{}_{}.json",
            kind,
            at.format("%Y%m%d_%H%M%S"),
            n
        ));
        n += 1;
    }

    let body = serde_json::to_string_pretty(payload)?;
    std::fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Archived {} payload to {:?}", kind, path);
    Ok(path)
}
