//! Date-range resolution for the two reporting periods.
//!
//! The reporting sheet keeps four date cells in one row: the user-chosen
//! start/end (A, B) and the default start/end (C, D). Cells arrive as text in
//! one of several formats or as a spreadsheet serial number.

use crate::models::DateRange;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use std::path::Path;
use tracing::{debug, warn};

/// Day zero of spreadsheet serial dates.
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

const CELL_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedRanges {
    pub user: Option<DateRange>,
    pub default: Option<DateRange>,
}

/// Normalize one cell to a date.
/// "2024-05-25" | "2024/05/25" | "05/25/2024" | "45437" (serial) → 2024-05-25
pub fn parse_cell(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in CELL_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    let serial: f64 = s.parse().ok()?;
    from_serial(serial)
}

/// Spreadsheet serial day number → date. Fractional parts (time of day) are dropped.
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Both cells must parse; the pair is swapped when reversed.
pub fn normalize_pair(start: Option<&str>, end: Option<&str>) -> Option<DateRange> {
    let start_raw = start?;
    let end_raw = end?;

    let Some(a) = parse_cell(start_raw) else {
        warn!("Unrecognised date cell {:?}", start_raw);
        return None;
    };
    let Some(b) = parse_cell(end_raw) else {
        warn!("Unrecognised date cell {:?}", end_raw);
        return None;
    };

    if a > b {
        debug!("Swapping reversed pair {} / {}", a, b);
    }
    Some(DateRange::new(a, b))
}

/// `today` minus `days`; `None` when the result leaves chrono's date range.
pub fn days_before(today: NaiveDate, days: i64) -> Option<NaiveDate> {
    today.checked_sub_signed(Duration::try_days(days)?)
}

/// Window between `start_days_ago` and `end_days_ago` days before `today`.
pub fn relative_range(today: NaiveDate, start_days_ago: i64, end_days_ago: i64) -> Option<DateRange> {
    Some(DateRange::new(
        days_before(today, start_days_ago)?,
        days_before(today, end_days_ago)?,
    ))
}

/// Resolve both pairs from the four cells `[A, B, C, D]`.
pub fn resolve_cells(cells: &[String]) -> ResolvedRanges {
    let cell = |i: usize| cells.get(i).map(String::as_str).filter(|s| !s.trim().is_empty());
    ResolvedRanges {
        user: normalize_pair(cell(0), cell(1)),
        default: normalize_pair(cell(2), cell(3)),
    }
}

/// Read the first data row of a CSV export of the date cells.
pub fn read_dates_file(path: &Path) -> Result<ResolvedRanges> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open dates file {:?}", path))?;

    let Some(record) = reader.records().next() else {
        warn!("Dates file {:?} has no data row", path);
        return Ok(ResolvedRanges::default());
    };
    let record = record.with_context(|| format!("Malformed row in {:?}", path))?;

    let cells: Vec<String> = record.iter().map(|s| s.to_string()).collect();
    debug!("Date cells from {:?}: {:?}", path, cells);
    Ok(resolve_cells(&cells))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_cell_formats() {
        assert_eq!(parse_cell("2024-05-25"), Some(d(2024, 5, 25)));
        assert_eq!(parse_cell("2024/05/25"), Some(d(2024, 5, 25)));
        assert_eq!(parse_cell("05/25/2024"), Some(d(2024, 5, 25)));
        assert_eq!(parse_cell(" 45437 "), Some(d(2024, 5, 25)));
        assert_eq!(parse_cell("45437.75"), Some(d(2024, 5, 25)));
        assert_eq!(parse_cell("next week"), None);
        assert_eq!(parse_cell(""), None);
        assert_eq!(parse_cell("-3"), None);
    }

    #[test]
    fn test_normalize_pair_swaps_and_requires_both() {
        assert_eq!(
            normalize_pair(Some("2024-05-27"), Some("2024/05/25")),
            Some(DateRange::new(d(2024, 5, 25), d(2024, 5, 27)))
        );
        assert_eq!(normalize_pair(Some("2024-05-27"), None), None);
        assert_eq!(normalize_pair(Some("2024-05-27"), Some("bogus")), None);
    }

    #[test]
    fn test_relative_range() {
        let r = relative_range(d(2024, 6, 10), 3, 2).unwrap();
        assert_eq!(r.start(), d(2024, 6, 7));
        assert_eq!(r.end(), d(2024, 6, 8));

        let swapped = relative_range(d(2024, 6, 10), 2, 3).unwrap();
        assert_eq!(swapped, r);
    }

    #[test]
    fn test_huge_offsets_do_not_panic() {
        assert_eq!(days_before(d(2024, 6, 10), i64::MAX), None);
        assert_eq!(days_before(d(2024, 6, 10), 400_000_000), None);
        assert_eq!(days_before(d(2024, 6, 10), -1), Some(d(2024, 6, 11)));
        assert_eq!(relative_range(d(2024, 6, 10), i64::MAX, 2), None);
    }

    #[test]
    fn test_resolve_cells_partial_row() {
        let cells = vec!["2024-05-01".to_string(), "2024-05-07".to_string(), "".to_string()];
        let resolved = resolve_cells(&cells);
        assert_eq!(resolved.user, Some(DateRange::new(d(2024, 5, 1), d(2024, 5, 7))));
        assert_eq!(resolved.default, None);
    }

    #[test]
    fn test_read_dates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_start,user_end,default_start,default_end").unwrap();
        writeln!(file, "2024/05/01,2024/05/07,45437,45439").unwrap();

        let resolved = read_dates_file(file.path()).unwrap();
        assert_eq!(resolved.user, Some(DateRange::new(d(2024, 5, 1), d(2024, 5, 7))));
        assert_eq!(resolved.default, Some(DateRange::new(d(2024, 5, 25), d(2024, 5, 27))));
    }
}
