use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Coerce a JSON value to a finite float.
/// `12` → 12.0 | `"10"` → 10.0 | `" 3.5 "` → 3.5 | `"N/A"`, `null`, `true` → None
pub fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_number_str(s),
        _ => None,
    }
}

pub fn parse_number_str(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse dates as the API and sheet exports write them.
/// "2024-05-25" | "2024/05/25" | "20240525" | "2024-05-25T00:00:00" | "2024-05-25 08:00:00"
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(d);
    }
    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
            return Some(d);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    None
}

pub fn parse_date_value(v: &Value) -> Option<NaiveDate> {
    v.as_str().and_then(parse_date)
}

/// Text field with a fallback for absent or null values.
pub fn text_or(v: Option<&Value>, fallback: &str) -> String {
    match v {
        None | Some(Value::Null) => fallback.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(&json!(12)), Some(12.0));
        assert_eq!(parse_number(&json!("10")), Some(10.0));
        assert_eq!(parse_number(&json!(" 3.5 ")), Some(3.5));
        assert_eq!(parse_number(&json!("N/A")), None);
        assert_eq!(parse_number(&json!("abc")), None);
        assert_eq!(parse_number(&json!("NaN")), None);
        assert_eq!(parse_number(&json!(null)), None);
        assert_eq!(parse_number(&json!(true)), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 25);
        assert_eq!(parse_date("2024-05-25"), expected);
        assert_eq!(parse_date("2024/05/25"), expected);
        assert_eq!(parse_date("20240525"), expected);
        assert_eq!(parse_date("2024-05-25T13:00:00"), expected);
        assert_eq!(parse_date("2024-05-25 08:00:00"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2024-02-30"), None);
    }

    #[test]
    fn test_text_or() {
        assert_eq!(text_or(None, "unknown"), "unknown");
        assert_eq!(text_or(Some(&json!(null)), "unknown"), "unknown");
        assert_eq!(text_or(Some(&json!("shop")), "unknown"), "shop");
        assert_eq!(text_or(Some(&json!(42)), "unknown"), "42");
    }
}
