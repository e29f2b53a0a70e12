use std::time::Instant;
use tracing::info;

/// Logs when a command starts and, on drop, how long it ran.
pub struct Timer {
    what: &'static str,
    since: Instant,
}

impl Timer {
    pub fn start(what: &'static str) -> Self {
        info!("▶ {}", what);
        Self { what, since: Instant::now() }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("■ {} finished in {:.2?}", self.what, self.since.elapsed());
    }
}

/// `1234567` → `"1,234,567"`.
pub fn fmt_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let head = match digits.len() % 3 {
        0 => 3,
        r => r,
    };

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    out.push_str(&digits[..head]);
    for group in digits.as_bytes()[head..].chunks(3) {
        out.push(',');
        out.extend(group.iter().map(|b| *b as char));
    }
    out
}

/// Counters are whole numbers in practice; print them without a trailing `.0`.
pub fn fmt_metric(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(-42_000), "-42,000");
        assert_eq!(fmt_number(999), "999");
        assert_eq!(fmt_number(1_000), "1,000");
        assert_eq!(fmt_number(i64::MIN), "-9,223,372,036,854,775,808");
    }

    #[test]
    fn test_fmt_metric() {
        assert_eq!(fmt_metric(40.0), "40");
        assert_eq!(fmt_metric(-3.0), "-3");
        assert_eq!(fmt_metric(0.25), "0.25");
    }
}
