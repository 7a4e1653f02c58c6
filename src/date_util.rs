use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

/// Get the last day of a given month.
pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    first_of_month(next_year, next_month) - Duration::days(1)
}

/// Get the quarter (1-4) for a given date.
pub fn quarter_of(d: NaiveDate) -> u8 {
    ((d.month() - 1) / 3 + 1) as u8
}

/// First day of the month containing `d`.
pub fn month_start(d: NaiveDate) -> NaiveDate {
    first_of_month(d.year(), d.month())
}

/// First day of the quarter containing `d`.
pub fn quarter_start(d: NaiveDate) -> NaiveDate {
    let start_month = (quarter_of(d) as u32 - 1) * 3 + 1;
    first_of_month(d.year(), start_month)
}

/// January 1 of the year containing `d`.
pub fn year_start(d: NaiveDate) -> NaiveDate {
    first_of_month(d.year(), 1)
}

/// Last day of the quarter containing `d`.
pub fn quarter_end(d: NaiveDate) -> NaiveDate {
    last_day_of_month(d.year(), quarter_of(d) as u32 * 3)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Day 1 exists for every month chrono can represent.
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// Canonical storage form of a calendar date.
pub fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Parse a stored `YYYY-MM-DD` date key.
pub fn parse_date_key(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Validation(format!("invalid stored date {s:?}: {e}")))
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Coerce a loosely formatted date or timestamp to a bare calendar date.
///
/// Accepts `YYYY-MM-DD`, `YYYYMMDD`, `YYYY-MM-DD HH:MM:SS[.f]`,
/// `YYYY-MM-DDTHH:MM:SS[.f]` and RFC 3339. Any time component is dropped.
pub fn coerce_date(raw: &str) -> Result<NaiveDate> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
            return Ok(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    Err(Error::Validation(format!("cannot coerce {raw:?} to a date")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2025, 1), ymd(2025, 1, 31));
        assert_eq!(last_day_of_month(2025, 2), ymd(2025, 2, 28));
        assert_eq!(last_day_of_month(2024, 2), ymd(2024, 2, 29)); // Leap year
        assert_eq!(last_day_of_month(2025, 12), ymd(2025, 12, 31));
    }

    #[test]
    fn test_quarter_of() {
        assert_eq!(quarter_of(ymd(2025, 1, 15)), 1);
        assert_eq!(quarter_of(ymd(2025, 3, 31)), 1);
        assert_eq!(quarter_of(ymd(2025, 4, 1)), 2);
        assert_eq!(quarter_of(ymd(2025, 6, 30)), 2);
        assert_eq!(quarter_of(ymd(2025, 7, 1)), 3);
        assert_eq!(quarter_of(ymd(2025, 12, 31)), 4);
    }

    #[test]
    fn test_quarter_start_boundaries() {
        assert_eq!(quarter_start(ymd(2024, 4, 1)), ymd(2024, 4, 1));
        assert_eq!(quarter_start(ymd(2024, 2, 15)), ymd(2024, 1, 1));
        assert_eq!(quarter_start(ymd(2024, 12, 31)), ymd(2024, 10, 1));
    }

    #[test]
    fn test_period_starts() {
        assert_eq!(month_start(ymd(2025, 3, 15)), ymd(2025, 3, 1));
        assert_eq!(year_start(ymd(2025, 3, 15)), ymd(2025, 1, 1));
        assert_eq!(quarter_end(ymd(2024, 11, 2)), ymd(2024, 12, 31));
        assert_eq!(quarter_end(ymd(2024, 2, 2)), ymd(2024, 3, 31));
    }

    #[test]
    fn test_coerce_date_formats() {
        let expected = ymd(2024, 1, 5);
        assert_eq!(coerce_date("2024-01-05").unwrap(), expected);
        assert_eq!(coerce_date("20240105").unwrap(), expected);
        assert_eq!(coerce_date("2024-01-05 13:45:00").unwrap(), expected);
        assert_eq!(coerce_date("2024-01-05T13:45:00.123").unwrap(), expected);
        assert_eq!(coerce_date("2024-01-05T23:10:00+02:00").unwrap(), expected);
        assert_eq!(coerce_date("  2024-01-05 ").unwrap(), expected);
    }

    #[test]
    fn test_coerce_date_rejects_garbage() {
        assert!(matches!(coerce_date("yesterday"), Err(Error::Validation(_))));
        assert!(matches!(coerce_date("2024-13-01"), Err(Error::Validation(_))));
        assert!(matches!(coerce_date(""), Err(Error::Validation(_))));
    }
}
