use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::date_util::{coerce_date, quarter_of};
use crate::error::{Error, Result};
use crate::model::PeriodLevel;

static RE_QUARTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-[Qq]([1-4])$").expect("valid quarter regex"));
static RE_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("valid month regex"));

/// One stored period: a level plus its start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodKey {
    pub level: PeriodLevel,
    pub start: NaiveDate,
}

impl PeriodKey {
    /// Parse a period selector.
    ///
    /// Supported formats:
    /// - `2024`: year
    /// - `2024-Q2`: quarter
    /// - `2024-03`: month
    /// - `2024-03-15` (or any full date): day
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Self::at(PeriodLevel::Yearly, year, 1, s);
            }
        }

        if let Some(caps) = RE_QUARTER.captures(s) {
            let year = caps[1].parse::<i32>().map_err(|_| bad(s))?;
            let q = caps[2].parse::<u32>().map_err(|_| bad(s))?;
            return Self::at(PeriodLevel::Quarterly, year, (q - 1) * 3 + 1, s);
        }

        if let Some(caps) = RE_MONTH.captures(s) {
            let year = caps[1].parse::<i32>().map_err(|_| bad(s))?;
            let month = caps[2].parse::<u32>().map_err(|_| bad(s))?;
            return Self::at(PeriodLevel::Monthly, year, month, s);
        }

        coerce_date(s)
            .map(|start| PeriodKey {
                level: PeriodLevel::Daily,
                start,
            })
            .map_err(|_| bad(s))
    }

    fn at(level: PeriodLevel, year: i32, month: u32, raw: &str) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| bad(raw))?;
        Ok(PeriodKey { level, start })
    }

    /// Last day of the period.
    pub fn end(&self) -> NaiveDate {
        self.level.period_end(self.start)
    }
}

fn bad(s: &str) -> Error {
    Error::PeriodParse(format!("unrecognized period: {s}"))
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.start;
        match self.level {
            PeriodLevel::Yearly => write!(f, "{}", d.year()),
            PeriodLevel::Quarterly => write!(f, "{}-Q{}", d.year(), quarter_of(d)),
            PeriodLevel::Monthly => write!(f, "{}-{:02}", d.year(), d.month()),
            PeriodLevel::Daily => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_each_level() {
        let year = PeriodKey::parse("2024").unwrap();
        assert_eq!((year.level, year.start), (PeriodLevel::Yearly, ymd(2024, 1, 1)));

        let quarter = PeriodKey::parse("2024-Q2").unwrap();
        assert_eq!((quarter.level, quarter.start), (PeriodLevel::Quarterly, ymd(2024, 4, 1)));

        let month = PeriodKey::parse("2024-03").unwrap();
        assert_eq!((month.level, month.start), (PeriodLevel::Monthly, ymd(2024, 3, 1)));

        let day = PeriodKey::parse("20240315").unwrap();
        assert_eq!((day.level, day.start), (PeriodLevel::Daily, ymd(2024, 3, 15)));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(PeriodKey::parse("2024-13").is_err());
        assert!(PeriodKey::parse("2024-Q5").is_err());
        assert!(matches!(PeriodKey::parse("last week"), Err(Error::PeriodParse(_))));
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["2024", "2024-Q4", "2024-11", "2024-11-05"] {
            assert_eq!(PeriodKey::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_end_of_period() {
        assert_eq!(PeriodKey::parse("2024-Q4").unwrap().end(), ymd(2024, 12, 31));
        assert_eq!(PeriodKey::parse("2024-02").unwrap().end(), ymd(2024, 2, 29));
        assert_eq!(PeriodKey::parse("2024-02-10").unwrap().end(), ymd(2024, 2, 10));
    }
}
