use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::date_util::{last_day_of_month, month_start, quarter_end, quarter_start, year_start};
use crate::error::{Error, Result};

/// Time granularity of a fact row. The discriminant is the persisted
/// `period_level` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodLevel {
    Daily = 1,
    Monthly = 2,
    Quarterly = 3,
    Yearly = 4,
}

impl PeriodLevel {
    /// All levels from finest to coarsest.
    pub const ALL: [PeriodLevel; 4] = [
        PeriodLevel::Daily,
        PeriodLevel::Monthly,
        PeriodLevel::Quarterly,
        PeriodLevel::Yearly,
    ];

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(level: i64) -> Option<Self> {
        match level {
            1 => Some(PeriodLevel::Daily),
            2 => Some(PeriodLevel::Monthly),
            3 => Some(PeriodLevel::Quarterly),
            4 => Some(PeriodLevel::Yearly),
            _ => None,
        }
    }

    /// Like [`PeriodLevel::from_i64`] but reports a validation error.
    pub fn try_from_i64(level: i64) -> Result<Self> {
        Self::from_i64(level)
            .ok_or_else(|| Error::Validation(format!("unsupported period level: {level}")))
    }

    pub fn name(self) -> &'static str {
        match self {
            PeriodLevel::Daily => "daily",
            PeriodLevel::Monthly => "monthly",
            PeriodLevel::Quarterly => "quarterly",
            PeriodLevel::Yearly => "yearly",
        }
    }

    /// Start of the period at this level that contains `d`.
    pub fn period_start(self, d: NaiveDate) -> NaiveDate {
        match self {
            PeriodLevel::Daily => d,
            PeriodLevel::Monthly => month_start(d),
            PeriodLevel::Quarterly => quarter_start(d),
            PeriodLevel::Yearly => year_start(d),
        }
    }

    /// Last day of the period at this level that contains `d`.
    pub fn period_end(self, d: NaiveDate) -> NaiveDate {
        use chrono::Datelike;
        match self {
            PeriodLevel::Daily => d,
            PeriodLevel::Monthly => last_day_of_month(d.year(), d.month()),
            PeriodLevel::Quarterly => quarter_end(d),
            PeriodLevel::Yearly => last_day_of_month(d.year(), 12),
        }
    }

    /// Human-readable span of the period starting at `start`, e.g.
    /// `20241001 to 20241231` for a quarterly row.
    pub fn range_label(self, start: NaiveDate) -> String {
        format!(
            "{} to {}",
            start.format("%Y%m%d"),
            self.period_end(start).format("%Y%m%d")
        )
    }
}

impl fmt::Display for PeriodLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
