use std::fmt;

use chrono::NaiveDate;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::date_util::{coerce_date, date_key, parse_date_key};
use crate::error::{Error, Result};
use crate::model::{GroupRef, PeriodLevel};

/// A fact row as produced by an extraction adapter, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawFact {
    pub metric_id: i64,
    #[serde(deserialize_with = "group_name_text")]
    pub group_name: String,
    #[serde(default)]
    pub value: Option<f64>,
    pub date: String,
    pub period_level: i64,
}

impl RawFact {
    pub fn new(
        metric_id: i64,
        group_name: impl Into<String>,
        value: Option<f64>,
        date: impl Into<String>,
        period_level: i64,
    ) -> Self {
        Self {
            metric_id,
            group_name: group_name.into(),
            value,
            date: date.into(),
            period_level,
        }
    }
}

/// Site ids often arrive as numbers; keep the group dimension textual.
fn group_name_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    struct GroupNameVisitor;

    impl Visitor<'_> for GroupNameVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a group name string or integer site id")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<String, E> {
            if v.fract() == 0.0 && v.is_finite() {
                Ok(format!("{}", v as i64))
            } else {
                Ok(v.to_string())
            }
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(GroupNameVisitor)
}

/// A validated fact: the canonical `(metric, group, date, level) -> value`
/// shape written to and read from the fact store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    pub metric_id: i64,
    pub group: GroupRef,
    pub value: Option<f64>,
    pub date: NaiveDate,
    pub level: PeriodLevel,
}

impl FactRow {
    pub fn new(
        metric_id: i64,
        group: GroupRef,
        value: Option<f64>,
        date: NaiveDate,
        level: PeriodLevel,
    ) -> Self {
        Self {
            metric_id,
            group,
            value,
            date,
            level,
        }
    }

    pub fn date_key(&self) -> String {
        date_key(self.date)
    }

    /// Decode a stored row.
    pub fn from_record(record: &FactRecord) -> Result<Self> {
        Ok(Self {
            metric_id: record.metric_id,
            group: GroupRef::decode(&record.group_name)?,
            value: record.value,
            date: parse_date_key(&record.date)?,
            level: PeriodLevel::try_from_i64(record.period_level)?,
        })
    }
}

/// Validate and coerce a batch of adapter rows. The first bad row fails the
/// whole batch.
pub fn validate_rows(raw: &[RawFact]) -> Result<Vec<FactRow>> {
    raw.iter()
        .enumerate()
        .map(|(i, r)| validate_row(r).map_err(|e| Error::Validation(format!("row {}: {e}", i + 1))))
        .collect()
}

fn validate_row(raw: &RawFact) -> Result<FactRow> {
    if raw.metric_id <= 0 {
        return Err(Error::Validation(format!("invalid metric id {}", raw.metric_id)));
    }
    if let Some(v) = raw.value {
        if !v.is_finite() {
            return Err(Error::Validation(format!("non-finite value {v}")));
        }
    }
    let level = PeriodLevel::try_from_i64(raw.period_level)?;
    let date = coerce_date(&raw.date)?;
    // A coarse row is keyed by the first day of its period.
    let start = level.period_start(date);
    if date != start {
        return Err(Error::Validation(format!(
            "{} row dated {date} is not on its period start {start}",
            level.name()
        )));
    }
    Ok(FactRow {
        metric_id: raw.metric_id,
        group: GroupRef::decode(&raw.group_name)?,
        value: raw.value,
        date,
        level,
    })
}

/// A fact row as stored, including its surrogate id and insert timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRecord {
    pub id: i64,
    pub metric_id: i64,
    pub group_name: String,
    pub value: Option<f64>,
    pub date: String,
    pub period_level: i64,
    pub record_inserted_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_coerces_timestamp() {
        let rows = validate_rows(&[RawFact::new(1, "100", Some(10.0), "2024-01-05 08:30:00", 1)])
            .unwrap();
        assert_eq!(rows[0].group, GroupRef::Site(100));
        assert_eq!(rows[0].date_key(), "2024-01-05");
        assert_eq!(rows[0].level, PeriodLevel::Daily);
    }

    #[test]
    fn test_one_bad_row_fails_batch() {
        let batch = vec![
            RawFact::new(1, "100", Some(10.0), "2024-01-05", 1),
            RawFact::new(1, "100", Some(11.0), "not a date", 1),
        ];
        let err = validate_rows(&batch).unwrap_err();
        assert!(matches!(err, Error::Validation(ref msg) if msg.starts_with("row 2")));
    }

    #[test]
    fn test_rejects_bad_level_and_group() {
        assert!(validate_rows(&[RawFact::new(1, "100", None, "2024-01-05", 9)]).is_err());
        assert!(validate_rows(&[RawFact::new(1, "", None, "2024-01-05", 1)]).is_err());
        assert!(validate_rows(&[RawFact::new(0, "all", None, "2024-01-05", 1)]).is_err());
    }

    #[test]
    fn test_coarse_rows_must_sit_on_period_start() {
        let rows = validate_rows(&[
            RawFact::new(1, "100", Some(1.0), "2024-04-01", 3),
            RawFact::new(1, "100", Some(2.0), "2024-03-01 00:00:00", 2),
            RawFact::new(1, "100", Some(3.0), "20240101", 4),
        ])
        .unwrap();
        assert_eq!(rows.len(), 3);

        let err = validate_rows(&[
            RawFact::new(1, "100", Some(1.0), "2024-01-01", 3),
            RawFact::new(1, "100", Some(2.0), "2024-02-15", 3),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Validation(ref msg) if msg.starts_with("row 2")));
        assert!(validate_rows(&[RawFact::new(1, "all", None, "2024-03-02", 2)]).is_err());
    }

    #[test]
    fn test_raw_fact_accepts_numeric_group() {
        let rows: Vec<RawFact> = serde_json::from_str(
            r#"[{"metric_id": 1, "group_name": 100, "value": 2.5, "date": "2024-01-05", "period_level": 1},
                {"metric_id": 1, "group_name": "all", "value": null, "date": "2024-01-05", "period_level": 1}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].group_name, "100");
        assert_eq!(rows[1].value, None);
    }
}
