use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::aggregate::AggMethod;
use crate::error::{Error, Result};
use crate::model::PeriodLevel;

/// Presentation category of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Retail,
    Survey,
    Marketing,
    Other,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Retail => "retail",
            Category::Survey => "survey",
            Category::Marketing => "marketing",
            Category::Other => "other",
        }
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "retail" => Ok(Category::Retail),
            "survey" | "customer survey" => Ok(Category::Survey),
            "marketing" | "email & social media" => Ok(Category::Marketing),
            "other" => Ok(Category::Other),
            other => Err(Error::Usage(format!("unknown metric category: {other:?}"))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory category flags. A metric may carry several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Categories {
    pub retail: bool,
    pub marketing: bool,
    pub survey: bool,
}

impl Categories {
    /// The single category a metric is reported under:
    /// retail, then survey, then marketing, else other.
    pub fn primary(&self) -> Category {
        if self.retail {
            Category::Retail
        } else if self.survey {
            Category::Survey
        } else if self.marketing {
            Category::Marketing
        } else {
            Category::Other
        }
    }

    pub fn contains(&self, category: Category) -> bool {
        match category {
            Category::Retail => self.retail,
            Category::Marketing => self.marketing,
            Category::Survey => self.survey,
            Category::Other => !(self.retail || self.marketing || self.survey),
        }
    }
}

/// A metric row as persisted in the `metrics` table and as written in
/// `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: i64,
    pub metric_name: String,
    #[serde(default)]
    pub metric_desc: Option<String>,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_retail: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_marketing: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_survey: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_daily: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_monthly: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_quarterly: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_yearly: bool,
    #[serde(default)]
    pub agg_method: Option<String>,
    #[serde(default)]
    pub etl_method: Option<String>,
}

/// Accept `true`/`false`, `0`/`1` and their string spellings for a flag.
fn loose_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
        Null(()),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(n) => Ok(n != 0),
        Flag::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid flag value: {other:?}"))),
        },
        Flag::Null(()) => Ok(false),
    }
}

impl MetricRecord {
    fn flagged_levels(&self) -> Vec<PeriodLevel> {
        [
            (self.is_daily, PeriodLevel::Daily),
            (self.is_monthly, PeriodLevel::Monthly),
            (self.is_quarterly, PeriodLevel::Quarterly),
            (self.is_yearly, PeriodLevel::Yearly),
        ]
        .into_iter()
        .filter_map(|(set, level)| set.then_some(level))
        .collect()
    }
}

/// Decoded metric configuration. `base` is the finest granularity the
/// metric is recorded at; `rollups` are the coarser levels materialized from
/// it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub categories: Categories,
    pub base: PeriodLevel,
    pub rollups: Vec<PeriodLevel>,
    pub agg_method: Option<AggMethod>,
    pub etl_method: Option<String>,
}

impl Metric {
    /// The configured aggregation method, required by every rollup.
    pub fn method(&self) -> Result<AggMethod> {
        self.agg_method.ok_or_else(|| {
            Error::Config(format!("metric {} has no aggregation method", self.id))
        })
    }

    pub fn to_record(&self) -> MetricRecord {
        let has = |level: PeriodLevel| self.base == level || self.rollups.contains(&level);
        MetricRecord {
            id: self.id,
            metric_name: self.name.clone(),
            metric_desc: self.description.clone(),
            is_retail: self.categories.retail,
            is_marketing: self.categories.marketing,
            is_survey: self.categories.survey,
            is_daily: has(PeriodLevel::Daily),
            is_monthly: has(PeriodLevel::Monthly),
            is_quarterly: has(PeriodLevel::Quarterly),
            is_yearly: has(PeriodLevel::Yearly),
            agg_method: self.agg_method.map(|m| m.to_string()),
            etl_method: self.etl_method.clone(),
        }
    }
}

impl TryFrom<MetricRecord> for Metric {
    type Error = Error;

    fn try_from(record: MetricRecord) -> Result<Self> {
        let mut levels = record.flagged_levels();
        if levels.is_empty() {
            return Err(Error::Config(format!(
                "metric {} has no granularity flag set",
                record.id
            )));
        }
        let base = levels.remove(0);
        let agg_method = match record.agg_method.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(
                name.parse::<AggMethod>()
                    .map_err(|e| Error::Config(format!("metric {}: {e}", record.id)))?,
            ),
        };
        Ok(Metric {
            id: record.id,
            name: record.metric_name,
            description: record.metric_desc,
            categories: Categories {
                retail: record.is_retail,
                marketing: record.is_marketing,
                survey: record.is_survey,
            },
            base,
            rollups: levels,
            agg_method,
            etl_method: record.etl_method,
        })
    }
}
