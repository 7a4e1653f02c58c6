use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// Aggregation function applied to every rollup of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggMethod {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    First,
    Last,
}

impl AggMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggMethod::Sum => "sum",
            AggMethod::Mean => "mean",
            AggMethod::Median => "median",
            AggMethod::Min => "min",
            AggMethod::Max => "max",
            AggMethod::Count => "count",
            AggMethod::First => "first",
            AggMethod::Last => "last",
        }
    }

    /// Reduce a bucket of values. Nulls are skipped; `values` must already be
    /// in date order for `First` and `Last` to be meaningful.
    ///
    /// `Sum` and `Count` of an all-null bucket are `0`; every other method
    /// yields `None`.
    pub fn apply(self, values: &[Option<f64>]) -> Option<f64> {
        let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
        match self {
            AggMethod::Sum => Some(present.iter().sum()),
            AggMethod::Count => Some(present.len() as f64),
            AggMethod::Mean => {
                if present.is_empty() {
                    None
                } else {
                    Some(present.iter().sum::<f64>() / present.len() as f64)
                }
            }
            AggMethod::Median => median(present),
            AggMethod::Min => present.into_iter().reduce(f64::min),
            AggMethod::Max => present.into_iter().reduce(f64::max),
            AggMethod::First => present.first().copied(),
            AggMethod::Last => present.last().copied(),
        }
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

impl FromStr for AggMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(AggMethod::Sum),
            "mean" | "avg" | "average" => Ok(AggMethod::Mean),
            "median" => Ok(AggMethod::Median),
            "min" => Ok(AggMethod::Min),
            "max" => Ok(AggMethod::Max),
            "count" => Ok(AggMethod::Count),
            "first" => Ok(AggMethod::First),
            "last" => Ok(AggMethod::Last),
            other => Err(Error::Config(format!("unknown aggregation method: {other:?}"))),
        }
    }
}

impl fmt::Display for AggMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AggMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
