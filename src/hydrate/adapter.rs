use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::RawFact;

/// Turns one source file into rows of the canonical lowest-level shape.
/// Parsers for vendor formats implement this outside the crate.
pub trait ExtractionAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, path: &Path) -> Result<Vec<RawFact>>;
}

/// A JSON array of `{metric_id, group_name, value, date, period_level}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFactsAdapter;

impl ExtractionAdapter for JsonFactsAdapter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extract(&self, path: &Path) -> Result<Vec<RawFact>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))
    }
}

/// CSV with a header row naming the canonical columns. An empty `value`
/// field is a null.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFactsAdapter;

impl ExtractionAdapter for CsvFactsAdapter {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extract(&self, path: &Path) -> Result<Vec<RawFact>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<RawFact>() {
            rows.push(record?);
        }
        Ok(rows)
    }
}

/// Shipped input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
}

impl InputFormat {
    /// Guess from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(InputFormat::Json),
            "csv" => Some(InputFormat::Csv),
            _ => None,
        }
    }

    pub fn adapter(self) -> Box<dyn ExtractionAdapter> {
        match self {
            InputFormat::Json => Box::new(JsonFactsAdapter),
            InputFormat::Csv => Box::new(CsvFactsAdapter),
        }
    }
}

impl FromStr for InputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(InputFormat::Json),
            "csv" => Ok(InputFormat::Csv),
            other => Err(Error::Usage(format!("unsupported input format: {other:?}"))),
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Json => f.write_str("json"),
            InputFormat::Csv => f.write_str("csv"),
        }
    }
}
