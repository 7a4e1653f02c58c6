//! Parsers for the reference-data JSON files (`metrics.json`, `sites.json`,
//! `camps.json`). Records that cannot be used are skipped with a warning;
//! only an unreadable or non-array file is an error.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::{Camp, Metric, MetricRecord, Site, StoreFormat};

/// Records accepted from a reference file plus the number rejected.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// Outcome of loading one reference file into the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

fn read_array(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
    match serde_json::from_str::<Value>(&text)? {
        Value::Array(items) => Ok(items),
        _ => Err(Error::Json(format!(
            "{}: expected a JSON array of records",
            path.display()
        ))),
    }
}

/// First present, non-null value among `keys`.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_metrics(path: &Path) -> Result<Parsed<MetricRecord>> {
    let mut parsed = Parsed { records: Vec::new(), skipped: 0 };
    for (i, item) in read_array(path)?.into_iter().enumerate() {
        let record = match serde_json::from_value::<MetricRecord>(item) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("metrics record {}: skipped: {e}", i + 1);
                parsed.skipped += 1;
                continue;
            }
        };
        if let Err(e) = Metric::try_from(record.clone()) {
            log::warn!("metric {}: skipped: {e}", record.id);
            parsed.skipped += 1;
            continue;
        }
        parsed.records.push(record);
    }
    Ok(parsed)
}

pub fn parse_camps(path: &Path) -> Result<Parsed<Camp>> {
    let mut parsed = Parsed { records: Vec::new(), skipped: 0 };
    for (i, item) in read_array(path)?.iter().enumerate() {
        match camp_from_value(item) {
            Ok(camp) => parsed.records.push(camp),
            Err(reason) => {
                log::warn!("camps record {}: skipped: {reason}", i + 1);
                parsed.skipped += 1;
            }
        }
    }
    Ok(parsed)
}

fn camp_from_value(item: &Value) -> std::result::Result<Camp, String> {
    let obj = item.as_object().ok_or("not an object")?;
    let name = field(obj, &["CAMPNAME", "name"])
        .and_then(as_text)
        .ok_or("missing camp name")?;
    let lat = field(obj, &["LAT", "lat"])
        .and_then(as_f64)
        .ok_or_else(|| format!("{name}: missing or non-numeric latitude"))?;
    let long = field(obj, &["LONG", "LON", "long", "lon"])
        .and_then(as_f64)
        .ok_or_else(|| format!("{name}: missing or non-numeric longitude"))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
        return Err(format!("{name}: coordinates out of range ({lat}, {long})"));
    }
    Ok(Camp { name, lat, long })
}

pub fn parse_sites(path: &Path) -> Result<Parsed<Site>> {
    let mut parsed = Parsed { records: Vec::new(), skipped: 0 };
    for (i, item) in read_array(path)?.iter().enumerate() {
        match site_from_value(item) {
            Ok(site) => parsed.records.push(site),
            Err(reason) => {
                log::warn!("sites record {}: skipped: {reason}", i + 1);
                parsed.skipped += 1;
            }
        }
    }
    Ok(parsed)
}

fn site_from_value(item: &Value) -> std::result::Result<Site, String> {
    let obj = item.as_object().ok_or("not an object")?;
    let site_id = field(obj, &["SITE_ID", "site_id"])
        .and_then(as_i64)
        .ok_or("missing or non-integer site id")?;
    let store_format = field(obj, &["STORE_FORMAT", "store_format"])
        .and_then(as_text)
        .map(|f| f.parse::<StoreFormat>())
        .transpose()
        .map_err(|e| format!("site {site_id}: {e}"))?;
    Ok(Site {
        site_id,
        site_name: field(obj, &["SITE_NAME", "site_name"]).and_then(as_text),
        command_name: field(obj, &["COMMAND_NAME", "command_name"]).and_then(as_text),
        store_format,
    })
}
