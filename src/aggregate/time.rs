use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::aggregate::{load_metric, AggMethod};
use crate::error::Result;
use crate::model::{FactRow, GroupRef, Metric};
use crate::storage::repository;

/// Output of one time-aggregation pass: the base rows followed by every
/// computed rollup row.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRollup {
    pub metric_id: i64,
    /// Stale rows above the base level removed before recomputing.
    pub purged: usize,
    pub base_rows: usize,
    pub rows: Vec<FactRow>,
}

/// Purge every row above the metric's base level, then rebuild the enabled
/// coarser levels from the base rows.
///
/// `method` overrides the metric's configured aggregation; without either,
/// this is a configuration error. The caller writes `rows` back, normally in
/// the same transaction as the purge.
pub fn aggregate_by_time(
    conn: &Connection,
    metric_id: i64,
    method: Option<AggMethod>,
) -> Result<TimeRollup> {
    let metric = load_metric(conn, metric_id)?;
    let method = match method {
        Some(m) => m,
        None => metric.method()?,
    };

    let purged = repository::delete_facts_above_level(conn, metric.id, metric.base)?;
    if purged > 0 {
        log::debug!("metric {}: purged {purged} rows above {}", metric.id, metric.base);
    }

    let base: Vec<FactRow> = repository::facts_for_metric(conn, metric.id, Some(metric.base))?
        .iter()
        .map(FactRow::from_record)
        .collect::<Result<_>>()?;
    if base.is_empty() {
        log::warn!("metric {}: no {} rows to aggregate", metric.id, metric.base);
        return Ok(TimeRollup {
            metric_id: metric.id,
            purged,
            base_rows: 0,
            rows: Vec::new(),
        });
    }

    let base_rows = base.len();
    let rows = roll_up_time(&metric, method, base);
    log::info!(
        "metric {}: {} base rows, {} rollup rows ({method})",
        metric.id,
        base_rows,
        rows.len() - base_rows
    );
    Ok(TimeRollup {
        metric_id: metric.id,
        purged,
        base_rows,
        rows,
    })
}

/// Bucket base rows by (group, period start) for each enabled rollup level
/// and reduce each bucket with `method`. Returns the base rows, stamped with
/// the metric id, followed by the rollups.
pub fn roll_up_time(metric: &Metric, method: AggMethod, base: Vec<FactRow>) -> Vec<FactRow> {
    let mut base: Vec<FactRow> = base
        .into_iter()
        .filter(|r| r.level == metric.base)
        .map(|mut r| {
            r.metric_id = metric.id;
            r
        })
        .collect();
    base.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.group.cmp(&b.group)));

    let mut out = base.clone();
    for &level in metric.rollups.iter().filter(|l| **l > metric.base) {
        let mut buckets: BTreeMap<(GroupRef, NaiveDate), Vec<Option<f64>>> = BTreeMap::new();
        for row in &base {
            buckets
                .entry((row.group.clone(), level.period_start(row.date)))
                .or_default()
                .push(row.value);
        }
        out.extend(buckets.into_iter().map(|((group, start), values)| {
            FactRow::new(metric.id, group, method.apply(&values), start, level)
        }));
    }
    out
}
