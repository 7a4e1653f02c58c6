pub mod adapter;
pub mod source;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

pub use adapter::{CsvFactsAdapter, ExtractionAdapter, InputFormat, JsonFactsAdapter};
pub use source::SourceType;

use crate::aggregate::{group_cycle, time_cycle, CycleReport};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::model::validate_rows;
use crate::storage::repository;
use crate::storage::Database;

/// `app_config` key naming the directory source files are archived under.
pub const DATALAKE_DIR_KEY: &str = "datalake_dir";

/// Options controlling a hydrate run.
#[derive(Debug, Clone, Default)]
pub struct HydrateOptions {
    /// Require the file name to match this source pattern.
    pub source: Option<SourceType>,
    /// Archive the source file under `<datalake_dir>/<source prefix>/`.
    pub datalake_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HydrateStatus {
    Success,
    /// No rollups could be computed (no rows at the metric's base level).
    Skipped,
    Failed,
}

/// Outcome for one metric touched by a hydrate run.
#[derive(Debug, Clone, Serialize)]
pub struct MetricReport {
    pub metric_id: i64,
    pub status: HydrateStatus,
    pub rows_extracted: usize,
    pub time: Option<CycleReport>,
    /// `None` when the hierarchy stage did not run.
    pub groups: Option<CycleReport>,
    pub error: Option<String>,
}

impl MetricReport {
    fn new(metric_id: i64, rows_extracted: usize) -> Self {
        Self {
            metric_id,
            status: HydrateStatus::Success,
            rows_extracted,
            time: None,
            groups: None,
            error: None,
        }
    }

    fn failed(mut self, e: &Error) -> Self {
        self.status = HydrateStatus::Failed;
        self.error = Some(e.to_string());
        self
    }
}

/// Report returned after a hydrate run completes.
#[derive(Debug, Clone, Serialize)]
pub struct HydrateReport {
    pub source: String,
    pub source_type: Option<SourceType>,
    pub adapter: String,
    pub rows_extracted: usize,
    pub rows_inserted: usize,
    pub archived_to: Option<PathBuf>,
    pub metrics: Vec<MetricReport>,
}

impl HydrateReport {
    pub fn failed_metrics(&self) -> usize {
        self.metrics
            .iter()
            .filter(|m| m.status == HydrateStatus::Failed)
            .count()
    }
}

/// Callback trait for reporting hydrate progress.
pub trait HydrateProgress: Send + Sync {
    fn on_extracted(&self, _source: &str, _rows: usize) {}
    fn on_metric_start(&self, _metric_id: i64, _index: usize, _total: usize) {}
    fn on_metric_complete(&self, _report: &MetricReport) {}
}

/// No-op progress implementation.
pub struct NoopProgress;

impl HydrateProgress for NoopProgress {}

/// Run one source file through the pipeline: extract, validate, insert the
/// base rows, then recompute time and hierarchy rollups per metric.
///
/// Extraction or validation problems fail the whole file before anything is
/// written. Rows for metrics missing from the registry are dropped and
/// reported as `NotFound` failures. After the base insert, a failure in one
/// metric is recorded in its [`MetricReport`] and the remaining metrics still
/// run. The hierarchy stage only runs for metrics whose extracted rows are
/// all site-keyed.
pub async fn hydrate_file(
    db: &Database,
    path: &Path,
    adapter: &dyn ExtractionAdapter,
    options: &HydrateOptions,
    progress: &dyn HydrateProgress,
) -> Result<HydrateReport> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Usage(format!("not a file path: {}", path.display())))?
        .to_string();

    let source_type = match options.source {
        Some(st) if !st.matches(&file_name) => {
            return Err(Error::Usage(format!(
                "{file_name} does not match pattern {}",
                st.pattern()
            )));
        }
        Some(st) => Some(st),
        None => SourceType::detect(&file_name),
    };

    let raw = adapter.extract(path)?;
    progress.on_extracted(&file_name, raw.len());
    let mut rows = validate_rows(&raw)?;
    log::info!("{file_name}: extracted {} rows via {}", rows.len(), adapter.name());

    // Per metric: row count and whether every row addresses a single site.
    let mut per_metric: BTreeMap<i64, (usize, bool)> = BTreeMap::new();
    for row in &rows {
        let entry = per_metric.entry(row.metric_id).or_insert((0, true));
        entry.0 += 1;
        entry.1 &= row.group.is_site();
    }

    let rows_extracted = rows.len();

    // Unregistered metrics are reported as failed and their rows dropped.
    let ids: Vec<i64> = per_metric.keys().copied().collect();
    let unknown: BTreeSet<i64> = db
        .read(move |conn| {
            let mut missing = BTreeSet::new();
            for id in ids {
                if repository::get_metric(conn, id)?.is_none() {
                    missing.insert(id);
                }
            }
            Ok(missing)
        })
        .await?;
    let mut metrics = Vec::with_capacity(per_metric.len());
    for &metric_id in &unknown {
        let e = Error::NotFound(format!("metric {metric_id}"));
        log::error!("{file_name}: skipping rows for metric {metric_id}: {e}");
        let count = per_metric.remove(&metric_id).map_or(0, |(count, _)| count);
        let report = MetricReport::new(metric_id, count).failed(&e);
        progress.on_metric_complete(&report);
        metrics.push(report);
    }
    rows.retain(|r| !unknown.contains(&r.metric_id));

    let rows_inserted = db
        .write(move |conn| {
            let tx = conn.transaction()?;
            let n = repository::upsert_facts(&tx, &rows)?;
            tx.commit()?;
            Ok(n)
        })
        .await?;
    log::info!("{file_name}: inserted {rows_inserted} base rows");

    let directory = Arc::new(db.read(|conn| Directory::load(conn)).await?);

    let total = per_metric.len();
    for (index, (metric_id, (count, site_keyed))) in per_metric.into_iter().enumerate() {
        progress.on_metric_start(metric_id, index, total);
        let report = run_metric(db, metric_id, count, site_keyed, &directory).await;
        progress.on_metric_complete(&report);
        metrics.push(report);
    }
    metrics.sort_by_key(|m| m.metric_id);

    let archived_to = match (&options.datalake_dir, source_type) {
        (Some(dir), st) => {
            let subdir = st.map_or("unclassified", SourceType::prefix);
            match archive(path, &dir.join(subdir), &file_name) {
                Ok(dest) => Some(dest),
                Err(e) => {
                    log::error!("{file_name}: archive failed: {e}");
                    None
                }
            }
        }
        (None, _) => None,
    };

    Ok(HydrateReport {
        source: file_name,
        source_type,
        adapter: adapter.name().to_string(),
        rows_extracted,
        rows_inserted,
        archived_to,
        metrics,
    })
}

async fn run_metric(
    db: &Database,
    metric_id: i64,
    rows_extracted: usize,
    site_keyed: bool,
    directory: &Arc<Directory>,
) -> MetricReport {
    let mut report = MetricReport::new(metric_id, rows_extracted);

    let time = match db.write(move |conn| time_cycle(conn, metric_id, None)).await {
        Ok(t) => t,
        Err(e) => {
            log::error!("metric {metric_id}: time aggregation failed: {e}");
            return report.failed(&e);
        }
    };
    let empty = time.written == 0;
    report.time = Some(time);
    if empty {
        log::warn!("metric {metric_id}: no base-level rows, skipping rollups");
        report.status = HydrateStatus::Skipped;
        return report;
    }

    if !site_keyed {
        log::info!("metric {metric_id}: rows are not site-keyed, skipping hierarchy rollup");
        return report;
    }

    let directory = Arc::clone(directory);
    match db
        .write(move |conn| group_cycle(conn, metric_id, None, &directory))
        .await
    {
        Ok(groups) => report.groups = Some(groups),
        Err(e) => {
            log::error!("metric {metric_id}: hierarchy aggregation failed: {e}");
            return report.failed(&e);
        }
    }
    report
}

fn archive(path: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let dest = dir.join(file_name);
    if dest != path {
        std::fs::copy(path, &dest)?;
    }
    log::info!("archived {} to {}", path.display(), dest.display());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::testing::{insert_metric, metric_record};
    use crate::model::{PeriodLevel, Site, StoreFormat};
    use crate::query::FactQuery;

    async fn seeded() -> Database {
        let db = Database::open_memory().await.unwrap();
        db.write(|conn| {
            insert_metric(conn, metric_record(1, "sum"));
            insert_metric(conn, metric_record(2, ""));
            insert_metric(conn, metric_record(3, "mean"));
            for (id, format) in [(100, StoreFormat::MainStore), (200, StoreFormat::MarineMart)] {
                repository::upsert_site(
                    conn,
                    &Site {
                        site_id: id,
                        site_name: None,
                        command_name: Some("Alpha".into()),
                        store_format: Some(format),
                    },
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();
        db
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_hydrate_end_to_end_with_isolation() {
        let db = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let lake = dir.path().join("lake");
        let path = write_file(
            &dir,
            "RetailData_jan.csv",
            "metric_id,group_name,value,date,period_level\n\
             1,100,10,2024-01-05,1\n\
             1,200,10,2024-01-05,1\n\
             1,100,5,2024-01-20,1\n\
             2,100,3,2024-01-05,1\n\
             3,all,0.5,2024-01-05,1\n\
             3,all,0.7,2024-01-06,1\n",
        );
        let options = HydrateOptions {
            source: Some(SourceType::RetailData),
            datalake_dir: Some(lake.clone()),
        };

        let report = hydrate_file(&db, &path, &CsvFactsAdapter, &options, &NoopProgress)
            .await
            .unwrap();

        assert_eq!(report.rows_extracted, 6);
        assert_eq!(report.rows_inserted, 6);
        assert_eq!(report.failed_metrics(), 1);
        assert_eq!(report.archived_to, Some(lake.join("RetailData").join("RetailData_jan.csv")));
        assert!(lake.join("RetailData").join("RetailData_jan.csv").exists());

        let by_id: BTreeMap<i64, &MetricReport> =
            report.metrics.iter().map(|m| (m.metric_id, m)).collect();
        assert_eq!(by_id[&1].status, HydrateStatus::Success);
        assert!(by_id[&1].groups.is_some());
        assert_eq!(by_id[&2].status, HydrateStatus::Failed);
        assert!(by_id[&2].error.as_deref().unwrap().contains("aggregation method"));
        assert_eq!(by_id[&3].status, HydrateStatus::Success);
        assert!(by_id[&3].groups.is_none());

        let monthly_all = FactQuery::new()
            .metric(1)
            .level(PeriodLevel::Monthly)
            .group_names(["all"])
            .facts(&db)
            .await
            .unwrap();
        assert_eq!(monthly_all.len(), 1);
        assert_eq!(monthly_all[0].value, Some(25.0));

        // The "all"-scoped metric keeps its rows and gains a monthly mean.
        let social = FactQuery::new().metric(3).facts(&db).await.unwrap();
        assert_eq!(social.len(), 3);
        let monthly = social.iter().find(|f| f.period_level == 2).unwrap();
        assert!((monthly.value.unwrap() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_row_fails_whole_file() {
        let db = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "RetailData_bad.json",
            r#"[{"metric_id": 1, "group_name": "100", "value": 1, "date": "2024-01-05", "period_level": 1},
                {"metric_id": 1, "group_name": "100", "value": 2, "date": "someday", "period_level": 1}]"#,
        );

        let err = hydrate_file(&db, &path, &JsonFactsAdapter, &HydrateOptions::default(), &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let count = FactQuery::new().metric(1).count(&db).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_pattern_mismatch_is_usage_error() {
        let db = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "Social_Media_Performance.json", "[]");
        let options = HydrateOptions {
            source: Some(SourceType::RetailData),
            datalake_dir: None,
        };
        let err = hydrate_file(&db, &path, &JsonFactsAdapter, &options, &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[tokio::test]
    async fn test_base_level_mismatch_is_skipped() {
        let db = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        // Metric 1 records daily; a monthly-only file yields nothing to roll up.
        let path = write_file(
            &dir,
            "RetailData_feb.json",
            r#"[{"metric_id": 1, "group_name": "100", "value": 1, "date": "2024-02-01", "period_level": 2}]"#,
        );
        let report = hydrate_file(&db, &path, &JsonFactsAdapter, &HydrateOptions::default(), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(report.source_type, Some(SourceType::RetailData));
        assert_eq!(report.metrics[0].status, HydrateStatus::Skipped);
        assert!(report.archived_to.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_metric_fails_alone() {
        let db = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "RetailData_mixed.csv",
            "metric_id,group_name,value,date,period_level\n\
             1,100,10,2024-01-05,1\n\
             99,100,3,2024-01-05,1\n",
        );

        let report = hydrate_file(&db, &path, &CsvFactsAdapter, &HydrateOptions::default(), &NoopProgress)
            .await
            .unwrap();

        assert_eq!(report.rows_extracted, 2);
        assert_eq!(report.rows_inserted, 1);
        let ids: Vec<i64> = report.metrics.iter().map(|m| m.metric_id).collect();
        assert_eq!(ids, vec![1, 99]);
        assert_eq!(report.metrics[0].status, HydrateStatus::Success);
        assert_eq!(report.metrics[1].status, HydrateStatus::Failed);
        assert_eq!(report.metrics[1].rows_extracted, 1);
        assert!(report.metrics[1].error.as_deref().unwrap().contains("metric 99"));

        let base = FactQuery::new()
            .metric(1)
            .level(PeriodLevel::Daily)
            .count(&db)
            .await
            .unwrap();
        assert_eq!(base, 1);
    }
}
