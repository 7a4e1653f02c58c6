pub mod aggregate;
pub mod date_util;
pub mod directory;
pub mod error;
pub mod hydrate;
pub mod model;
pub mod query;
pub mod storage;

use std::path::{Path, PathBuf};

pub use aggregate::{AggMethod, CycleReport};
pub use directory::loader::LoadReport;
pub use directory::Directory;
pub use error::{Error, Result};
pub use hydrate::{
    HydrateOptions, HydrateProgress, HydrateReport, HydrateStatus, InputFormat, MetricReport,
    NoopProgress, SourceType,
};
pub use model::{
    Camp, Categories, Category, FactRecord, FactRow, GroupRef, Metric, PeriodLevel, RawFact,
    Site, StoreFormat,
};
pub use query::{FactQuery, NestedReport, PeriodKey};
pub use storage::Database;

use directory::loader;
use storage::repository;

/// Row counts across the warehouse.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WarehouseStatus {
    pub metrics: i64,
    pub sites: i64,
    pub camps: i64,
    pub facts: i64,
    /// `(metric_id, period_level, rows)`
    pub facts_by_level: Vec<(i64, i64, i64)>,
}

/// Main entry point for the retail data warehouse.
pub struct RetailDW {
    db: Database,
}

impl RetailDW {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Reference data ─────────────────────────────────────────────

    pub async fn load_metrics(&self, path: &Path) -> Result<LoadReport> {
        let parsed = loader::parse_metrics(path)?;
        let skipped = parsed.skipped;
        let loaded = self
            .db
            .write(move |conn| {
                let tx = conn.transaction()?;
                for record in &parsed.records {
                    repository::upsert_metric(&tx, record)?;
                }
                tx.commit()?;
                Ok(parsed.records.len())
            })
            .await?;
        log::info!("{}: loaded {loaded} metrics, skipped {skipped}", path.display());
        Ok(LoadReport { loaded, skipped })
    }

    pub async fn load_sites(&self, path: &Path) -> Result<LoadReport> {
        let parsed = loader::parse_sites(path)?;
        let skipped = parsed.skipped;
        let loaded = self
            .db
            .write(move |conn| {
                let tx = conn.transaction()?;
                for site in &parsed.records {
                    repository::upsert_site(&tx, site)?;
                }
                tx.commit()?;
                Ok(parsed.records.len())
            })
            .await?;
        log::info!("{}: loaded {loaded} sites, skipped {skipped}", path.display());
        Ok(LoadReport { loaded, skipped })
    }

    pub async fn load_camps(&self, path: &Path) -> Result<LoadReport> {
        let parsed = loader::parse_camps(path)?;
        let skipped = parsed.skipped;
        let loaded = self
            .db
            .write(move |conn| {
                let tx = conn.transaction()?;
                for camp in &parsed.records {
                    repository::upsert_camp(&tx, camp)?;
                }
                tx.commit()?;
                Ok(parsed.records.len())
            })
            .await?;
        log::info!("{}: loaded {loaded} camps, skipped {skipped}", path.display());
        Ok(LoadReport { loaded, skipped })
    }

    /// Load `metrics.json`, `camps.json` and `sites.json` from `dir`.
    /// Missing files are skipped with a warning.
    pub async fn load_directory(&self, dir: &Path) -> Result<Vec<(String, LoadReport)>> {
        let mut reports = Vec::new();
        for name in ["metrics.json", "camps.json", "sites.json"] {
            let path = dir.join(name);
            if !path.is_file() {
                log::warn!("{} not found, skipping", path.display());
                continue;
            }
            let report = match name {
                "metrics.json" => self.load_metrics(&path).await?,
                "camps.json" => self.load_camps(&path).await?,
                _ => self.load_sites(&path).await?,
            };
            reports.push((name.to_string(), report));
        }
        Ok(reports)
    }

    // ── Facts ──────────────────────────────────────────────────────

    /// Upsert already-validated rows in one transaction.
    pub async fn insert_facts(&self, rows: Vec<FactRow>) -> Result<usize> {
        self.db
            .write(move |conn| {
                let tx = conn.transaction()?;
                let n = repository::upsert_facts(&tx, &rows)?;
                tx.commit()?;
                Ok(n)
            })
            .await
    }

    /// Validate then upsert; a single bad row rejects the whole batch.
    pub async fn insert_raw_facts(&self, raw: &[RawFact]) -> Result<usize> {
        let rows = model::validate_rows(raw)?;
        self.insert_facts(rows).await
    }

    // ── Directory lookups ──────────────────────────────────────────

    pub async fn get_metric(&self, metric_id: i64) -> Result<Metric> {
        self.db
            .read(move |conn| aggregate::load_metric(conn, metric_id))
            .await
    }

    /// Every metric that decodes cleanly; misconfigured ones are logged and
    /// left out.
    pub async fn list_metrics(&self) -> Result<Vec<Metric>> {
        let records = self.db.read(|conn| Ok(repository::list_metrics(conn)?)).await?;
        let mut metrics = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            match Metric::try_from(record) {
                Ok(m) => metrics.push(m),
                Err(e) => log::warn!("metric {id}: {e}"),
            }
        }
        Ok(metrics)
    }

    /// Metric ids flagged for any of `categories`. `*` or an empty list
    /// selects every metric.
    pub async fn metric_ids_for_categories(&self, categories: &[String]) -> Result<Vec<i64>> {
        let parsed = if categories.iter().any(|c| c.trim() == "*") {
            Vec::new()
        } else {
            categories
                .iter()
                .map(|c| c.parse::<Category>())
                .collect::<Result<Vec<_>>>()?
        };
        self.db
            .read(move |conn| Ok(repository::metric_ids_for_categories(conn, &parsed)?))
            .await
    }

    pub async fn get_site(&self, site_id: i64) -> Result<Site> {
        self.db
            .read(move |conn| repository::get_site(conn, site_id).map_err(Error::from))
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {site_id}")))
    }

    pub async fn sites(&self) -> Result<Vec<Site>> {
        self.db.read(|conn| Ok(repository::list_sites(conn)?)).await
    }

    pub async fn camps(&self) -> Result<Vec<Camp>> {
        self.db.read(|conn| Ok(repository::list_camps(conn)?)).await
    }

    /// A fresh snapshot of the site/camp directory.
    pub async fn directory(&self) -> Result<Directory> {
        self.db.read(|conn| Directory::load(conn)).await
    }

    // ── Aggregation ────────────────────────────────────────────────

    /// Recompute a metric's time rollups. `method` overrides the configured one.
    pub async fn rollup_time(&self, metric_id: i64, method: Option<AggMethod>) -> Result<CycleReport> {
        let report = self
            .db
            .write(move |conn| aggregate::time_cycle(conn, metric_id, method))
            .await?;
        log::info!(
            "metric {metric_id}: purged {}, wrote {} time rows",
            report.purged,
            report.written
        );
        Ok(report)
    }

    /// Recompute a metric's hierarchy rollups against the current directory.
    pub async fn rollup_groups(&self, metric_id: i64, method: Option<AggMethod>) -> Result<CycleReport> {
        let directory = self.directory().await?;
        let report = self
            .db
            .write(move |conn| aggregate::group_cycle(conn, metric_id, method, &directory))
            .await?;
        log::info!(
            "metric {metric_id}: purged {}, wrote {} group rows ({} sites without camp, {} without format)",
            report.purged,
            report.written,
            report.unmapped_camp_sites,
            report.unmapped_format_sites
        );
        Ok(report)
    }

    // ── Hydrate ────────────────────────────────────────────────────

    /// Run one source file through the pipeline. The adapter comes from
    /// `format`, else the file extension. When `options` names no datalake
    /// directory the `datalake_dir` config key is used.
    pub async fn hydrate(
        &self,
        path: &Path,
        format: Option<InputFormat>,
        options: HydrateOptions,
        progress: &dyn HydrateProgress,
    ) -> Result<HydrateReport> {
        let format = format
            .or_else(|| InputFormat::from_path(path))
            .ok_or_else(|| {
                Error::Usage(format!(
                    "cannot tell the input format of {}; pass --format",
                    path.display()
                ))
            })?;
        let mut options = options;
        if options.datalake_dir.is_none() {
            options.datalake_dir = self
                .config_get(hydrate::DATALAKE_DIR_KEY)
                .await?
                .map(PathBuf::from);
        }
        let adapter = format.adapter();
        hydrate::hydrate_file(&self.db, path, adapter.as_ref(), &options, progress).await
    }

    // ── Reports ────────────────────────────────────────────────────

    /// Run `query` and reshape the rows into the nested report form.
    pub async fn nested_report(&self, query: FactQuery) -> Result<NestedReport> {
        let facts = query.facts(&self.db).await?;
        let metrics = self.list_metrics().await?;
        let directory = self.directory().await?;
        query::nest_facts(&facts, &metrics, &directory)
    }

    pub async fn status(&self) -> Result<WarehouseStatus> {
        self.db
            .read(|conn| {
                Ok(WarehouseStatus {
                    metrics: repository::count_rows(conn, "metrics")?,
                    sites: repository::count_rows(conn, "sites")?,
                    camps: repository::count_rows(conn, "camps")?,
                    facts: repository::count_rows(conn, "facts")?,
                    facts_by_level: repository::fact_counts(conn)?,
                })
            })
            .await
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .read(move |conn| Ok(repository::get_config(conn, &key)?))
            .await
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.db
            .write(move |conn| Ok(repository::set_config(conn, &key, &value)?))
            .await
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db.read(|conn| Ok(repository::list_config(conn)?)).await
    }
}
