use crate::date_util::{coerce_date, date_key};
use crate::error::{Error, Result};
use crate::model::{FactRecord, GroupRef, PeriodLevel};
use crate::storage::repository::{fact_from_row, FACT_COLUMNS};
use crate::query::PeriodKey;
use crate::storage::Database;

/// Builder for fact queries. At least one metric selector is required; every
/// other filter is optional, and no group filter means every group.
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
    metric_ids: Vec<i64>,
    groups: Vec<String>,
    levels: Vec<i64>,
    date: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    period: Option<PeriodKey>,
    limit: Option<u32>,
}

impl FactQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metric(mut self, id: i64) -> Self {
        self.metric_ids.push(id);
        self
    }

    pub fn metrics(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.metric_ids.extend(ids);
        self
    }

    pub fn group(mut self, group: &GroupRef) -> Self {
        self.groups.push(group.encode());
        self
    }

    /// Filter by raw `group_name` values.
    pub fn group_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.groups.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn level(mut self, level: PeriodLevel) -> Self {
        self.levels.push(level.as_i64());
        self
    }

    pub fn levels(mut self, levels: impl IntoIterator<Item = PeriodLevel>) -> Self {
        self.levels.extend(levels.into_iter().map(PeriodLevel::as_i64));
        self
    }

    /// Exact period-start date. Accepts any format `coerce_date` does.
    pub fn date(mut self, date: &str) -> Result<Self> {
        self.date = Some(date_key(coerce_date(date)?));
        Ok(self)
    }

    /// Inclusive date range; either end may be open.
    pub fn date_range(mut self, from: Option<&str>, to: Option<&str>) -> Result<Self> {
        if let Some(from) = from {
            self.date_from = Some(date_key(coerce_date(from)?));
        }
        if let Some(to) = to {
            self.date_to = Some(date_key(coerce_date(to)?));
        }
        Ok(self)
    }

    /// Restrict to dates inside `key`. Without a level filter this also
    /// selects the key's own level, i.e. the single rollup row per group.
    pub fn period(mut self, key: PeriodKey) -> Self {
        self.period = Some(key);
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn has_metric_selector(&self) -> bool {
        !self.metric_ids.is_empty()
    }

    /// Build and execute the query, returning fact rows.
    pub async fn facts(self, db: &Database) -> Result<Vec<FactRecord>> {
        let query = self;
        db.read(move |conn| {
            let (sql, params) = query.build_sql()?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(param_refs.as_slice(), fact_from_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?)
        })
        .await
    }

    /// Execute and return the number of matching rows.
    pub async fn count(self, db: &Database) -> Result<usize> {
        let query = self;
        db.read(move |conn| {
            let (inner_sql, params) = query.build_sql()?;
            let sql = format!("SELECT COUNT(*) FROM ({inner_sql})");
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Build and execute the query, returning results as JSON.
    pub async fn to_json(self, db: &Database) -> Result<String> {
        let rows = self.facts(db).await?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// Build and execute the query, returning results as CSV.
    pub async fn to_csv(self, db: &Database) -> Result<String> {
        let rows = self.facts(db).await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "id",
            "metric_id",
            "group_name",
            "value",
            "date",
            "period_level",
            "record_inserted_date",
        ])?;
        for row in &rows {
            writer.write_record([
                row.id.to_string(),
                row.metric_id.to_string(),
                row.group_name.clone(),
                row.value.map_or(String::new(), |v| v.to_string()),
                row.date.clone(),
                row.period_level.to_string(),
                row.record_inserted_date.clone(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| Error::Other(e.to_string()))
    }

    fn build_sql(&self) -> Result<(String, Vec<Box<dyn rusqlite::types::ToSql>>)> {
        if self.metric_ids.is_empty() {
            return Err(Error::Usage(
                "a metric id or list of metric ids is required".into(),
            ));
        }

        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let mut in_list = |column: &str, values: Vec<Box<dyn rusqlite::types::ToSql>>| {
            let marks: Vec<String> = (0..values.len())
                .map(|i| format!("?{}", param_idx + i))
                .collect();
            param_idx += values.len();
            params.extend(values);
            if marks.len() == 1 {
                format!("{column} = {}", marks[0])
            } else {
                format!("{column} IN ({})", marks.join(", "))
            }
        };

        wheres.push(in_list(
            "metric_id",
            self.metric_ids.iter().map(|id| boxed(*id)).collect(),
        ));
        if !self.groups.is_empty() {
            wheres.push(in_list(
                "group_name",
                self.groups.iter().map(|g| boxed(g.clone())).collect(),
            ));
        }
        let mut levels = self.levels.clone();
        if let (true, Some(key)) = (levels.is_empty(), self.period) {
            levels.push(key.level.as_i64());
        }
        if !levels.is_empty() {
            wheres.push(in_list(
                "period_level",
                levels.into_iter().map(boxed).collect(),
            ));
        }
        if let Some(ref date) = self.date {
            wheres.push(in_list("date", vec![boxed(date.clone())]));
        }
        if let Some(ref date) = self.date_from {
            wheres.push(format!("date >= ?{param_idx}"));
            params.push(boxed(date.clone()));
            param_idx += 1;
        }
        if let Some(ref date) = self.date_to {
            wheres.push(format!("date <= ?{param_idx}"));
            params.push(boxed(date.clone()));
            param_idx += 1;
        }
        if let Some(key) = self.period {
            wheres.push(format!("date BETWEEN ?{param_idx} AND ?{}", param_idx + 1));
            params.push(boxed(date_key(key.start)));
            params.push(boxed(date_key(key.end())));
            param_idx += 2;
        }

        let mut sql = format!("SELECT {FACT_COLUMNS} FROM facts WHERE ");
        sql.push_str(&wheres.join(" AND "));
        sql.push_str(" ORDER BY metric_id, period_level, date, group_name");

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT ?{param_idx}"));
            params.push(boxed(limit));
        }

        Ok((sql, params))
    }
}

fn boxed<T: rusqlite::types::ToSql + 'static>(v: T) -> Box<dyn rusqlite::types::ToSql> {
    Box::new(v)
}
