use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::model::{
    Camp, Category, FactRecord, FactRow, MetricRecord, PeriodLevel, Site, StoreFormat,
};

// ── Metrics ────────────────────────────────────────────────────────

pub fn upsert_metric(conn: &Connection, metric: &MetricRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO metrics (
            id, metric_name, metric_desc, is_retail, is_marketing, is_survey,
            is_daily, is_monthly, is_quarterly, is_yearly, agg_method, etl_method
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            metric_name=excluded.metric_name, metric_desc=excluded.metric_desc,
            is_retail=excluded.is_retail, is_marketing=excluded.is_marketing,
            is_survey=excluded.is_survey, is_daily=excluded.is_daily,
            is_monthly=excluded.is_monthly, is_quarterly=excluded.is_quarterly,
            is_yearly=excluded.is_yearly, agg_method=excluded.agg_method,
            etl_method=excluded.etl_method",
        params![
            metric.id,
            metric.metric_name,
            metric.metric_desc,
            metric.is_retail as i32,
            metric.is_marketing as i32,
            metric.is_survey as i32,
            metric.is_daily as i32,
            metric.is_monthly as i32,
            metric.is_quarterly as i32,
            metric.is_yearly as i32,
            metric.agg_method,
            metric.etl_method,
        ],
    )?;
    Ok(())
}

const METRIC_COLUMNS: &str = "id, metric_name, metric_desc, is_retail, is_marketing, is_survey,
    is_daily, is_monthly, is_quarterly, is_yearly, agg_method, etl_method";

fn metric_from_row(row: &Row<'_>) -> Result<MetricRecord, rusqlite::Error> {
    Ok(MetricRecord {
        id: row.get(0)?,
        metric_name: row.get(1)?,
        metric_desc: row.get(2)?,
        is_retail: row.get::<_, i32>(3)? != 0,
        is_marketing: row.get::<_, i32>(4)? != 0,
        is_survey: row.get::<_, i32>(5)? != 0,
        is_daily: row.get::<_, i32>(6)? != 0,
        is_monthly: row.get::<_, i32>(7)? != 0,
        is_quarterly: row.get::<_, i32>(8)? != 0,
        is_yearly: row.get::<_, i32>(9)? != 0,
        agg_method: row.get(10)?,
        etl_method: row.get(11)?,
    })
}

pub fn get_metric(conn: &Connection, id: i64) -> Result<Option<MetricRecord>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE id = ?1"),
        params![id],
        metric_from_row,
    )
    .optional()
}

pub fn list_metrics(conn: &Connection) -> Result<Vec<MetricRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("SELECT {METRIC_COLUMNS} FROM metrics ORDER BY id"))?;
    let rows = stmt.query_map([], metric_from_row)?;
    rows.collect()
}

/// Ids of metrics flagged for any of `categories`; an empty slice means
/// every metric.
pub fn metric_ids_for_categories(
    conn: &Connection,
    categories: &[Category],
) -> Result<Vec<i64>, rusqlite::Error> {
    let mut clauses = Vec::new();
    for category in categories {
        let clause = match category {
            Category::Retail => "is_retail = 1",
            Category::Marketing => "is_marketing = 1",
            Category::Survey => "is_survey = 1",
            Category::Other => "(is_retail = 0 AND is_marketing = 0 AND is_survey = 0)",
        };
        if !clauses.contains(&clause) {
            clauses.push(clause);
        }
    }
    let mut sql = "SELECT id FROM metrics".to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" OR "));
    }
    sql.push_str(" ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

// ── Sites ──────────────────────────────────────────────────────────

pub fn upsert_site(conn: &Connection, site: &Site) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sites (site_id, site_name, command_name, store_format)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(site_id) DO UPDATE SET
           site_name=excluded.site_name, command_name=excluded.command_name,
           store_format=excluded.store_format",
        params![
            site.site_id,
            site.site_name,
            site.command_name,
            site.store_format.map(StoreFormat::as_str),
        ],
    )?;
    Ok(())
}

fn site_from_row(row: &Row<'_>) -> Result<Site, rusqlite::Error> {
    let format: Option<String> = row.get(3)?;
    let store_format = format
        .map(|f| {
            f.parse::<StoreFormat>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))
        })
        .transpose()?;
    Ok(Site {
        site_id: row.get(0)?,
        site_name: row.get(1)?,
        command_name: row.get(2)?,
        store_format,
    })
}

pub fn get_site(conn: &Connection, site_id: i64) -> Result<Option<Site>, rusqlite::Error> {
    conn.query_row(
        "SELECT site_id, site_name, command_name, store_format FROM sites WHERE site_id = ?1",
        params![site_id],
        site_from_row,
    )
    .optional()
}

pub fn list_sites(conn: &Connection) -> Result<Vec<Site>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT site_id, site_name, command_name, store_format FROM sites ORDER BY site_id",
    )?;
    let rows = stmt.query_map([], site_from_row)?;
    rows.collect()
}

// ── Camps ──────────────────────────────────────────────────────────

/// Upsert by name. `name` is `COLLATE NOCASE`, so a differently-cased name
/// updates the existing camp.
pub fn upsert_camp(conn: &Connection, camp: &Camp) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO camps (name, lat, long) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET lat=excluded.lat, long=excluded.long",
        params![camp.name, camp.lat, camp.long],
    )?;
    Ok(())
}

pub fn list_camps(conn: &Connection) -> Result<Vec<Camp>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT name, lat, long FROM camps ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok(Camp {
            name: row.get(0)?,
            lat: row.get(1)?,
            long: row.get(2)?,
        })
    })?;
    rows.collect()
}

// ── Facts ──────────────────────────────────────────────────────────

/// Insert-or-update on (metric_id, group_name, date, period_level). Only
/// `value` changes on conflict.
pub fn upsert_fact(conn: &Connection, fact: &FactRow) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO facts (metric_id, group_name, value, date, period_level)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(metric_id, group_name, date, period_level)
         DO UPDATE SET value = excluded.value",
    )?;
    stmt.execute(params![
        fact.metric_id,
        fact.group.encode(),
        fact.value,
        fact.date_key(),
        fact.level.as_i64(),
    ])?;
    Ok(())
}

/// Upsert every row; returns the number processed.
pub fn upsert_facts(conn: &Connection, facts: &[FactRow]) -> Result<usize, rusqlite::Error> {
    for fact in facts {
        upsert_fact(conn, fact)?;
    }
    Ok(facts.len())
}

pub fn delete_facts_above_level(
    conn: &Connection,
    metric_id: i64,
    level: PeriodLevel,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM facts WHERE metric_id = ?1 AND period_level > ?2",
        params![metric_id, level.as_i64()],
    )
}

pub fn delete_facts_for_groups(
    conn: &Connection,
    metric_id: i64,
    group_names: &[String],
) -> Result<usize, rusqlite::Error> {
    let mut stmt =
        conn.prepare_cached("DELETE FROM facts WHERE metric_id = ?1 AND group_name = ?2")?;
    let mut deleted = 0;
    for name in group_names {
        deleted += stmt.execute(params![metric_id, name])?;
    }
    Ok(deleted)
}

pub fn distinct_group_names(
    conn: &Connection,
    metric_id: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT group_name FROM facts WHERE metric_id = ?1 ORDER BY group_name",
    )?;
    let rows = stmt.query_map(params![metric_id], |row| row.get(0))?;
    rows.collect()
}

pub(crate) const FACT_COLUMNS: &str =
    "id, metric_id, group_name, value, date, period_level, record_inserted_date";

pub(crate) fn fact_from_row(row: &Row<'_>) -> Result<FactRecord, rusqlite::Error> {
    Ok(FactRecord {
        id: row.get(0)?,
        metric_id: row.get(1)?,
        group_name: row.get(2)?,
        value: row.get(3)?,
        date: row.get(4)?,
        period_level: row.get(5)?,
        record_inserted_date: row.get(6)?,
    })
}

/// Facts for a metric, optionally restricted to one level, in date order.
pub fn facts_for_metric(
    conn: &Connection,
    metric_id: i64,
    level: Option<PeriodLevel>,
) -> Result<Vec<FactRecord>, rusqlite::Error> {
    let mut sql = format!("SELECT {FACT_COLUMNS} FROM facts WHERE metric_id = ?1");
    let mut values = vec![metric_id];
    if let Some(level) = level {
        sql.push_str(" AND period_level = ?2");
        values.push(level.as_i64());
    }
    sql.push_str(" ORDER BY date, period_level, group_name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), fact_from_row)?;
    rows.collect()
}

/// Row counts per (metric, level) for the status overview.
pub fn fact_counts(conn: &Connection) -> Result<Vec<(i64, i64, i64)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT metric_id, period_level, COUNT(*) FROM facts
         GROUP BY metric_id, period_level ORDER BY metric_id, period_level",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    rows.collect()
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}
