pub mod group;
mod method;
pub mod time;

use rusqlite::Connection;
use serde::Serialize;

pub use group::{aggregate_by_group, roll_up_groups, GroupRollup};
pub use method::AggMethod;
pub use time::{aggregate_by_time, roll_up_time, TimeRollup};

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::model::Metric;
use crate::storage::repository;

/// Look up and decode a metric; absence is `NotFound`.
pub fn load_metric(conn: &Connection, metric_id: i64) -> Result<Metric> {
    let record = repository::get_metric(conn, metric_id)?
        .ok_or_else(|| Error::NotFound(format!("metric {metric_id}")))?;
    Metric::try_from(record)
}

/// What one purge + recompute + write cycle did to a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub metric_id: i64,
    pub purged: usize,
    pub written: usize,
    pub unmapped_camp_sites: usize,
    pub unmapped_format_sites: usize,
}

/// Recompute a metric's time rollups and write them, all in one transaction.
pub fn time_cycle(
    conn: &mut Connection,
    metric_id: i64,
    method: Option<AggMethod>,
) -> Result<CycleReport> {
    let tx = conn.transaction()?;
    let rollup = aggregate_by_time(&tx, metric_id, method)?;
    let written = repository::upsert_facts(&tx, &rollup.rows)?;
    tx.commit()?;
    Ok(CycleReport {
        metric_id,
        purged: rollup.purged,
        written,
        ..Default::default()
    })
}

/// Recompute a metric's hierarchy rollups and write them, all in one
/// transaction.
pub fn group_cycle(
    conn: &mut Connection,
    metric_id: i64,
    method: Option<AggMethod>,
    directory: &Directory,
) -> Result<CycleReport> {
    let tx = conn.transaction()?;
    let rollup = aggregate_by_group(&tx, metric_id, method, directory)?;
    let written = repository::upsert_facts(&tx, &rollup.rows)?;
    tx.commit()?;
    Ok(CycleReport {
        metric_id,
        purged: rollup.purged,
        written,
        unmapped_camp_sites: rollup.unmapped_camp_sites,
        unmapped_format_sites: rollup.unmapped_format_sites,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::model::{PeriodLevel, Site, StoreFormat};
    use crate::storage::Database;

    #[tokio::test]
    async fn test_config_error_rolls_back_cycle() {
        let db = Database::open_memory().await.unwrap();
        let err = db
            .write(|conn| {
                insert_metric(conn, metric_record(1, ""));
                let mut monthly = daily(1, "100", 4.0, ymd(2024, 1, 1));
                monthly.level = PeriodLevel::Monthly;
                insert_facts(conn, &[daily(1, "100", 1.0, ymd(2024, 1, 5)), monthly]);
                time_cycle(conn, 1, None)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // Nothing was purged: the stale monthly row is still there.
        let remaining = db
            .read(|conn| Ok(repository::facts_for_metric(conn, 1, Some(PeriodLevel::Monthly))?))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_time_then_groups() {
        let db = Database::open_memory().await.unwrap();
        let directory = Directory::from_parts(
            vec![
                Site {
                    site_id: 100,
                    site_name: None,
                    command_name: Some("Alpha".into()),
                    store_format: Some(StoreFormat::MainStore),
                },
                Site {
                    site_id: 200,
                    site_name: None,
                    command_name: Some("Bravo".into()),
                    store_format: Some(StoreFormat::MarineMart),
                },
            ],
            vec![],
        );
        let (time, groups, monthly_all) = db
            .write(move |conn| {
                insert_metric(conn, metric_record(1, "sum"));
                insert_facts(
                    conn,
                    &[
                        daily(1, "100", 10.0, ymd(2024, 1, 5)),
                        daily(1, "100", 15.0, ymd(2024, 1, 20)),
                        daily(1, "200", 7.5, ymd(2024, 1, 9)),
                    ],
                );
                let time = time_cycle(conn, 1, None)?;
                let groups = group_cycle(conn, 1, None, &directory)?;
                let monthly_all: Vec<_> = repository::facts_for_metric(conn, 1, Some(PeriodLevel::Monthly))?
                    .into_iter()
                    .filter(|f| f.group_name == "all")
                    .collect();
                Ok((time, groups, monthly_all))
            })
            .await
            .unwrap();

        assert_eq!(time.written, 5);
        assert_eq!(groups.unmapped_camp_sites, 0);
        assert_eq!(monthly_all.len(), 1);
        assert_eq!(monthly_all[0].value, Some(32.5));
    }
}
