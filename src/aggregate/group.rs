use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::aggregate::{load_metric, AggMethod};
use crate::directory::Directory;
use crate::error::Result;
use crate::model::{FactRow, GroupRef, PeriodLevel, StoreFormat};
use crate::storage::repository;

/// Output of one hierarchy-aggregation pass: the all-sites rows, then camp
/// rows, then store-format rows. Site-level rows are not re-emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupRollup {
    pub metric_id: i64,
    /// Non-site rows left over from earlier passes, removed first.
    pub purged: usize,
    pub rows: Vec<FactRow>,
    /// Distinct sites with facts but no camp mapping.
    pub unmapped_camp_sites: usize,
    /// Distinct sites with facts but no store format.
    pub unmapped_format_sites: usize,
}

/// Delete every non-site row for the metric, then compute the all-sites,
/// camp and store-format rollups over every (date, level) still present.
pub fn aggregate_by_group(
    conn: &Connection,
    metric_id: i64,
    method: Option<AggMethod>,
    directory: &Directory,
) -> Result<GroupRollup> {
    let metric = load_metric(conn, metric_id)?;
    let method = match method {
        Some(m) => m,
        None => metric.method()?,
    };

    let purged = purge_non_site_groups(conn, metric.id)?;

    let facts: Vec<FactRow> = repository::facts_for_metric(conn, metric.id, None)?
        .iter()
        .map(FactRow::from_record)
        .collect::<Result<_>>()?;

    let mut rollup = roll_up_groups(metric.id, method, &facts, directory);
    rollup.purged = purged;

    if rollup.unmapped_camp_sites > 0 || rollup.unmapped_format_sites > 0 {
        log::warn!(
            "metric {}: {} sites without a camp, {} without a store format",
            metric.id,
            rollup.unmapped_camp_sites,
            rollup.unmapped_format_sites
        );
    }
    log::info!(
        "metric {}: {} hierarchy rows from {} site rows ({method})",
        metric.id,
        rollup.rows.len(),
        facts.len()
    );
    Ok(rollup)
}

/// Remove rows whose group does not decode to a site.
fn purge_non_site_groups(conn: &Connection, metric_id: i64) -> Result<usize> {
    let mut stale = Vec::new();
    for name in repository::distinct_group_names(conn, metric_id)? {
        if !GroupRef::decode(&name).is_ok_and(|g| g.is_site()) {
            stale.push(name);
        }
    }
    if stale.is_empty() {
        return Ok(0);
    }
    log::debug!("metric {metric_id}: purging non-site groups {stale:?}");
    Ok(repository::delete_facts_for_groups(conn, metric_id, &stale)?)
}

type Bucket<K> = BTreeMap<(K, PeriodLevel, NaiveDate), Vec<Option<f64>>>;

/// Fan site rows out to the all-sites, camp and store-format buckets. Each
/// site row lands in at most one bucket per layer. Rows that are not
/// site-keyed are ignored.
pub fn roll_up_groups(
    metric_id: i64,
    method: AggMethod,
    facts: &[FactRow],
    directory: &Directory,
) -> GroupRollup {
    let mut all: Bucket<()> = BTreeMap::new();
    let mut camps: Bucket<String> = BTreeMap::new();
    let mut formats: Bucket<StoreFormat> = BTreeMap::new();
    let mut no_camp = BTreeSet::new();
    let mut no_format = BTreeSet::new();

    let mut site_rows: Vec<(i64, &FactRow)> =
        facts.iter().filter_map(|f| f.group.site_id().map(|id| (id, f))).collect();
    site_rows.sort_by(|a, b| (a.1.date, a.1.level, a.0).cmp(&(b.1.date, b.1.level, b.0)));

    for (site_id, fact) in site_rows {
        all.entry(((), fact.level, fact.date)).or_default().push(fact.value);

        match directory.camp_of(site_id) {
            Some(camp) => camps
                .entry((camp.to_string(), fact.level, fact.date))
                .or_default()
                .push(fact.value),
            None => {
                no_camp.insert(site_id);
            }
        }

        match directory.format_of(site_id) {
            Some(format) => formats
                .entry((format, fact.level, fact.date))
                .or_default()
                .push(fact.value),
            None => {
                no_format.insert(site_id);
            }
        }
    }

    let emit = |group: GroupRef, level: PeriodLevel, date: NaiveDate, values: Vec<Option<f64>>| {
        FactRow::new(metric_id, group, method.apply(&values), date, level)
    };

    let mut rows = Vec::with_capacity(all.len() + camps.len() + formats.len());
    rows.extend(
        all.into_iter()
            .map(|(((), level, date), values)| emit(GroupRef::All, level, date, values)),
    );
    rows.extend(
        camps
            .into_iter()
            .map(|((camp, level, date), values)| emit(GroupRef::Camp(camp), level, date, values)),
    );
    rows.extend(formats.into_iter().map(|((format, level, date), values)| {
        emit(GroupRef::Format(format), level, date, values)
    }));

    GroupRollup {
        metric_id,
        purged: 0,
        rows,
        unmapped_camp_sites: no_camp.len(),
        unmapped_format_sites: no_format.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::testing::{daily, insert_facts, insert_metric, metric_record, ymd};
    use crate::model::Site;
    use crate::storage::Database;

    fn directory() -> Directory {
        let site = |id, camp: Option<&str>, format| Site {
            site_id: id,
            site_name: None,
            command_name: camp.map(String::from),
            store_format: format,
        };
        Directory::from_parts(
            vec![
                site(100, Some("Alpha"), Some(StoreFormat::MainStore)),
                site(200, Some("Alpha"), Some(StoreFormat::MarineMart)),
                site(300, None, Some(StoreFormat::MainStore)),
            ],
            vec![],
        )
    }

    fn value_of(rows: &[FactRow], group: &GroupRef) -> Option<f64> {
        rows.iter().find(|r| &r.group == group).and_then(|r| r.value)
    }

    #[test]
    fn test_fan_out_without_double_count() {
        let facts = vec![
            daily(1, "100", 10.0, ymd(2024, 1, 5)),
            daily(1, "200", 10.0, ymd(2024, 1, 5)),
        ];
        let rollup = roll_up_groups(1, AggMethod::Sum, &facts, &directory());

        assert_eq!(rollup.rows.len(), 4);
        assert_eq!(value_of(&rollup.rows, &GroupRef::All), Some(20.0));
        assert_eq!(value_of(&rollup.rows, &GroupRef::Camp("Alpha".into())), Some(20.0));
        assert_eq!(
            value_of(&rollup.rows, &GroupRef::Format(StoreFormat::MainStore)),
            Some(10.0)
        );
        assert_eq!(
            value_of(&rollup.rows, &GroupRef::Format(StoreFormat::MarineMart)),
            Some(10.0)
        );
    }

    #[test]
    fn test_output_order_all_camp_format() {
        let facts = vec![daily(1, "100", 1.0, ymd(2024, 1, 5))];
        let rollup = roll_up_groups(1, AggMethod::Sum, &facts, &directory());
        let groups: Vec<String> = rollup.rows.iter().map(|r| r.group.encode()).collect();
        assert_eq!(groups, vec!["all", "Alpha", "MAIN STORE"]);
    }

    #[test]
    fn test_unmapped_sites_are_counted_and_dropped() {
        let facts = vec![
            daily(1, "300", 5.0, ymd(2024, 1, 5)),
            daily(1, "300", 5.0, ymd(2024, 1, 6)),
            daily(1, "999", 7.0, ymd(2024, 1, 5)),
        ];
        let rollup = roll_up_groups(1, AggMethod::Sum, &facts, &directory());

        assert_eq!(rollup.unmapped_camp_sites, 2);
        assert_eq!(rollup.unmapped_format_sites, 1);
        assert!(rollup.rows.iter().all(|r| !matches!(r.group, GroupRef::Camp(_))));
        let all_jan5 = rollup
            .rows
            .iter()
            .find(|r| r.group == GroupRef::All && r.date == ymd(2024, 1, 5))
            .unwrap();
        assert_eq!(all_jan5.value, Some(12.0));
    }

    #[test]
    fn test_each_level_and_date_is_independent() {
        let mut monthly = daily(1, "100", 30.0, ymd(2024, 1, 1));
        monthly.level = PeriodLevel::Monthly;
        let facts = vec![daily(1, "100", 10.0, ymd(2024, 1, 1)), monthly];
        let rollup = roll_up_groups(1, AggMethod::Sum, &facts, &directory());
        let all: Vec<(PeriodLevel, Option<f64>)> = rollup
            .rows
            .iter()
            .filter(|r| r.group == GroupRef::All)
            .map(|r| (r.level, r.value))
            .collect();
        assert_eq!(
            all,
            vec![(PeriodLevel::Daily, Some(10.0)), (PeriodLevel::Monthly, Some(30.0))]
        );
    }

    #[tokio::test]
    async fn test_stale_all_row_is_purged_not_counted() {
        let db = Database::open_memory().await.unwrap();
        let rollup = db
            .writer()
            .call(|conn| {
                insert_metric(conn, metric_record(1, "sum"));
                insert_facts(
                    conn,
                    &[
                        daily(1, "100", 10.0, ymd(2024, 1, 5)),
                        daily(1, "200", 10.0, ymd(2024, 1, 5)),
                        daily(1, "all", 999.0, ymd(2024, 1, 5)),
                        daily(1, "Alpha", 999.0, ymd(2024, 1, 5)),
                    ],
                );
                Ok::<_, rusqlite::Error>(aggregate_by_group(conn, 1, None, &directory()))
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rollup.purged, 2);
        assert_eq!(value_of(&rollup.rows, &GroupRef::All), Some(20.0));
        assert_eq!(value_of(&rollup.rows, &GroupRef::Camp("Alpha".into())), Some(20.0));
    }
}
