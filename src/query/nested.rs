use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::date_util::parse_date_key;
use crate::directory::Directory;
use crate::error::Result;
use crate::model::{Category, FactRecord, GroupRef, Metric, PeriodLevel, Site};

/// Facts reshaped for reports:
/// `category → metric id → group → "YYYYMMDD to YYYYMMDD" → value`.
#[derive(Debug, Clone, Serialize)]
pub struct NestedReport {
    pub result: BTreeMap<Category, BTreeMap<i64, MetricNode>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricNode {
    pub metadata: Option<Metric>,
    #[serde(flatten)]
    pub groups: BTreeMap<String, GroupNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupNode {
    /// Directory entry when the group is a known site.
    pub metadata: Option<Site>,
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl NestedReport {
    pub fn is_empty(&self) -> bool {
        self.result.values().all(BTreeMap::is_empty)
    }
}

/// Build a [`NestedReport`]. Every category key is present even when empty;
/// facts for metrics missing from `metrics` land under `other`.
pub fn nest_facts(
    facts: &[FactRecord],
    metrics: &[Metric],
    directory: &Directory,
) -> Result<NestedReport> {
    let mut result: BTreeMap<Category, BTreeMap<i64, MetricNode>> = [
        Category::Retail,
        Category::Survey,
        Category::Marketing,
        Category::Other,
    ]
    .into_iter()
    .map(|c| (c, BTreeMap::new()))
    .collect();

    let by_id: HashMap<i64, &Metric> = metrics.iter().map(|m| (m.id, m)).collect();

    for fact in facts {
        let metric = by_id.get(&fact.metric_id).copied();
        let category = metric.map_or(Category::Other, |m| m.categories.primary());
        let level = PeriodLevel::try_from_i64(fact.period_level)?;
        let range = level.range_label(parse_date_key(&fact.date)?);

        let metric_node = result
            .entry(category)
            .or_default()
            .entry(fact.metric_id)
            .or_insert_with(|| MetricNode {
                metadata: metric.cloned(),
                groups: BTreeMap::new(),
            });
        let group_node = metric_node
            .groups
            .entry(fact.group_name.clone())
            .or_insert_with(|| GroupNode {
                metadata: GroupRef::decode(&fact.group_name)
                    .ok()
                    .and_then(|g| g.site_id())
                    .and_then(|id| directory.site(id).cloned()),
                values: BTreeMap::new(),
            });
        group_node.values.insert(range, fact.value);
    }

    Ok(NestedReport { result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Categories, StoreFormat};

    fn metric(id: i64, categories: Categories) -> Metric {
        Metric {
            id,
            name: format!("Metric {id}"),
            description: None,
            categories,
            base: PeriodLevel::Daily,
            rollups: vec![PeriodLevel::Monthly],
            agg_method: None,
            etl_method: None,
        }
    }

    fn fact(metric_id: i64, group: &str, date: &str, level: i64, value: f64) -> FactRecord {
        FactRecord {
            id: 0,
            metric_id,
            group_name: group.into(),
            value: Some(value),
            date: date.into(),
            period_level: level,
            record_inserted_date: String::new(),
        }
    }

    #[test]
    fn test_nesting_and_category_precedence() {
        let metrics = vec![
            metric(1, Categories { retail: true, marketing: true, survey: false }),
            metric(2, Categories { retail: false, marketing: true, survey: true }),
        ];
        let directory = Directory::from_parts(
            vec![Site {
                site_id: 100,
                site_name: Some("Main Exchange".into()),
                command_name: Some("Alpha".into()),
                store_format: Some(StoreFormat::MainStore),
            }],
            vec![],
        );
        let facts = vec![
            fact(1, "100", "2024-01-05", 1, 10.0),
            fact(1, "100", "2024-01-01", 2, 25.0),
            fact(2, "all", "2024-10-01", 3, 0.8),
            fact(9, "all", "2024-01-01", 4, 1.0),
        ];
        let report = nest_facts(&facts, &metrics, &directory).unwrap();

        let retail = &report.result[&Category::Retail][&1];
        let site = &retail.groups["100"];
        assert_eq!(site.metadata.as_ref().unwrap().site_name.as_deref(), Some("Main Exchange"));
        assert_eq!(site.values["20240105 to 20240105"], Some(10.0));
        assert_eq!(site.values["20240101 to 20240131"], Some(25.0));

        let survey = &report.result[&Category::Survey][&2];
        assert!(survey.groups["all"].metadata.is_none());
        assert_eq!(survey.groups["all"].values["20241001 to 20241231"], Some(0.8));

        let other = &report.result[&Category::Other][&9];
        assert!(other.metadata.is_none());
        assert!(report.result[&Category::Marketing].is_empty());
    }

    #[test]
    fn test_empty_report_keeps_every_category() {
        let report = nest_facts(&[], &[], &Directory::default()).unwrap();
        assert!(report.is_empty());
        let json = serde_json::to_value(&report).unwrap();
        let keys: Vec<&String> = json["result"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["marketing", "other", "retail", "survey"]);
    }

    #[test]
    fn test_json_shape_flattens_groups_and_ranges() {
        let metrics = vec![metric(1, Categories { retail: true, marketing: false, survey: false })];
        let report = nest_facts(
            &[fact(1, "all", "2024-01-01", 2, 5.0)],
            &metrics,
            &Directory::default(),
        )
        .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"]["retail"]["1"]["all"]["20240101 to 20240131"], 5.0);
        assert_eq!(json["result"]["retail"]["1"]["metadata"]["name"], "Metric 1");
    }
}
