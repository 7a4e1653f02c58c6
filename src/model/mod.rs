mod fact;
mod group;
mod level;
mod metric;
mod site;

pub use fact::{validate_rows, FactRecord, FactRow, RawFact};
pub use group::{GroupRef, StoreFormat, ALL_GROUP};
pub use level::PeriodLevel;
pub use metric::{Categories, Category, Metric, MetricRecord};
pub use site::{Camp, Site};
