pub mod builder;
pub mod nested;
pub mod period;

pub use builder::FactQuery;
pub use nested::{nest_facts, NestedReport};
pub use period::PeriodKey;
