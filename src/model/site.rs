use serde::Serialize;

use crate::model::StoreFormat;

/// A retail location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    pub site_id: i64,
    pub site_name: Option<String>,
    /// Parent camp/command name.
    pub command_name: Option<String>,
    pub store_format: Option<StoreFormat>,
}

/// A geographic grouping of sites. Names are unique ignoring case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Camp {
    pub name: String,
    pub lat: f64,
    pub long: f64,
}
