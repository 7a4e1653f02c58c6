use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// Literal stored in `group_name` for the all-sites rollup.
pub const ALL_GROUP: &str = "all";

/// Store-format class of a site. The persisted values are constrained by a
/// CHECK on `sites.store_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreFormat {
    MainStore,
    MarineMart,
}

impl StoreFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreFormat::MainStore => "MAIN STORE",
            StoreFormat::MarineMart => "MARINE MART",
        }
    }
}

impl FromStr for StoreFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "MAIN STORE" => Ok(StoreFormat::MainStore),
            "MARINE MART" => Ok(StoreFormat::MarineMart),
            other => Err(Error::Validation(format!("unknown store format: {other:?}"))),
        }
    }
}

impl fmt::Display for StoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StoreFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The group dimension of a fact: one site, a camp, a store-format class, or
/// every site.
///
/// In storage this collapses to the single `group_name` string column;
/// [`GroupRef::encode`] and [`GroupRef::decode`] are the only places that
/// translate between the two.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupRef {
    Site(i64),
    Camp(String),
    Format(StoreFormat),
    All,
}

impl GroupRef {
    pub fn encode(&self) -> String {
        match self {
            GroupRef::Site(id) => id.to_string(),
            GroupRef::Camp(name) => name.clone(),
            GroupRef::Format(format) => format.as_str().to_string(),
            GroupRef::All => ALL_GROUP.to_string(),
        }
    }

    /// Decode a stored `group_name`. Integers are sites, the `all` literal is
    /// the all-sites group, the closed set of store formats are formats, and
    /// anything else is a camp name.
    pub fn decode(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(Error::Validation("empty group name".into()));
        }
        if s == ALL_GROUP {
            return Ok(GroupRef::All);
        }
        if let Ok(id) = s.parse::<i64>() {
            return Ok(GroupRef::Site(id));
        }
        if let Ok(format) = s.parse::<StoreFormat>() {
            return Ok(GroupRef::Format(format));
        }
        Ok(GroupRef::Camp(s.to_string()))
    }

    pub fn site_id(&self) -> Option<i64> {
        match self {
            GroupRef::Site(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_site(&self) -> bool {
        matches!(self, GroupRef::Site(_))
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for GroupRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_each_variant() {
        assert_eq!(GroupRef::decode("100").unwrap(), GroupRef::Site(100));
        assert_eq!(GroupRef::decode("all").unwrap(), GroupRef::All);
        assert_eq!(
            GroupRef::decode("MARINE MART").unwrap(),
            GroupRef::Format(StoreFormat::MarineMart)
        );
        assert_eq!(
            GroupRef::decode("Camp Lejeune").unwrap(),
            GroupRef::Camp("Camp Lejeune".into())
        );
        assert!(GroupRef::decode("  ").is_err());
    }

    #[test]
    fn test_encode_matches_column_values() {
        assert_eq!(GroupRef::Site(42).encode(), "42");
        assert_eq!(GroupRef::All.encode(), "all");
        assert_eq!(GroupRef::Format(StoreFormat::MainStore).encode(), "MAIN STORE");
        assert_eq!(GroupRef::Camp("Alpha".into()).encode(), "Alpha");
    }

    #[test]
    fn test_store_format_parse_is_case_insensitive() {
        assert_eq!("main store".parse::<StoreFormat>().unwrap(), StoreFormat::MainStore);
        assert!("KIOSK".parse::<StoreFormat>().is_err());
    }

    #[test]
    fn test_only_sites_report_site_id() {
        assert_eq!(GroupRef::Site(7).site_id(), Some(7));
        assert_eq!(GroupRef::All.site_id(), None);
        assert!(!GroupRef::Camp("7th".into()).is_site());
    }
}
