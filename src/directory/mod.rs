pub mod loader;

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::error::Result;
use crate::model::{Camp, Site, StoreFormat};
use crate::storage::repository;

/// Read-only snapshot of the site and camp directory, taken once per
/// aggregation run and shared by every metric in it.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    sites: BTreeMap<i64, Site>,
    camps: Vec<Camp>,
}

impl Directory {
    pub fn load(conn: &Connection) -> Result<Self> {
        let sites = repository::list_sites(conn)?;
        let camps = repository::list_camps(conn)?;
        Ok(Self::from_parts(sites, camps))
    }

    pub fn from_parts(sites: Vec<Site>, camps: Vec<Camp>) -> Self {
        Self {
            sites: sites.into_iter().map(|s| (s.site_id, s)).collect(),
            camps,
        }
    }

    pub fn site(&self, site_id: i64) -> Option<&Site> {
        self.sites.get(&site_id)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    pub fn camps(&self) -> &[Camp] {
        &self.camps
    }

    /// Camp (command) name of a site, if it has a non-blank one.
    pub fn camp_of(&self, site_id: i64) -> Option<&str> {
        self.site(site_id)
            .and_then(|s| s.command_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn format_of(&self, site_id: i64) -> Option<StoreFormat> {
        self.site(site_id).and_then(|s| s.store_format)
    }

    /// Display name of a site, falling back to its id.
    pub fn site_label(&self, site_id: i64) -> String {
        self.site(site_id)
            .and_then(|s| s.site_name.clone())
            .unwrap_or_else(|| site_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: i64, camp: Option<&str>, format: Option<StoreFormat>) -> Site {
        Site {
            site_id: id,
            site_name: None,
            command_name: camp.map(String::from),
            store_format: format,
        }
    }

    #[test]
    fn test_lookups() {
        let dir = Directory::from_parts(
            vec![
                site(100, Some("Alpha"), Some(StoreFormat::MainStore)),
                site(200, Some("  "), None),
            ],
            vec![],
        );
        assert_eq!(dir.camp_of(100), Some("Alpha"));
        assert_eq!(dir.camp_of(200), None);
        assert_eq!(dir.camp_of(300), None);
        assert_eq!(dir.format_of(100), Some(StoreFormat::MainStore));
        assert_eq!(dir.format_of(200), None);
        assert_eq!(dir.site_label(200), "200");
        assert_eq!(dir.sites().count(), 2);
    }
}
