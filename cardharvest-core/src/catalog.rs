use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HarvestError, HarvestResult};
use crate::scraper::{dedup_references, SetReference};

/// One discovered set as written to the metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(alias = "set_id")]
    pub set_id: String,
    pub title: String,
    pub url: String,
    #[serde(default, alias = "term_count")]
    pub term_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "created_by", skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl From<SetReference> for CatalogEntry {
    fn from(reference: SetReference) -> Self {
        Self {
            set_id: reference.id,
            title: reference.title,
            url: reference.url,
            term_count: reference.approx_term_count,
            description: None,
            created_by: None,
        }
    }
}

/// Snapshot of a discovery run; later scrapes read set URLs from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(alias = "discovered_at")]
    pub discovered_at: DateTime<Utc>,
    #[serde(alias = "total_sets")]
    pub total_sets: usize,
    #[serde(default)]
    pub sets: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_references(references: Vec<SetReference>) -> Self {
        let sets: Vec<CatalogEntry> = references.into_iter().map(CatalogEntry::from).collect();
        Self {
            discovered_at: Utc::now(),
            total_sets: sets.len(),
            sets,
        }
    }

    pub fn find(&self, set_id: &str) -> Option<&CatalogEntry> {
        self.sets.iter().find(|entry| entry.set_id == set_id)
    }

    pub fn urls(&self) -> Vec<String> {
        self.sets.iter().map(|entry| entry.url.clone()).collect()
    }

    pub fn save(&self, path: &Path) -> HarvestResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        info!(path = %path.display(), sets = self.total_sets, "catalog saved");
        Ok(())
    }

    /// A missing file means discovery has not run yet.
    pub fn load(path: &Path) -> HarvestResult<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(HarvestError::CatalogMissing {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }
}

/// Own sets first, then shared ones; the first reference per id wins.
pub fn merge_references(
    primary: Vec<SetReference>,
    secondary: Vec<SetReference>,
) -> Vec<SetReference> {
    dedup_references(primary.into_iter().chain(secondary))
}
