//! Repository catalog.
//!
//! Persisted at `{data_path}/metadata.json` as `{"repos": [...]}`. Saves are
//! atomic (write to a temp file, then rename). The catalog is the only owner
//! of repository lifecycle state; services mutate records through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use codescope_core::RepoStatus;

use crate::error::{IndexError, Result};

/// Catalog file name under the data path.
const CATALOG_FILE: &str = "metadata.json";

/// One tracked repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub url: String,
    pub branch: String,
    pub local_path: PathBuf,
    pub status: RepoStatus,
    pub last_indexed_commit: Option<String>,
    pub file_count: usize,
    pub chunk_count: usize,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub include_extensions: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
}

impl RepositoryRecord {
    pub fn new(name: &str, url: &str, branch: &str, local_path: PathBuf) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.to_string(),
            url: url.to_string(),
            branch: branch.to_string(),
            local_path,
            status: RepoStatus::Pending,
            last_indexed_commit: None,
            file_count: 0,
            chunk_count: 0,
            created_at: now.clone(),
            updated_at: now,
            include_extensions: None,
            exclude_patterns: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    repos: Vec<RepositoryRecord>,
}

/// On-disk repository catalog.
#[derive(Debug)]
pub struct RepositoryCatalog {
    path: PathBuf,
    repos: BTreeMap<String, RepositoryRecord>,
}

impl RepositoryCatalog {
    /// Load from `{data_path}/metadata.json`, starting empty when absent.
    pub fn load(data_path: &Path) -> Result<Self> {
        let path = data_path.join(CATALOG_FILE);
        let repos = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| IndexError::Catalog(format!("read {}: {e}", path.display())))?;
            let file: CatalogFile = serde_json::from_str(&raw)
                .map_err(|e| IndexError::Catalog(format!("parse {}: {e}", path.display())))?;
            file.repos.into_iter().map(|r| (r.name.clone(), r)).collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, repos })
    }

    /// Atomic save: temp file + rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = CatalogFile {
            repos: self.repos.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| IndexError::Catalog(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| IndexError::Catalog(format!("rename {}: {e}", self.path.display())))?;
        debug!("catalog saved ({} repositories)", self.repos.len());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryRecord> {
        self.repos.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RepositoryRecord> {
        self.repos.get_mut(name)
    }

    pub fn upsert(&mut self, record: RepositoryRecord) {
        self.repos.insert(record.name.clone(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<RepositoryRecord> {
        self.repos.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repos.contains_key(name)
    }

    /// Records sorted by name.
    pub fn list(&self) -> Vec<&RepositoryRecord> {
        self.repos.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> RepositoryRecord {
        RepositoryRecord::new(
            name,
            "https://example.com/r.git",
            "main",
            PathBuf::from("/data/repos").join(name),
        )
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = RepositoryCatalog::load(dir.path()).unwrap();
        assert!(catalog.list().is_empty());

        catalog.upsert(record("alpha"));
        catalog.upsert(record("beta"));
        catalog.save().unwrap();

        let reloaded = RepositoryCatalog::load(dir.path()).unwrap();
        assert_eq!(reloaded.list().len(), 2);
        assert!(reloaded.contains("alpha"));
        assert_eq!(reloaded.get("beta").unwrap().status, RepoStatus::Pending);
    }

    #[test]
    fn save_is_atomic_no_tmp_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = RepositoryCatalog::load(dir.path()).unwrap();
        catalog.upsert(record("r"));
        catalog.save().unwrap();
        assert!(dir.path().join("metadata.json").exists());
        assert!(!dir.path().join("metadata.json.tmp").exists());
    }

    #[test]
    fn status_mutations_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = RepositoryCatalog::load(dir.path()).unwrap();
        catalog.upsert(record("r"));
        {
            let rec = catalog.get_mut("r").unwrap();
            rec.status = RepoStatus::Ready;
            rec.last_indexed_commit = Some("abc123".into());
            rec.touch();
        }
        catalog.save().unwrap();

        let reloaded = RepositoryCatalog::load(dir.path()).unwrap();
        let rec = reloaded.get("r").unwrap();
        assert_eq!(rec.status, RepoStatus::Ready);
        assert_eq!(rec.last_indexed_commit.as_deref(), Some("abc123"));
    }

    #[test]
    fn remove_deletes_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = RepositoryCatalog::load(dir.path()).unwrap();
        catalog.upsert(record("r"));
        assert!(catalog.remove("r").is_some());
        assert!(catalog.remove("r").is_none());
        assert!(!catalog.contains("r"));
    }

    #[test]
    fn corrupt_catalog_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata.json"), "{not json").unwrap();
        assert!(matches!(
            RepositoryCatalog::load(dir.path()),
            Err(IndexError::Catalog(_))
        ));
    }
}
