//! Per-repository exclusivity for index and update operations.
//!
//! Keyed fail-fast mutex map (I3): the ingestion service and the update
//! coordinator both take the repository's key before touching either store;
//! contention returns a typed error instead of waiting. Guards release on
//! every exit path; re-entry fails fast like any other contention.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{IndexError, Result};

/// Keyed per-repository lock map shared by C8 and C9.
#[derive(Default, Clone)]
pub struct RepoLocks {
    held: Arc<DashMap<String, ()>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail-fast acquisition.
    pub fn try_lock(&self, repo: &str) -> Result<RepoGuard> {
        use dashmap::mapref::entry::Entry;
        match self.held.entry(repo.to_string()) {
            Entry::Occupied(_) => Err(IndexError::OperationInProgress(repo.to_string())),
            Entry::Vacant(v) => {
                v.insert(());
                Ok(RepoGuard {
                    held: Arc::clone(&self.held),
                    repo: repo.to_string(),
                })
            }
        }
    }

    pub fn is_locked(&self, repo: &str) -> bool {
        self.held.contains_key(repo)
    }
}

/// Scoped lock; releases on drop.
pub struct RepoGuard {
    held: Arc<DashMap<String, ()>>,
    repo: String,
}

impl RepoGuard {
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl Drop for RepoGuard {
    fn drop(&mut self) {
        self.held.remove(&self.repo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_update_exclude_each_other() {
        let locks = RepoLocks::new();
        let guard = locks.try_lock("r1").unwrap();
        assert!(matches!(
            locks.try_lock("r1"),
            Err(IndexError::OperationInProgress(_))
        ));
        drop(guard);
        assert!(locks.try_lock("r1").is_ok());
    }

    #[test]
    fn independent_repositories_run_in_parallel() {
        let locks = RepoLocks::new();
        let _a = locks.try_lock("a").unwrap();
        let _b = locks.try_lock("b").unwrap();
        assert!(locks.is_locked("a"));
        assert!(locks.is_locked("b"));
    }

    #[test]
    fn reentry_fails_fast() {
        let locks = RepoLocks::new();
        let _guard = locks.try_lock("r").unwrap();
        assert!(locks.try_lock("r").is_err());
    }

    #[test]
    fn guard_releases_on_panic_path() {
        let locks = RepoLocks::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = locks.try_lock("r").unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!locks.is_locked("r"));
    }
}
