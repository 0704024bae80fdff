//! codescope-index - ingestion pipeline and incremental updates
//!
//! - [`ingestion`] — clone → scan → chunk → embed → store ∥ graph-ingest
//! - [`update`] — `(base, head)` diff replay with the per-file mutation
//!   protocol
//! - [`watcher`] — debounced folder watching feeding reingest events
//! - [`catalog`] — the on-disk repository catalog (`metadata.json`)
//! - [`git`] — git CLI wrapper (clone/fetch/diff/rev-parse)
//! - [`locks`] — per-repository exclusivity shared by index and update

pub mod catalog;
pub mod error;
pub mod git;
pub mod ingestion;
pub mod locks;
pub mod update;
pub mod watcher;

// Re-exports
pub use catalog::{RepositoryCatalog, RepositoryRecord};
pub use error::{IndexError, Result};
pub use git::{repo_name_from_url, ChangeSet};
pub use ingestion::{
    FileError, IndexOptions, IndexOutcome, IndexPhase, IndexStats, IngestionConfig,
    IngestionService, OpStatus, ProgressFn,
};
pub use locks::{RepoGuard, RepoLocks};
pub use update::{UpdateCoordinator, UpdateOutcome, UpdateStats, UpdateStatus};
pub use watcher::{
    FileEvent, FileEventKind, FolderWatcher, WatchedFolder, WatcherState, WatcherStatus,
};
