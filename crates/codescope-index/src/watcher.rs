//! Debounced folder watcher.
//!
//! Wraps `notify` with per-path coalescing over a debounce window. Events
//! are filtered by include/exclude patterns (matched on basename and
//! folder-relative path), symlinks are not traversed, and handlers run
//! sequentially per event — a panicking handler never stops the others or
//! future events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Pending-event warning threshold.
pub const PENDING_WARN_THRESHOLD: usize = 10_000;

/// Default cap on simultaneously watched folders.
pub const DEFAULT_MAX_WATCHERS: usize = 32;

/// A folder registered for watching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedFolder {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

/// Coalesced file event delivered to handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub folder_id: String,
    pub path: PathBuf,
    pub kind: FileEventKind,
    /// Raw events merged into this one.
    pub coalesced: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    Running,
    Error,
}

/// Snapshot of one watcher's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub id: String,
    pub path: PathBuf,
    pub state: WatcherState,
    pub pending_events: usize,
    pub events_delivered: u64,
}

pub type EventHandler = Arc<dyn Fn(&FileEvent) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

struct WatcherEntry {
    folder: WatchedFolder,
    // Dropping the watcher stops the native stream.
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
    state: Arc<RwLock<WatcherState>>,
    pending: Arc<AtomicUsize>,
    delivered: Arc<AtomicU64>,
}

struct Shared {
    handlers: RwLock<Vec<EventHandler>>,
    error_handlers: RwLock<Vec<ErrorHandler>>,
}

/// Folder watcher registry (C11).
pub struct FolderWatcher {
    shared: Arc<Shared>,
    watchers: DashMap<String, WatcherEntry>,
    max_watchers: usize,
}

impl FolderWatcher {
    pub fn new() -> Self {
        Self::with_max_watchers(DEFAULT_MAX_WATCHERS)
    }

    pub fn with_max_watchers(max_watchers: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                handlers: RwLock::new(Vec::new()),
                error_handlers: RwLock::new(Vec::new()),
            }),
            watchers: DashMap::new(),
            max_watchers,
        }
    }

    /// Register a handler for coalesced file events.
    pub fn on_file_event(&self, handler: EventHandler) {
        self.shared.handlers.write().push(handler);
    }

    /// Register a handler for watcher errors.
    pub fn on_error(&self, handler: ErrorHandler) {
        self.shared.error_handlers.write().push(handler);
    }

    /// Start watching a folder. Fails on duplicate id, missing directory,
    /// invalid patterns, or when the watcher cap is reached.
    pub fn start_watching(&self, folder: WatchedFolder) -> Result<()> {
        if self.watchers.len() >= self.max_watchers {
            return Err(IndexError::Watcher(format!(
                "watcher limit reached ({})",
                self.max_watchers
            )));
        }
        if self.watchers.contains_key(&folder.id) {
            return Err(IndexError::Watcher(format!(
                "folder '{}' is already watched",
                folder.id
            )));
        }
        if !folder.path.is_dir() {
            return Err(IndexError::Watcher(format!(
                "not a directory: {}",
                folder.path.display()
            )));
        }

        let include = build_globset(&folder.include_patterns)?;
        let exclude = build_globset(&folder.exclude_patterns)?;
        let debounce = Duration::from_millis(folder.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

        let (tx, rx) = mpsc::unbounded_channel::<RawEvent>();
        let state = Arc::new(RwLock::new(WatcherState::Running));
        let pending = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(AtomicU64::new(0));

        let error_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let Some(kind) = map_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        let _ = error_tx.send(RawEvent::File { path, kind });
                    }
                }
                Err(e) => {
                    let _ = error_tx.send(RawEvent::Error(e.to_string()));
                }
            }
        })
        .map_err(|e| IndexError::Watcher(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&folder.path, RecursiveMode::Recursive)
            .map_err(|e| IndexError::Watcher(format!("watch failed: {e}")))?;

        let task = tokio::spawn(debounce_loop(
            folder.clone(),
            include,
            exclude,
            debounce,
            rx,
            Arc::clone(&self.shared),
            Arc::clone(&state),
            Arc::clone(&pending),
            Arc::clone(&delivered),
        ));

        debug!("watching '{}' at {}", folder.id, folder.path.display());
        self.watchers.insert(
            folder.id.clone(),
            WatcherEntry {
                folder,
                _watcher: watcher,
                task,
                state,
                pending,
                delivered,
            },
        );
        Ok(())
    }

    pub fn stop_watching(&self, id: &str) -> Result<()> {
        let (_, entry) = self
            .watchers
            .remove(id)
            .ok_or_else(|| IndexError::Watcher(format!("no watcher with id '{id}'")))?;
        entry.task.abort();
        debug!("stopped watching '{id}'");
        Ok(())
    }

    /// Status of every active watcher, sorted by id.
    pub fn all_statuses(&self) -> Vec<WatcherStatus> {
        let mut statuses: Vec<WatcherStatus> = self
            .watchers
            .iter()
            .map(|entry| WatcherStatus {
                id: entry.key().clone(),
                path: entry.folder.path.clone(),
                state: *entry.state.read(),
                pending_events: entry.pending.load(Ordering::Relaxed),
                events_delivered: entry.delivered.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Stop every watcher.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.stop_watching(&id);
        }
    }
}

impl Default for FolderWatcher {
    fn default() -> Self {
        Self::new()
    }
}

enum RawEvent {
    File { path: PathBuf, kind: FileEventKind },
    Error(String),
}

struct PendingEvent {
    kind: FileEventKind,
    last_seen: Instant,
    count: usize,
}

#[allow(clippy::too_many_arguments)]
async fn debounce_loop(
    folder: WatchedFolder,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<RawEvent>,
    shared: Arc<Shared>,
    state: Arc<RwLock<WatcherState>>,
    pending_gauge: Arc<AtomicUsize>,
    delivered: Arc<AtomicU64>,
) {
    let mut pending: HashMap<PathBuf, PendingEvent> = HashMap::new();
    let tick_every = debounce
        .min(Duration::from_millis(200))
        .max(Duration::from_millis(10));
    let mut tick = tokio::time::interval(tick_every);
    let mut warned = false;

    loop {
        tokio::select! {
            raw = rx.recv() => {
                match raw {
                    Some(RawEvent::File { path, kind }) => {
                        if !accept_path(&folder, include.as_ref(), exclude.as_ref(), &path) {
                            continue;
                        }
                        let entry = pending.entry(path).or_insert(PendingEvent {
                            kind,
                            last_seen: Instant::now(),
                            count: 0,
                        });
                        entry.kind = merge_kind(entry.kind, kind);
                        entry.last_seen = Instant::now();
                        entry.count += 1;
                        pending_gauge.store(pending.len(), Ordering::Relaxed);

                        if pending.len() > PENDING_WARN_THRESHOLD && !warned {
                            warned = true;
                            warn!(
                                "watcher '{}' pending events exceed {PENDING_WARN_THRESHOLD}",
                                folder.id
                            );
                            notify_errors(
                                &shared,
                                &format!("pending events exceed {PENDING_WARN_THRESHOLD}"),
                            );
                        }
                    }
                    Some(RawEvent::Error(message)) => {
                        *state.write() = WatcherState::Error;
                        notify_errors(&shared, &message);
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                let matured: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, e)| now.duration_since(e.last_seen) >= debounce)
                    .map(|(p, _)| p.clone())
                    .collect();
                for path in matured {
                    let Some(entry) = pending.remove(&path) else { continue };
                    let event = FileEvent {
                        folder_id: folder.id.clone(),
                        path,
                        kind: entry.kind,
                        coalesced: entry.count,
                    };
                    deliver(&shared, &event);
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
                pending_gauge.store(pending.len(), Ordering::Relaxed);
                if pending.len() <= PENDING_WARN_THRESHOLD {
                    warned = false;
                }
            }
        }
    }
}

/// Handlers run sequentially; one panicking never stops the others.
fn deliver(shared: &Shared, event: &FileEvent) {
    let handlers = shared.handlers.read().clone();
    for handler in handlers {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
        if result.is_err() {
            warn!("file event handler panicked for {}", event.path.display());
        }
    }
}

fn notify_errors(shared: &Shared, message: &str) {
    let handlers = shared.error_handlers.read().clone();
    for handler in handlers {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(message)));
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::Watcher(format!("invalid pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().map_err(|e| {
        IndexError::Watcher(format!("pattern set failed: {e}"))
    })?))
}

/// Include/exclude match on the basename and the folder-relative path;
/// symlinked paths are rejected.
fn accept_path(
    folder: &WatchedFolder,
    include: Option<&GlobSet>,
    exclude: Option<&GlobSet>,
    path: &Path,
) -> bool {
    if path
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        return false;
    }

    let relative = path
        .strip_prefix(&folder.path)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(exclude) = exclude {
        if exclude.is_match(&relative) || exclude.is_match(&basename) {
            return false;
        }
    }
    if let Some(include) = include {
        return include.is_match(&relative) || include.is_match(&basename);
    }
    true
}

fn map_kind(kind: &notify::EventKind) -> Option<FileEventKind> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Created),
        EventKind::Modify(_) => Some(FileEventKind::Modified),
        EventKind::Remove(_) => Some(FileEventKind::Removed),
        _ => None,
    }
}

/// Coalescing rule: creation survives modification, removal wins over
/// everything.
fn merge_kind(existing: FileEventKind, incoming: FileEventKind) -> FileEventKind {
    match (existing, incoming) {
        (_, FileEventKind::Removed) => FileEventKind::Removed,
        (FileEventKind::Created, _) => FileEventKind::Created,
        (FileEventKind::Removed, FileEventKind::Created) => FileEventKind::Modified,
        (existing, _) => existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn folder(dir: &Path) -> WatchedFolder {
        WatchedFolder {
            id: "f1".into(),
            path: dir.to_path_buf(),
            include_patterns: vec![],
            exclude_patterns: vec![],
            debounce_ms: Some(50),
        }
    }

    #[test]
    fn merge_kind_rules() {
        assert_eq!(
            merge_kind(FileEventKind::Created, FileEventKind::Modified),
            FileEventKind::Created
        );
        assert_eq!(
            merge_kind(FileEventKind::Modified, FileEventKind::Removed),
            FileEventKind::Removed
        );
        assert_eq!(
            merge_kind(FileEventKind::Removed, FileEventKind::Created),
            FileEventKind::Modified
        );
    }

    #[test]
    fn accept_path_respects_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "x").unwrap();
        std::fs::write(dir.path().join("a.log"), "x").unwrap();
        let mut f = folder(dir.path());
        f.include_patterns = vec!["*.rs".into()];
        f.exclude_patterns = vec!["*.log".into()];
        let include = build_globset(&f.include_patterns).unwrap();
        let exclude = build_globset(&f.exclude_patterns).unwrap();

        assert!(accept_path(
            &f,
            include.as_ref(),
            exclude.as_ref(),
            &dir.path().join("a.rs")
        ));
        assert!(!accept_path(
            &f,
            include.as_ref(),
            exclude.as_ref(),
            &dir.path().join("a.log")
        ));
        assert!(!accept_path(
            &f,
            include.as_ref(),
            exclude.as_ref(),
            &dir.path().join("b.txt")
        ));
    }

    #[test]
    fn invalid_pattern_is_watcher_error() {
        assert!(build_globset(&["ok*".into()]).is_ok());
        assert!(build_globset(&["bad{".into()]).is_err());
    }

    #[test]
    fn watcher_cap_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _enter = rt.enter();
        let watcher = FolderWatcher::with_max_watchers(1);
        watcher.start_watching(folder(dir.path())).unwrap();
        let mut second = folder(dir.path());
        second.id = "f2".into();
        assert!(matches!(
            watcher.start_watching(second),
            Err(IndexError::Watcher(_))
        ));
        watcher.shutdown();
    }

    #[tokio::test]
    async fn delivers_coalesced_events() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FolderWatcher::new();
        let seen: Arc<Mutex<Vec<FileEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        watcher.on_file_event(Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
        watcher.start_watching(folder(dir.path())).unwrap();

        // Two rapid writes to the same path coalesce into one event.
        let target = dir.path().join("x.rs");
        std::fs::write(&target, "one").unwrap();
        std::fs::write(&target, "two").unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        let events = seen.lock().unwrap();
        let for_target: Vec<&FileEvent> =
            events.iter().filter(|e| e.path == target).collect();
        assert!(!for_target.is_empty(), "no events delivered");
        assert_eq!(for_target.len(), 1, "events were not coalesced");
        watcher.shutdown();
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FolderWatcher::new();
        let seen: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        watcher.on_file_event(Arc::new(|_| panic!("bad handler")));
        let sink = Arc::clone(&seen);
        watcher.on_file_event(Arc::new(move |_| {
            *sink.lock().unwrap() += 1;
        }));
        watcher.start_watching(folder(dir.path())).unwrap();

        std::fs::write(dir.path().join("y.rs"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(*seen.lock().unwrap() >= 1);
        watcher.shutdown();
    }

    #[tokio::test]
    async fn stop_watching_removes_status() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FolderWatcher::new();
        watcher.start_watching(folder(dir.path())).unwrap();
        assert_eq!(watcher.all_statuses().len(), 1);
        watcher.stop_watching("f1").unwrap();
        assert!(watcher.all_statuses().is_empty());
        assert!(watcher.stop_watching("f1").is_err());
    }
}
