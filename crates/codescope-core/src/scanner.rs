//! Working-tree file scanner.
//!
//! Walks a repository working tree honoring gitignore rules, an extension
//! allowlist, exclude globs and a size cap. Symlinks are never followed.
//! Returned paths are repository-relative with POSIX separators.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::parser::Language;

/// Progress callback: `(scanned, total_estimated)`.
pub type ScanProgress<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

/// How often progress callbacks fire, in files.
const PROGRESS_EVERY: usize = 100;

/// Scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Allowed file extensions (without dot). Empty means "all".
    pub include_extensions: Vec<String>,
    /// Glob patterns matched against both the relative path and the basename.
    pub exclude_patterns: Vec<String>,
    /// Files larger than this are skipped.
    pub max_file_size_bytes: u64,
    /// Honor `.gitignore` and related files in the tree.
    pub respect_gitignore: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_extensions: Language::all_extensions()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: vec![
                "node_modules".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                ".git".into(),
                "*.min.js".into(),
            ],
            max_file_size_bytes: 1024 * 1024,
            respect_gitignore: true,
        }
    }
}

/// A file accepted by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Repository-relative path with `/` separators.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Lowercased extension without dot, empty if none.
    pub extension: String,
    pub size_bytes: u64,
    pub modified_at: Option<SystemTime>,
}

/// Gitignore-aware working tree scanner.
pub struct Scanner {
    config: ScanConfig,
    exclude_set: GlobSet,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_patterns {
            let glob = Glob::new(pattern).map_err(|e| CoreError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let exclude_set = builder.build().map_err(|e| CoreError::InvalidPattern {
            pattern: config.exclude_patterns.join(","),
            message: e.to_string(),
        })?;
        Ok(Self {
            config,
            exclude_set,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ScanConfig::default())
    }

    /// Scan `root`, returning accepted files sorted by relative path.
    pub fn scan(&self, root: &Path, progress: Option<&ScanProgress<'_>>) -> Result<Vec<ScannedFile>> {
        if !root.is_dir() {
            return Err(CoreError::InvalidScanRoot(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        // Cheap pre-pass so progress callbacks can report a total estimate.
        let total_estimated = self.walker(&root).build().filter(|e| e.is_ok()).count();

        let mut files = Vec::new();
        let mut scanned = 0usize;

        for entry in self.walker(&root).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            scanned += 1;
            if scanned % PROGRESS_EVERY == 0 {
                if let Some(cb) = progress {
                    cb(scanned, total_estimated);
                }
            }

            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() || file_type.is_symlink() {
                continue;
            }

            let path = entry.path();
            // Containment: a path escaping the root (via symlinked parents) is
            // excluded.
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            let relative_path = to_posix(relative);

            if self.is_excluded(&relative_path) {
                continue;
            }

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();
            if !self.config.include_extensions.is_empty()
                && !self.config.include_extensions.iter().any(|e| *e == extension)
            {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!("skipping {relative_path}: metadata failed: {e}");
                    continue;
                }
            };
            if metadata.len() > self.config.max_file_size_bytes {
                debug!(
                    "skipping {relative_path}: {} bytes over limit {}",
                    metadata.len(),
                    self.config.max_file_size_bytes
                );
                continue;
            }

            files.push(ScannedFile {
                relative_path,
                absolute_path: path.to_path_buf(),
                extension,
                size_bytes: metadata.len(),
                modified_at: metadata.modified().ok(),
            });
        }

        if let Some(cb) = progress {
            cb(scanned, total_estimated);
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    fn walker(&self, root: &Path) -> WalkBuilder {
        let mut builder = WalkBuilder::new(root);
        builder
            .follow_links(false)
            .hidden(false)
            .git_ignore(self.config.respect_gitignore)
            .git_global(false)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .filter_entry(|e| e.file_name().to_str() != Some(".git"));
        builder
    }

    /// Exclude globs match on the full relative path and on the basename.
    fn is_excluded(&self, relative_path: &str) -> bool {
        if self.exclude_set.is_match(relative_path) {
            return true;
        }
        let basename = relative_path.rsplit('/').next().unwrap_or(relative_path);
        if self.exclude_set.is_match(basename) {
            return true;
        }
        // A pattern naming a directory excludes everything beneath it.
        relative_path
            .split('/')
            .any(|segment| self.exclude_set.is_match(segment))
    }
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn returns_posix_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "src/lib/util.rs", "pub fn u() {}");

        let scanner = Scanner::with_defaults().unwrap();
        let files = scanner.scan(dir.path(), None).unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib/util.rs", "src/main.rs"]);
        for p in paths {
            assert!(!p.contains('\\'));
        }
    }

    #[test]
    fn honors_extension_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", "fn a() {}");
        write(dir.path(), "b.png", "xx");

        let scanner = Scanner::with_defaults().unwrap();
        let files = scanner.scan(dir.path(), None).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "a.rs");
    }

    #[test]
    fn honors_exclude_patterns_on_basename_and_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "node_modules/pkg/index.js", "x()");
        write(dir.path(), "src/app.min.js", "x()");
        write(dir.path(), "src/app.js", "x()");

        let scanner = Scanner::with_defaults().unwrap();
        let files = scanner.scan(dir.path(), None).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.js"]);
    }

    #[test]
    fn honors_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "generated/\n");
        write(dir.path(), "generated/out.ts", "x");
        write(dir.path(), "src/in.ts", "x");

        let scanner = Scanner::with_defaults().unwrap();
        let files = scanner.scan(dir.path(), None).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/in.ts"]);
    }

    #[test]
    fn size_cap_boundary() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "at.rs", "12345678");
        write(dir.path(), "over.rs", "123456789");

        let mut config = ScanConfig::default();
        config.max_file_size_bytes = 8;
        let scanner = Scanner::new(config).unwrap();
        let files = scanner.scan(dir.path(), None).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["at.rs"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write(outside.path(), "secret.rs", "fn s() {}");
        write(dir.path(), "ok.rs", "fn ok() {}");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.rs"),
            dir.path().join("direct.rs"),
        )
        .unwrap();

        let scanner = Scanner::with_defaults().unwrap();
        let files = scanner.scan(dir.path(), None).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["ok.rs"]);
    }

    #[test]
    fn progress_reports_final_count() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", "x");
        let seen = std::sync::Mutex::new(Vec::new());
        let scanner = Scanner::with_defaults().unwrap();
        let cb = |scanned: usize, total: usize| {
            seen.lock().unwrap().push((scanned, total));
        };
        scanner.scan(dir.path(), Some(&cb)).unwrap();
        assert!(!seen.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let mut config = ScanConfig::default();
        config.exclude_patterns.push("a{".into());
        assert!(matches!(
            Scanner::new(config),
            Err(CoreError::InvalidPattern { .. })
        ));
    }
}
