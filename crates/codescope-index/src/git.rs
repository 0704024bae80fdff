//! Git CLI wrapper.
//!
//! Clone/fetch/diff are delegated to the `git` binary via `tokio::process`;
//! only the output parsing lives here. All operations are cancellable at the
//! process boundary.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{IndexError, Result};

/// File-level change set between two commits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    /// `(old, new)`; `old` is `None` when git reported a rename without its
    /// source path (treated as a per-file failure downstream).
    pub renamed: Vec<(Option<String>, String)>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.renamed.len()
    }
}

async fn run_git(workdir: Option<&Path>, op: &str, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.args(args);
    debug!("git {op}: git {}", args.join(" "));

    let output = cmd
        .output()
        .await
        .map_err(|e| IndexError::git(op, format!("failed to spawn git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IndexError::git(op, stderr.trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Clone `url` into `dest`, or fetch if the working tree already exists.
pub async fn clone_or_fetch(url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
    if dest.join(".git").is_dir() {
        info!("fetching existing working tree at {}", dest.display());
        fetch(dest).await?;
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!("cloning {url} into {}", dest.display());
    let dest_str = dest.to_string_lossy().into_owned();
    let mut args = vec!["clone", url, dest_str.as_str()];
    if let Some(b) = branch {
        args.extend(["--branch", b]);
    }
    run_git(None, "clone", &args).await?;
    Ok(())
}

pub async fn fetch(workdir: &Path) -> Result<()> {
    run_git(Some(workdir), "fetch", &["fetch", "--prune", "origin"]).await?;
    Ok(())
}

/// Resolve a revision to a full SHA.
pub async fn rev_parse(workdir: &Path, rev: &str) -> Result<String> {
    let out = run_git(Some(workdir), "rev-parse", &["rev-parse", rev]).await?;
    Ok(out.trim().to_string())
}

/// SHA of the remote branch tip (after a fetch).
pub async fn remote_head(workdir: &Path, branch: &str) -> Result<String> {
    rev_parse(workdir, &format!("origin/{branch}")).await
}

/// Hard-reset the working tree to a revision.
pub async fn checkout(workdir: &Path, rev: &str) -> Result<()> {
    run_git(Some(workdir), "checkout", &["reset", "--hard", rev]).await?;
    Ok(())
}

/// Current branch name.
pub async fn current_branch(workdir: &Path) -> Result<String> {
    let out = run_git(
        Some(workdir),
        "branch",
        &["rev-parse", "--abbrev-ref", "HEAD"],
    )
    .await?;
    Ok(out.trim().to_string())
}

/// Subject line of a commit.
pub async fn commit_message(workdir: &Path, sha: &str) -> Result<String> {
    let out = run_git(
        Some(workdir),
        "log",
        &["log", "-1", "--format=%s", sha],
    )
    .await?;
    Ok(out.trim().to_string())
}

/// File delta `base..head` as a [`ChangeSet`].
pub async fn diff_name_status(workdir: &Path, base: &str, head: &str) -> Result<ChangeSet> {
    let range = format!("{base}..{head}");
    let out = run_git(
        Some(workdir),
        "diff",
        &["diff", "--name-status", "-M", &range],
    )
    .await?;
    Ok(parse_name_status(&out))
}

/// Parse `git diff --name-status` output.
pub fn parse_name_status(output: &str) -> ChangeSet {
    let mut set = ChangeSet::default();
    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let Some(status) = parts.next() else {
            continue;
        };
        match status.chars().next() {
            Some('A') => {
                if let Some(path) = parts.next() {
                    set.added.push(path.to_string());
                }
            }
            Some('M') => {
                if let Some(path) = parts.next() {
                    set.modified.push(path.to_string());
                }
            }
            Some('D') => {
                if let Some(path) = parts.next() {
                    set.deleted.push(path.to_string());
                }
            }
            Some('R') => {
                let old = parts.next().map(str::to_string);
                match parts.next() {
                    Some(new) => set.renamed.push((old, new.to_string())),
                    // A rename with a single path has lost its source.
                    None => {
                        if let Some(new) = old {
                            set.renamed.push((None, new));
                        }
                    }
                }
            }
            // Copies behave like adds of the destination.
            Some('C') => {
                let _src = parts.next();
                if let Some(path) = parts.next() {
                    set.added.push(path.to_string());
                }
            }
            _ => {}
        }
    }
    set
}

/// Derive a repository name from its URL (`git@host:u/repo.git` → `repo`).
pub fn repo_name_from_url(url: &str) -> Result<String> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let name = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or("")
        .trim();
    if name.is_empty() {
        return Err(IndexError::InvalidUrl(url.to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_mixed_name_status() {
        let out = "A\tsrc/new.ts\nM\tsrc/changed.ts\nD\tsrc/gone.ts\nR100\tsrc/old.ts\tsrc/moved.ts\n";
        let set = parse_name_status(out);
        assert_eq!(set.added, vec!["src/new.ts"]);
        assert_eq!(set.modified, vec!["src/changed.ts"]);
        assert_eq!(set.deleted, vec!["src/gone.ts"]);
        assert_eq!(
            set.renamed,
            vec![(Some("src/old.ts".to_string()), "src/moved.ts".to_string())]
        );
        assert_eq!(set.total_changes(), 4);
    }

    #[test]
    fn rename_without_old_path_is_preserved_as_none() {
        let set = parse_name_status("R\tsrc/only-new.ts\n");
        assert_eq!(set.renamed, vec![(None, "src/only-new.ts".to_string())]);
    }

    #[test]
    fn empty_diff_is_empty_changeset() {
        let set = parse_name_status("");
        assert!(set.is_empty());
    }

    #[test]
    fn copies_count_as_adds() {
        let set = parse_name_status("C75\tsrc/a.ts\tsrc/b.ts\n");
        assert_eq!(set.added, vec!["src/b.ts"]);
    }

    #[test]
    fn repo_names_from_urls() {
        assert_eq!(
            repo_name_from_url("https://github.com/acme/widget.git").unwrap(),
            "widget"
        );
        assert_eq!(
            repo_name_from_url("git@github.com:acme/widget.git").unwrap(),
            "widget"
        );
        assert_eq!(repo_name_from_url("https://host/team/repo/").unwrap(), "repo");
        assert!(repo_name_from_url("").is_err());
    }

    #[tokio::test]
    async fn rev_parse_round_trip_in_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();
        run_git(Some(path), "init", &["init", "-q"]).await.unwrap();
        run_git(Some(path), "config", &["config", "user.email", "t@t"])
            .await
            .unwrap();
        run_git(Some(path), "config", &["config", "user.name", "t"])
            .await
            .unwrap();
        std::fs::write(path.join("a.txt"), "one").unwrap();
        run_git(Some(path), "add", &["add", "."]).await.unwrap();
        run_git(Some(path), "commit", &["commit", "-q", "-m", "first"])
            .await
            .unwrap();

        let head = rev_parse(path, "HEAD").await.unwrap();
        assert_eq!(head.len(), 40);
        assert_eq!(commit_message(path, &head).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn diff_between_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();
        run_git(Some(path), "init", &["init", "-q"]).await.unwrap();
        run_git(Some(path), "config", &["config", "user.email", "t@t"])
            .await
            .unwrap();
        run_git(Some(path), "config", &["config", "user.name", "t"])
            .await
            .unwrap();
        std::fs::write(path.join("keep.txt"), "keep").unwrap();
        std::fs::write(path.join("gone.txt"), "gone").unwrap();
        run_git(Some(path), "add", &["add", "."]).await.unwrap();
        run_git(Some(path), "commit", &["commit", "-q", "-m", "base"])
            .await
            .unwrap();
        let base = rev_parse(path, "HEAD").await.unwrap();

        std::fs::write(path.join("keep.txt"), "changed").unwrap();
        std::fs::write(path.join("new.txt"), "new").unwrap();
        std::fs::remove_file(path.join("gone.txt")).unwrap();
        run_git(Some(path), "add", &["add", "-A"]).await.unwrap();
        run_git(Some(path), "commit", &["commit", "-q", "-m", "head"])
            .await
            .unwrap();
        let head = rev_parse(path, "HEAD").await.unwrap();

        let set = diff_name_status(path, &base, &head).await.unwrap();
        assert_eq!(set.added, vec!["new.txt"]);
        assert_eq!(set.modified, vec!["keep.txt"]);
        assert_eq!(set.deleted, vec!["gone.txt"]);
    }
}
