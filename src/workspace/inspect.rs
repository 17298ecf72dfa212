//! Checkout inspector: read-only queries against live git state.
//!
//! Answers "where, if anywhere, does this branch or path currently live?"
//! by parsing `git worktree list --porcelain` output and probing the
//! primary working copy. Results are advisory snapshots — the state can
//! change between a query and any later mutation, so callers fetch one
//! snapshot per decision and never cache it beyond that.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::process::{best_error_line, run_capture};

/// One entry from the worktree listing. `branch` is `None` for detached
/// or bare entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRecord {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Resolve `path` to canonical absolute form.
///
/// Falls back to canonicalizing the deepest existing ancestor and
/// reattaching the remaining components, so paths that do not exist yet
/// (a checkout about to be created) still compare correctly against
/// canonical paths reported by git.
pub fn canonical(path: &Path) -> PathBuf {
    let mut rest: Vec<OsString> = Vec::new();
    let mut cur = path.to_path_buf();
    loop {
        match cur.canonicalize() {
            Ok(base) => {
                let mut out = base;
                for comp in rest.iter().rev() {
                    out.push(comp);
                }
                return out;
            }
            Err(_) => match (cur.file_name().map(OsString::from), cur.parent()) {
                (Some(name), Some(parent)) if parent != cur => {
                    rest.push(name);
                    cur = parent.to_path_buf();
                }
                _ => {
                    let mut out = cur;
                    for comp in rest.iter().rev() {
                        out.push(comp);
                    }
                    return out;
                }
            },
        }
    }
}

/// Parse the blank-line-delimited, key-prefixed porcelain listing.
///
/// Tolerates detached and bare entries (no `branch` line) and skips
/// anything it does not recognize. An attribute line arriving before any
/// `worktree` line indicates output we do not understand; it is dropped
/// with a warning rather than failing the whole query.
pub fn parse_worktree_list(raw: &str) -> Vec<CheckoutRecord> {
    let mut records = Vec::new();
    let mut current: Option<CheckoutRecord> = None;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(record) = current.take() {
                records.push(record);
            }
            continue;
        }

        if let Some(value) = line.strip_prefix("worktree ") {
            if let Some(record) = current.take() {
                records.push(record);
            }
            current = Some(CheckoutRecord {
                path: PathBuf::from(value.trim()),
                branch: None,
            });
            continue;
        }

        let Some(record) = current.as_mut() else {
            warn!(line, "unrecognized worktree listing line outside any entry; skipping");
            continue;
        };

        if let Some(value) = line.strip_prefix("branch ") {
            let value = value.trim();
            record.branch = Some(
                value
                    .strip_prefix("refs/heads/")
                    .unwrap_or(value)
                    .to_string(),
            );
        }
        // `HEAD`, `detached`, `bare`, `locked`, `prunable` carry no
        // information we need.
    }

    if let Some(record) = current.take() {
        records.push(record);
    }
    records
}

/// List every checkout the repository knows about, primary copy included,
/// with paths resolved to canonical form.
pub async fn list_checkouts(repo_path: &Path) -> Result<Vec<CheckoutRecord>> {
    let output = run_capture("git", &["worktree", "list", "--porcelain"], Some(repo_path))
        .await
        .context("failed to list git worktrees")?;
    if !output.success() {
        bail!(
            "failed to list git worktrees: {}",
            best_error_line(&output.stderr)
        );
    }
    Ok(parse_worktree_list(&output.stdout)
        .into_iter()
        .map(|record| CheckoutRecord {
            path: canonical(&record.path),
            branch: record.branch,
        })
        .collect())
}

/// Current branch of the working copy at `path`, or `None` when the path
/// is not under version control or the copy is detached/unborn (git
/// reports the sentinel `HEAD` in that case).
pub async fn current_branch(path: &Path) -> Option<String> {
    let output = run_capture("git", &["rev-parse", "--abbrev-ref", "HEAD"], Some(path))
        .await
        .ok()?;
    if !output.success() {
        return None;
    }
    let branch = output.stdout.trim();
    if branch.is_empty() || branch == "HEAD" {
        return None;
    }
    Some(branch.to_string())
}

/// Whether `path` lies inside a git working tree.
pub async fn is_inside_work_tree(path: &Path) -> bool {
    run_capture("git", &["rev-parse", "--is-inside-work-tree"], Some(path))
        .await
        .map(|out| out.success() && out.stdout.trim() == "true")
        .unwrap_or(false)
}

/// Whether `branch` exists as a local ref, independent of any checkout.
pub async fn branch_exists(repo_path: &Path, branch: &str) -> bool {
    let refname = format!("refs/heads/{branch}");
    run_capture(
        "git",
        &["show-ref", "--verify", "--quiet", &refname],
        Some(repo_path),
    )
    .await
    .map(|out| out.success())
    .unwrap_or(false)
}

/// Whether `refname` resolves to a commit.
pub async fn ref_is_commit(repo_path: &Path, refname: &str) -> bool {
    let spec = format!("{refname}^{{commit}}");
    run_capture(
        "git",
        &["rev-parse", "--verify", "--quiet", &spec],
        Some(repo_path),
    )
    .await
    .map(|out| out.success())
    .unwrap_or(false)
}

/// A single snapshot of the repository's checkout state, fetched once per
/// provisioning decision and reused across every check in that attempt.
#[derive(Debug, Clone)]
pub struct CheckoutSnapshot {
    pub records: Vec<CheckoutRecord>,
    pub primary_path: PathBuf,
    pub primary_branch: Option<String>,
}

impl CheckoutSnapshot {
    pub async fn collect(repo_path: &Path) -> Result<Self> {
        let records = list_checkouts(repo_path).await?;
        let primary_branch = current_branch(repo_path).await;
        Ok(Self {
            records,
            primary_path: canonical(repo_path),
            primary_branch,
        })
    }

    /// Two-tier lookup: scan the listing for a bound-branch match, then
    /// fall back to the primary working copy. The fallback covers listings
    /// that omit the primary copy; with the porcelain output both tiers
    /// usually agree, and the first match wins.
    pub fn checkout_for_branch(&self, branch: &str) -> Option<&Path> {
        for record in &self.records {
            if record.branch.as_deref() == Some(branch) {
                return Some(&record.path);
            }
        }
        if self.primary_branch.as_deref() == Some(branch) {
            return Some(&self.primary_path);
        }
        None
    }

    /// The record bound to `path`, if any.
    pub fn record_at(&self, path: &Path) -> Option<&CheckoutRecord> {
        self.records.iter().find(|record| record.path == path)
    }
}

/// Where, if anywhere, `branch` is currently checked out.
pub async fn find_checkout_for_branch(branch: &str, repo_path: &Path) -> Result<Option<PathBuf>> {
    let snapshot = CheckoutSnapshot::collect(repo_path).await?;
    Ok(snapshot.checkout_for_branch(branch).map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bound_and_detached_entries() {
        let raw = "worktree /srv/app\n\
                   HEAD 1111111111111111111111111111111111111111\n\
                   branch refs/heads/main\n\
                   \n\
                   worktree /srv/app-worktrees/feature1\n\
                   HEAD 2222222222222222222222222222222222222222\n\
                   branch refs/heads/feature1-branch\n\
                   \n\
                   worktree /srv/detached\n\
                   HEAD 3333333333333333333333333333333333333333\n\
                   detached\n";
        let records = parse_worktree_list(raw);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].branch.as_deref(), Some("main"));
        assert_eq!(
            records[1],
            CheckoutRecord {
                path: PathBuf::from("/srv/app-worktrees/feature1"),
                branch: Some("feature1-branch".to_string()),
            }
        );
        assert_eq!(records[2].branch, None);
    }

    #[test]
    fn parses_entry_without_trailing_blank_line() {
        let raw = "worktree /srv/app\nbranch refs/heads/main";
        let records = parse_worktree_list(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].branch.as_deref(), Some("main"));
    }

    #[test]
    fn tolerates_bare_entries_and_garbage() {
        let raw = "branch refs/heads/orphaned\n\
                   worktree /srv/bare\n\
                   bare\n\
                   \n\
                   nonsense line\n\
                   worktree /srv/app\n\
                   branch refs/heads/main\n";
        let records = parse_worktree_list(raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, PathBuf::from("/srv/bare"));
        assert_eq!(records[0].branch, None);
        assert_eq!(records[1].branch.as_deref(), Some("main"));
    }

    #[test]
    fn empty_input_yields_no_records() {
        assert!(parse_worktree_list("").is_empty());
        assert!(parse_worktree_list("\n\n").is_empty());
    }

    #[test]
    fn canonical_handles_missing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let existing = canonical(tmp.path());
        let missing = tmp.path().join("not").join("yet");
        assert_eq!(canonical(&missing), existing.join("not").join("yet"));
    }

    #[test]
    fn snapshot_lookup_prefers_listing_then_primary() {
        let snapshot = CheckoutSnapshot {
            records: vec![CheckoutRecord {
                path: PathBuf::from("/srv/app-worktrees/feature1"),
                branch: Some("feature1-branch".to_string()),
            }],
            primary_path: PathBuf::from("/srv/app"),
            primary_branch: Some("odd-branch".to_string()),
        };
        assert_eq!(
            snapshot.checkout_for_branch("feature1-branch"),
            Some(Path::new("/srv/app-worktrees/feature1"))
        );
        // Primary copy matching by coincidence of branch naming.
        assert_eq!(
            snapshot.checkout_for_branch("odd-branch"),
            Some(Path::new("/srv/app"))
        );
        assert_eq!(snapshot.checkout_for_branch("absent"), None);
    }
}
