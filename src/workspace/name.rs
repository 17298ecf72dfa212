//! Workspace identity: name validation and branch/path derivation.
//!
//! Workspace names flow into filesystem paths and git command arguments,
//! so validation is a security boundary: only ASCII letters, digits, `-`
//! and `_` are accepted. Within that set, branch name and checkout path
//! are deterministic, injective functions of the name.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// The workspace served directly from the primary repository checkout.
pub const MAIN_WORKSPACE: &str = "main";

const BRANCH_SUFFIX: &str = "-branch";
const WORKTREES_SUFFIX: &str = "-worktrees";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid workspace name `{name}`: only ASCII letters, digits, `-` and `_` are allowed")]
pub struct InvalidWorkspaceName {
    pub name: String,
}

/// A validated workspace name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// Validate `raw` against the allowed character set.
    ///
    /// Rejects empty strings and anything containing path separators,
    /// traversal segments, or shell metacharacters.
    pub fn parse(raw: &str) -> Result<Self, InvalidWorkspaceName> {
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidWorkspaceName {
                name: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_main(&self) -> bool {
        self.0 == MAIN_WORKSPACE
    }

    /// The dedicated branch for this workspace: `<name>-branch`.
    pub fn branch_name(&self) -> String {
        format!("{}{}", self.0, BRANCH_SUFFIX)
    }

    /// The URL prefix every request for this workspace is served under.
    pub fn base_path(&self) -> String {
        format!("/{}/", self.0)
    }
}

impl std::fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The container directory for all workspace checkouts: a sibling of the
/// primary repository named `<repo-dir>-worktrees`.
pub fn worktrees_root(repo_path: &Path) -> PathBuf {
    let dir_name = repo_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    let parent = repo_path.parent().unwrap_or(repo_path);
    parent.join(format!("{dir_name}{WORKTREES_SUFFIX}"))
}

/// Branch name and on-disk checkout path derived from a validated name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceIdentity {
    pub branch: String,
    pub checkout_path: PathBuf,
}

/// Pure, total for any validated name.
pub fn derive_identity(name: &WorkspaceName, repo_path: &Path) -> WorkspaceIdentity {
    WorkspaceIdentity {
        branch: name.branch_name(),
        checkout_path: worktrees_root(repo_path).join(name.as_str()),
    }
}
