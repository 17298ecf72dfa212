//! Workspace provisioner: ensure an isolated checkout exists for a name.
//!
//! Per attempt this is a straight-line state machine with terminal
//! outcomes only. Every conflict is detected and classified before any
//! mutating git operation; creation is never attempted speculatively and
//! rolled back. All path equality goes through canonical absolute form.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::install::DependencyInstaller;
use crate::process::{best_error_line, run_capture};
use crate::workspace::inspect::{self, canonical, CheckoutSnapshot};
use crate::workspace::name::{derive_identity, worktrees_root, InvalidWorkspaceName, WorkspaceName};

// ── Outcome taxonomy ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    InvalidName(#[from] InvalidWorkspaceName),

    #[error("branch `{branch}` is already checked out at {}", other_path.display())]
    BranchCheckedOutElsewhere { branch: String, other_path: PathBuf },

    #[error("checkout path {} is bound to {}", path.display(), occupant.as_deref().map(|b| format!("branch `{b}`")).unwrap_or_else(|| "a detached checkout".to_string()))]
    PathOccupiedByOtherBranch {
        path: PathBuf,
        occupant: Option<String>,
    },

    #[error("target directory {} already exists and is not empty", path.display())]
    NonEmptyDirectory { path: PathBuf },

    #[error("base branch `{0}` does not resolve to a commit")]
    InvalidBaseBranch(String),

    #[error("checkout creation failed: {detail}")]
    CreationFailed { detail: String },

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ProvisionError {
    /// Stable machine-readable discriminant for error responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid_workspace_name",
            Self::BranchCheckedOutElsewhere { .. } => "branch_checked_out_elsewhere",
            Self::PathOccupiedByOtherBranch { .. } => "path_occupied_by_other_branch",
            Self::NonEmptyDirectory { .. } => "non_empty_directory",
            Self::InvalidBaseBranch(_) => "invalid_base_branch",
            Self::CreationFailed { .. } => "creation_failed",
            Self::Internal(_) => "internal_error",
        }
    }
}

// ── Seam consumed by the registry ────────────────────────────────────────────

/// The provisioning contract the environment registry multiplexes over.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    /// Ensure an isolated checkout exists for `name`; return its root.
    async fn provision(&self, name: &WorkspaceName) -> Result<PathBuf, ProvisionError>;

    /// Best-effort dependency install for the primary repository checkout
    /// (the `main` workspace, which is never provisioned).
    async fn prepare_primary(&self);
}

// ── Conflict preflight (pure) ────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Preflight {
    /// Branch already bound to exactly the target path.
    AlreadyProvisioned(PathBuf),
    /// Neither the branch nor the path is claimed by any checkout.
    Vacant,
}

/// Steps 1–2 of the state machine, evaluated against a single snapshot so
/// the two checks cannot drift apart within one attempt. `target` must
/// already be canonical.
pub(crate) fn preflight(
    snapshot: &CheckoutSnapshot,
    branch: &str,
    target: &Path,
) -> Result<Preflight, ProvisionError> {
    if let Some(existing) = snapshot.checkout_for_branch(branch) {
        if existing == target {
            return Ok(Preflight::AlreadyProvisioned(existing.to_path_buf()));
        }
        return Err(ProvisionError::BranchCheckedOutElsewhere {
            branch: branch.to_string(),
            other_path: existing.to_path_buf(),
        });
    }

    if let Some(record) = snapshot.record_at(target) {
        if record.branch.as_deref() != Some(branch) {
            return Err(ProvisionError::PathOccupiedByOtherBranch {
                path: target.to_path_buf(),
                occupant: record.branch.clone(),
            });
        }
    }

    Ok(Preflight::Vacant)
}

// ── Git-backed provisioner ───────────────────────────────────────────────────

pub struct GitProvisioner {
    repo_path: PathBuf,
    base_branch: String,
    installer: DependencyInstaller,
}

impl GitProvisioner {
    pub fn new(repo_path: PathBuf, base_branch: String, installer: DependencyInstaller) -> Self {
        Self {
            repo_path: canonical(&repo_path),
            base_branch,
            installer,
        }
    }

    async fn directory_is_occupied(&self, target: &Path) -> Result<bool, ProvisionError> {
        let mut entries = match tokio::fs::read_dir(target).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) if err.kind() == ErrorKind::NotADirectory => return Ok(true),
            Err(err) => {
                return Err(ProvisionError::Internal(
                    anyhow::Error::new(err)
                        .context(format!("failed to inspect {}", target.display())),
                ))
            }
        };
        let first = entries.next_entry().await.map_err(|err| {
            ProvisionError::Internal(
                anyhow::Error::new(err).context(format!("failed to read {}", target.display())),
            )
        })?;
        Ok(first.is_some())
    }

    async fn create_checkout(
        &self,
        branch: &str,
        target: &Path,
        branch_already_exists: bool,
    ) -> Result<(), ProvisionError> {
        tokio::fs::create_dir_all(worktrees_root(&self.repo_path))
            .await
            .context("failed to create worktrees container directory")
            .map_err(ProvisionError::Internal)?;

        let target_str = target.to_string_lossy();
        let output = if branch_already_exists {
            // Attach a checkout to the existing, confirmed-unattached branch.
            run_capture(
                "git",
                &["worktree", "add", &target_str, branch],
                Some(&self.repo_path),
            )
            .await
        } else {
            // Create checkout and branch together, branching from base.
            run_capture(
                "git",
                &["worktree", "add", "-b", branch, &target_str, &self.base_branch],
                Some(&self.repo_path),
            )
            .await
        }
        .map_err(ProvisionError::Internal)?;

        if !output.success() {
            return Err(ProvisionError::CreationFailed {
                detail: best_error_line(&output.stderr),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceProvisioner for GitProvisioner {
    async fn provision(&self, name: &WorkspaceName) -> Result<PathBuf, ProvisionError> {
        let identity = derive_identity(name, &self.repo_path);
        let target = canonical(&identity.checkout_path);

        let snapshot = CheckoutSnapshot::collect(&self.repo_path)
            .await
            .map_err(ProvisionError::Internal)?;

        match preflight(&snapshot, &identity.branch, &target)? {
            Preflight::AlreadyProvisioned(path) => {
                debug!(workspace = %name, path = %path.display(), "checkout already provisioned");
                return Ok(path);
            }
            Preflight::Vacant => {}
        }

        if self.directory_is_occupied(&target).await? {
            return Err(ProvisionError::NonEmptyDirectory { path: target });
        }

        if !inspect::ref_is_commit(&self.repo_path, &self.base_branch).await {
            return Err(ProvisionError::InvalidBaseBranch(self.base_branch.clone()));
        }

        let branch_already_exists = inspect::branch_exists(&self.repo_path, &identity.branch).await;
        self.create_checkout(&identity.branch, &target, branch_already_exists)
            .await?;

        info!(
            workspace = %name,
            branch = %identity.branch,
            path = %target.display(),
            attached_existing_branch = branch_already_exists,
            "workspace checkout created"
        );

        // Checkout creation is the contract; dependency readiness is
        // advisory and must never fail the outcome.
        self.installer.install(&target).await;

        Ok(target)
    }

    async fn prepare_primary(&self) {
        self.installer.install(&self.repo_path).await;
    }
}
