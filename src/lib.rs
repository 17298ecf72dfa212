pub mod config;
pub mod devserver;
pub mod install;
pub mod process;
pub mod server;
pub mod workspace;

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use config::ServerConfig;
use install::DependencyInstaller;
use workspace::provision::WorkspaceProvisioner;
use workspace::{EnvironmentRegistry, GitProvisioner};

/// Shared application state passed to every request handler.
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<EnvironmentRegistry>,
}

impl AppContext {
    /// Wire the registry to a git-backed provisioner for the configured
    /// repository. Fails fast when the repository root is not inside a
    /// git work tree.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let repo_path = config.repo_path.canonicalize().with_context(|| {
            format!(
                "repository path {} does not exist",
                config.repo_path.display()
            )
        })?;

        if !workspace::inspect::is_inside_work_tree(&repo_path).await {
            bail!(
                "{} is not inside a git work tree; point --repo at a repository",
                repo_path.display()
            );
        }

        let installer = DependencyInstaller::new(config.install_command.clone());
        let provisioner: Arc<dyn WorkspaceProvisioner> = Arc::new(GitProvisioner::new(
            repo_path.clone(),
            config.base_branch.clone(),
            installer,
        ));

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(EnvironmentRegistry::new(repo_path, provisioner)),
        })
    }

    /// Assemble a context from parts. Used by tests that substitute the
    /// provisioner seam.
    pub fn with_registry(config: ServerConfig, registry: Arc<EnvironmentRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }
}
