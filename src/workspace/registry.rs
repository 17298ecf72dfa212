//! Process-wide environment registry.
//!
//! Maps workspace name → live environment handle. Entries are installed
//! once and never evicted for the process lifetime; checkouts are assumed
//! stable once created. The registry also owns the only piece of shared
//! mutable state in the system: the handle map plus the in-flight table,
//! both guarded by a single mutex that is never held across an external
//! invocation.
//!
//! Provisioning is serialized per name: the first caller for an
//! unresolved name runs the provisioner on a spawned task; concurrent
//! callers for the same name await the same shared future and observe
//! the same outcome. Different names provision independently. A failed
//! attempt caches nothing, so a later request may retry from scratch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::devserver::DevServer;
use crate::workspace::inspect::canonical;
use crate::workspace::name::{worktrees_root, WorkspaceName};
use crate::workspace::provision::{ProvisionError, WorkspaceProvisioner};

/// The cached serving instance bound to one workspace.
#[derive(Debug)]
pub struct Environment {
    pub name: String,
    pub root: PathBuf,
    pub base_path: String,
    pub created_at: DateTime<Utc>,
    pub server: DevServer,
}

type ResolveResult = Result<Arc<Environment>, Arc<ProvisionError>>;
type InflightFuture = Shared<BoxFuture<'static, ResolveResult>>;

#[derive(Default)]
struct RegistryState {
    handles: HashMap<String, Arc<Environment>>,
    inflight: HashMap<String, InflightFuture>,
}

pub struct EnvironmentRegistry {
    repo_path: PathBuf,
    provisioner: Arc<dyn WorkspaceProvisioner>,
    state: Arc<Mutex<RegistryState>>,
}

impl EnvironmentRegistry {
    pub fn new(repo_path: PathBuf, provisioner: Arc<dyn WorkspaceProvisioner>) -> Self {
        Self {
            repo_path: canonical(&repo_path),
            provisioner,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// The single entry point used by the router.
    ///
    /// Cache hit returns immediately with no external calls. On a miss the
    /// caller either starts provisioning or joins an attempt already in
    /// flight for the same name. The underlying work runs on its own task,
    /// so an aborted request never cancels it for other waiters.
    pub async fn resolve(&self, name: &WorkspaceName) -> ResolveResult {
        let key = name.as_str().to_string();

        let pending = {
            let mut state = self.state.lock().await;
            if let Some(handle) = state.handles.get(&key) {
                return Ok(Arc::clone(handle));
            }
            if let Some(pending) = state.inflight.get(&key) {
                pending.clone()
            } else {
                let pending = self.start_provisioning(name.clone());
                state.inflight.insert(key, pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Environments currently live in this process, ordered by name.
    pub async fn list(&self) -> Vec<Arc<Environment>> {
        let state = self.state.lock().await;
        let mut envs: Vec<Arc<Environment>> = state.handles.values().cloned().collect();
        envs.sort_by(|a, b| a.name.cmp(&b.name));
        envs
    }

    fn start_provisioning(&self, name: WorkspaceName) -> InflightFuture {
        let state = Arc::clone(&self.state);
        let provisioner = Arc::clone(&self.provisioner);
        let repo_path = self.repo_path.clone();

        let task = tokio::spawn(async move {
            let key = name.as_str().to_string();
            let result = build_environment(&provisioner, &repo_path, &name).await;

            let mut state = state.lock().await;
            state.inflight.remove(&key);
            match result {
                Ok(env) => {
                    state.handles.entry(key).or_insert_with(|| Arc::clone(&env));
                    Ok(env)
                }
                Err(err) => {
                    warn!(workspace = %name, kind = err.kind(), error = %err, "provisioning failed");
                    Err(Arc::new(err))
                }
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(Arc::new(ProvisionError::Internal(anyhow::anyhow!(
                    "provisioning task failed: {err}"
                )))),
            }
        }
        .boxed()
        .shared()
    }
}

async fn build_environment(
    provisioner: &Arc<dyn WorkspaceProvisioner>,
    repo_path: &Path,
    name: &WorkspaceName,
) -> Result<Arc<Environment>, ProvisionError> {
    let root = if name.is_main() {
        // The main workspace is served straight from the primary checkout;
        // it still gets the best-effort dependency install.
        provisioner.prepare_primary().await;
        repo_path.to_path_buf()
    } else {
        provisioner.provision(name).await?
    };

    let base_path = name.base_path();
    let allowlist = vec![repo_path.to_path_buf(), worktrees_root(repo_path)];
    let server = DevServer::new(root.clone(), base_path.clone(), allowlist);

    info!(workspace = %name, root = %root.display(), "environment ready");
    Ok(Arc::new(Environment {
        name: name.as_str().to_string(),
        root,
        base_path,
        created_at: Utc::now(),
        server,
    }))
}
