//! Registry behavior against a counting fake provisioner: caching,
//! per-name serialization, the `main` short-circuit, and failure
//! propagation without negative caching.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use branchd::workspace::inspect::canonical;
use branchd::workspace::name::WorkspaceName;
use branchd::workspace::{EnvironmentRegistry, ProvisionError, WorkspaceProvisioner};

struct FakeProvisioner {
    root: PathBuf,
    delay: Duration,
    calls: AtomicUsize,
    primary_calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeProvisioner {
    fn new(root: PathBuf) -> Self {
        std::fs::create_dir_all(&root).unwrap();
        Self {
            root,
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
            primary_calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceProvisioner for FakeProvisioner {
    async fn provision(&self, name: &WorkspaceName) -> Result<PathBuf, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ProvisionError::CreationFailed {
                detail: "simulated failure".to_string(),
            });
        }
        let dir = self.root.join(name.as_str());
        std::fs::create_dir_all(&dir).unwrap();
        Ok(dir)
    }

    async fn prepare_primary(&self) {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn setup(tmp: &TempDir) -> (Arc<EnvironmentRegistry>, Arc<FakeProvisioner>) {
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let fake = Arc::new(FakeProvisioner::new(tmp.path().join("checkouts")));
    let registry = Arc::new(EnvironmentRegistry::new(
        repo,
        Arc::clone(&fake) as Arc<dyn WorkspaceProvisioner>,
    ));
    (registry, fake)
}

fn workspace(name: &str) -> WorkspaceName {
    WorkspaceName::parse(name).unwrap()
}

#[tokio::test]
async fn repeated_resolve_reuses_the_handle() {
    let tmp = TempDir::new().unwrap();
    let (registry, fake) = setup(&tmp);
    let name = workspace("feature1");

    let first = registry.resolve(&name).await.expect("first resolve");
    let second = registry.resolve(&name).await.expect("second resolve");

    assert!(Arc::ptr_eq(&first, &second), "same cached handle expected");
    assert_eq!(fake.calls(), 1, "only one provisioning attempt expected");
    assert_eq!(first.base_path, "/feature1/");
}

#[tokio::test]
async fn concurrent_resolves_coalesce_into_one_attempt() {
    let tmp = TempDir::new().unwrap();
    let (registry, fake) = setup(&tmp);
    let name = workspace("feature1");

    let (a, b) = tokio::join!(registry.resolve(&name), registry.resolve(&name));
    let a = a.expect("first caller");
    let b = b.expect("second caller");

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(fake.calls(), 1, "concurrent callers must share one attempt");
}

#[tokio::test]
async fn different_names_provision_independently() {
    let tmp = TempDir::new().unwrap();
    let (registry, fake) = setup(&tmp);

    let name1 = workspace("feature1");
    let name2 = workspace("feature2");
    let (a, b) = tokio::join!(registry.resolve(&name1), registry.resolve(&name2));
    assert_ne!(a.unwrap().root, b.unwrap().root);
    assert_eq!(fake.calls(), 2);
    assert_eq!(registry.list().await.len(), 2);
}

#[tokio::test]
async fn main_workspace_is_never_provisioned() {
    let tmp = TempDir::new().unwrap();
    let (registry, fake) = setup(&tmp);

    let env = registry.resolve(&workspace("main")).await.expect("main");

    assert_eq!(env.root, canonical(&tmp.path().join("repo")));
    assert_eq!(env.base_path, "/main/");
    assert_eq!(fake.calls(), 0, "main must not trigger checkout creation");
    assert_eq!(
        fake.primary_calls.load(Ordering::SeqCst),
        1,
        "main still gets the best-effort dependency install"
    );
}

#[tokio::test]
async fn failure_is_shared_with_waiters_but_not_cached() {
    let tmp = TempDir::new().unwrap();
    let (registry, fake) = setup(&tmp);
    let name = workspace("feature1");
    fake.fail_next.store(true, Ordering::SeqCst);

    let (a, b) = tokio::join!(registry.resolve(&name), registry.resolve(&name));
    let a = a.expect_err("first caller should see the failure");
    let b = b.expect_err("waiter should see the same failure");
    assert_eq!(a.kind(), "creation_failed");
    assert_eq!(b.kind(), "creation_failed");
    assert_eq!(fake.calls(), 1, "the failed attempt ran once");
    assert!(registry.list().await.is_empty(), "nothing cached on failure");

    // A later request retries from scratch and succeeds.
    let env = registry.resolve(&name).await.expect("retry succeeds");
    assert_eq!(fake.calls(), 2);
    assert_eq!(env.name, "feature1");
}

#[tokio::test]
async fn abandoned_request_does_not_cancel_provisioning() {
    let tmp = TempDir::new().unwrap();
    let (registry, fake) = setup(&tmp);
    let name = workspace("feature1");

    // Simulate an aborted HTTP request: drop the resolve future mid-flight.
    {
        let pending = registry.resolve(&name);
        tokio::pin!(pending);
        tokio::select! {
            _ = &mut pending => panic!("provisioning should still be sleeping"),
            _ = tokio::time::sleep(Duration::from_millis(5)) => {}
        }
    }

    // The spawned attempt keeps running and its result lands in the cache.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let env = registry.resolve(&name).await.expect("cached result");
    assert_eq!(fake.calls(), 1, "no duplicate attempt after abandonment");
    assert!(env.root.ends_with(Path::new("feature1")));
}
