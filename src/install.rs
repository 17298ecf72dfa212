//! Best-effort dependency installation for freshly provisioned checkouts.

use std::path::Path;

use tracing::{debug, warn};

use crate::process::{best_error_line, run_capture};

/// Runs the configured install command (default `npm install`) inside a
/// workspace root. Failure is logged as a warning and otherwise swallowed:
/// the checkout is usable either way, and callers must never see an
/// install failure as a provisioning failure.
#[derive(Debug, Clone)]
pub struct DependencyInstaller {
    command: Vec<String>,
}

impl DependencyInstaller {
    /// An empty `command` disables installation entirely.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn disabled() -> Self {
        Self { command: Vec::new() }
    }

    pub async fn install(&self, dir: &Path) {
        let Some((program, args)) = self.command.split_first() else {
            return;
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        debug!(dir = %dir.display(), command = %self.command.join(" "), "installing dependencies");
        match run_capture(program, &args, Some(dir)).await {
            Ok(output) if output.success() => {
                debug!(dir = %dir.display(), "dependency install finished");
            }
            Ok(output) => {
                warn!(
                    dir = %dir.display(),
                    detail = %best_error_line(&output.stderr),
                    "dependency install failed; the workspace is still usable"
                );
            }
            Err(err) => {
                warn!(
                    dir = %dir.display(),
                    error = %err,
                    "could not run dependency install; the workspace is still usable"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_installer_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        DependencyInstaller::disabled().install(tmp.path()).await;
    }

    #[tokio::test]
    async fn failing_command_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let installer =
            DependencyInstaller::new(vec!["git".to_string(), "definitely-not-a-verb".to_string()]);
        // Must not panic or propagate anything.
        installer.install(tmp.path()).await;
    }
}
