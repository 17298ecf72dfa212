//! Server configuration: built-in defaults, optional TOML file, CLI/env
//! overrides applied in `main`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 4400;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_install_command() -> Vec<String> {
    vec!["npm".to_string(), "install".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listening port.
    pub port: u16,
    /// Bind address (use 0.0.0.0 for LAN access).
    pub bind_address: String,
    /// Primary repository root. Workspace checkouts are created in a
    /// sibling `<dir>-worktrees` directory next to it.
    pub repo_path: PathBuf,
    /// Fixed upstream branch every workspace branch is created from.
    pub base_branch: String,
    /// Dependency install command run (best-effort) in new checkouts.
    /// Empty list disables installation.
    pub install_command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            repo_path: default_repo_path(),
            base_branch: default_base_branch(),
            install_command: default_install_command(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file when given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.install_command, vec!["npm", "install"]);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let config: ServerConfig =
            toml::from_str("port = 8080\nbase_branch = \"develop\"").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_branch, "develop");
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn install_command_can_be_disabled() {
        let config: ServerConfig = toml::from_str("install_command = []").unwrap();
        assert!(config.install_command.is_empty());
    }
}
