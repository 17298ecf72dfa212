use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use branchd::config::ServerConfig;
use branchd::{server, AppContext};

#[derive(Parser)]
#[command(
    name = "branchd",
    about = "Branch workspace server — one isolated git worktree per URL path",
    version
)]
struct Args {
    /// HTTP listening port
    #[arg(long, env = "BRANCHD_PORT")]
    port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "BRANCHD_BIND")]
    bind_address: Option<String>,

    /// Primary repository root (default: current directory)
    #[arg(long, env = "BRANCHD_REPO")]
    repo: Option<PathBuf>,

    /// Base branch new workspace branches are created from
    #[arg(long, env = "BRANCHD_BASE_BRANCH")]
    base_branch: Option<String>,

    /// TOML config file
    #[arg(long, env = "BRANCHD_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "BRANCHD_LOG", default_value = "info")]
    log: String,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "BRANCHD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log format: "pretty" or "json"
    #[arg(long, env = "BRANCHD_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(&args.log, args.log_file.as_deref(), &args.log_format);

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind_address {
        config.bind_address = bind;
    }
    if let Some(repo) = args.repo {
        config.repo_path = repo;
    }
    if let Some(base) = args.base_branch {
        config.base_branch = base;
    }

    let bind = format!("{}:{}", config.bind_address, config.port);
    let ctx = Arc::new(AppContext::new(config).await?);

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        repo = %ctx.registry.repo_path().display(),
        base_branch = %ctx.config.base_branch,
        "branch workspace server listening on http://{addr}"
    );

    axum::serve(listener, server::build_router(ctx))
        .await
        .context("server error")?;
    Ok(())
}

/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// If the log directory cannot be created, falls back to stdout-only
/// logging with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("branchd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
