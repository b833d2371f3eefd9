//! autopilotd — the operations automation daemon.
//!
//! Single binary that runs every automation engine:
//! - State store (redb)
//! - AutoScaler loop
//! - Health monitors + AutoHealer loop
//! - Host resource sweep
//! - Deployment orchestrator and chaos runner (on demand, via the API)
//! - Operator REST API
//!
//! # Usage
//!
//! ```text
//! autopilotd --config autopilot.toml run --port 8480 --state-dir /var/lib/autopilot
//! autopilotd --config autopilot.toml plan
//! autopilotd --config autopilot.toml apply --dry-run
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use autopilot_core::AutopilotConfig;
use autopilot_reconcile::InfrastructureReconciler;
use autopilot_state::StateStore;
use autopilotd::{Autopilot, Collaborators};

const DEFAULT_LOG_FILTER: &str = "info,autopilotd=debug,autopilot=debug";

#[derive(Parser)]
#[command(name = "autopilotd", about = "Operations automation daemon")]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = "autopilot.toml")]
    config: PathBuf,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every automation loop and serve the operator API.
    Run {
        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Directory for the state database.
        #[arg(long, default_value = "/var/lib/autopilot")]
        state_dir: PathBuf,

        /// Use the simulated platform regardless of configuration.
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration and print it with defaults filled in.
    Check,

    /// Print the infrastructure changes the configuration calls for.
    Plan {
        #[arg(long)]
        dry_run: bool,
    },

    /// Plan and apply infrastructure changes.
    Apply {
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<AutopilotConfig> {
    let config = AutopilotConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(path = %path.display(), services = config.services.len(), "configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            port,
            state_dir,
            dry_run,
        } => run(&cli.config, port, state_dir, dry_run).await,
        Command::Check => {
            let config = load_config(&cli.config)?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Plan { dry_run } => plan(&cli.config, dry_run, false).await,
        Command::Apply { dry_run } => plan(&cli.config, dry_run, true).await,
    }
}

async fn run(config_path: &Path, port: u16, state_dir: PathBuf, dry_run: bool) -> anyhow::Result<()> {
    info!("autopilot daemon starting");
    let config = load_config(config_path)?;

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating {}", state_dir.display()))?;
    let db_path = state_dir.join("autopilot.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let collab = Collaborators::from_config(&config.platform, config.health.timeout, dry_run);
    let autopilot = Autopilot::assemble(config, store, collab);

    // ── Background tasks ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = autopilot.start(shutdown_rx).await;

    // ── API server ─────────────────────────────────────────────
    let router = autopilot.router();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c; running until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    autopilot.stop().await;
    for handle in handles {
        let _ = handle.await;
    }

    info!("autopilot daemon stopped");
    Ok(())
}

async fn plan(config_path: &Path, dry_run: bool, apply: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let desired = config
        .infrastructure
        .clone()
        .context("no [infrastructure] section in the configuration")?;

    let collab = Collaborators::from_config(&config.platform, config.health.timeout, dry_run);
    let reconciler = InfrastructureReconciler::new(collab.resources);

    if !apply {
        let changes = reconciler.plan(&desired).await?;
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }

    let report = reconciler.reconcile(&desired).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.aborted {
        anyhow::bail!("apply aborted after a critical change failed");
    }
    Ok(())
}
