//! Fleet agent CLI.
//!
//! Control-plane subcommands (`bundle`, `transfer`, `nodes`, `reconcile`,
//! `remove-node`) run where the fleet is managed; `place` runs on the
//! target host itself, invoked by the bootstrap watcher once the transfer
//! marker appears. Any fatal stage exits non-zero with a message naming
//! the stage and cause.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use deployment::bundle::{self, BundleSpec};
use deployment::config::OrchestratorConfig;
use deployment::executor::SshTarget;
use deployment::paths;
use deployment::placement::{PlacementConfig, PlacementEngine};
use deployment::reconcile::NodeReconciler;
use deployment::registry::HttpRegistryClient;
use deployment::transfer::{LogObserver, TransferClient};

#[derive(Parser)]
#[command(
    name = "fleet-agent",
    about = "Deployment bundle pipeline and node reconciliation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the deployment bundle from a base directory's scripts/, config/, and files/.
    Bundle {
        /// Directory containing the scripts/, config/, and files/ sources.
        #[arg(long, default_value = ".")]
        base: PathBuf,
        /// Where to write the bundle.
        #[arg(long, default_value = paths::LOCAL_STAGING_PATH)]
        output: PathBuf,
    },
    /// Copy a built bundle to a target host and create the completion marker.
    Transfer {
        /// Target hostname or address.
        #[arg(long)]
        host: String,
        /// SSH username on the target.
        #[arg(long)]
        user: String,
        /// Private key for key-based authentication.
        #[arg(long)]
        identity: PathBuf,
        /// Bundle to push.
        #[arg(long, default_value = paths::LOCAL_STAGING_PATH)]
        archive: PathBuf,
    },
    /// Extract the transferred archive and place its files (runs on the target host).
    Place {
        /// Archive to place.
        #[arg(long, default_value = paths::REMOTE_ARCHIVE_PATH)]
        archive: PathBuf,
        /// Placement activity log.
        #[arg(long, default_value = paths::PLACEMENT_LOG_PATH)]
        log_file: PathBuf,
    },
    /// List the orchestrator's node registry.
    Nodes,
    /// Delete all disconnected compute nodes from the registry.
    Reconcile,
    /// Delete the registry node belonging to one instance.
    RemoveNode {
        /// Instance identifier; matched as a substring of node ids.
        #[arg(long)]
        instance: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Placement logs to the fixed log file on the target host; everything
    // else logs to the console.
    let log_file = match &cli.command {
        Commands::Place { log_file, .. } => Some(log_file.clone()),
        _ => None,
    };
    init_tracing(log_file.as_deref());

    match cli.command {
        Commands::Bundle { base, output } => {
            bundle::build_bundle(&BundleSpec::standard(&base), &output)
                .with_context(|| format!("building bundle from {}", base.display()))?;
            info!(output = %output.display(), "bundle built");
        }
        Commands::Transfer {
            host,
            user,
            identity,
            archive,
        } => {
            let target = SshTarget::new(host, user, identity);
            let client = TransferClient::new().with_observer(Box::new(LogObserver));
            client
                .transfer(&target, &archive)
                .await
                .with_context(|| format!("transferring bundle to {}", target.destination()))?;
        }
        Commands::Place { archive, .. } => {
            let config = PlacementConfig {
                archive_path: archive,
                ..PlacementConfig::default()
            };
            let report = PlacementEngine::new(config).run()?;
            for warning in &report.warnings {
                tracing::warn!("{warning}");
            }
            info!(placed = report.placed, "placement complete");
        }
        Commands::Nodes => {
            let reconciler = reconciler_from_env()?;
            let nodes = reconciler.list_nodes().await?;
            for node in &nodes {
                println!("{}\t{}\t{}", node.id, node.connection, node.node_type);
            }
            info!(count = nodes.len(), "nodes listed");
        }
        Commands::Reconcile => {
            let reconciler = reconciler_from_env()?;
            let outcome = reconciler.reconcile().await?;
            println!("deleted: {}, failed: {}", outcome.deleted, outcome.failed);
        }
        Commands::RemoveNode { instance } => {
            let reconciler = reconciler_from_env()?;
            reconciler.remove_node_for_instance(&instance).await?;
        }
    }
    Ok(())
}

fn reconciler_from_env() -> Result<NodeReconciler<HttpRegistryClient>> {
    let config = OrchestratorConfig::from_env()?;
    let client = HttpRegistryClient::new(&config)?;
    Ok(NodeReconciler::new(client))
}

/// Initialize tracing, optionally appending to a log file instead of the
/// console (the placement log on target hosts). Falls back to the console
/// when the file cannot be opened, e.g. running unprivileged in development.
fn init_tracing(log_file: Option<&Path>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!(
                    "cannot open log file {}: {e}; logging to console",
                    path.display()
                );
            }
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
