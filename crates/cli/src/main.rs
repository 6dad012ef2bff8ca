//! Podwatch CLI
//!
//! One-shot sync of Docker hosts and Kubernetes clusters, container
//! actions, and error-log incident extraction against the local state file.

mod commands;
mod config;
mod output;

use agent_lib::models::UnitAction;
use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{action, containers, host_info, incidents, sync, CliContext};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Podwatch container monitor CLI
#[derive(Parser)]
#[command(name = "pw")]
#[command(author, version, about = "CLI for the Podwatch container monitor", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ~/.config/podwatch/config.json)
    #[arg(long, env = "PW_CONFIG")]
    pub config: Option<PathBuf>,

    /// State snapshot file (overrides the config file)
    #[arg(long, env = "PW_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile stored state with live runtimes
    #[command(subcommand)]
    Sync(SyncCommands),

    /// List stored containers and pods
    Containers {
        /// Only units of this Docker host
        #[arg(long)]
        host: Option<String>,
    },

    /// Error-log incidents
    #[command(subcommand)]
    Incidents(IncidentCommands),

    /// Run a lifecycle action on a container
    Action {
        /// Docker host name
        host: String,
        /// Container id or name
        container: String,
        /// start, stop, restart, pause, unpause, kill or remove
        action: UnitAction,
    },

    /// Show Docker engine details
    HostInfo {
        /// Docker host name
        host: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Sync Docker hosts
    Docker {
        /// Only this host
        #[arg(long)]
        host: Option<String>,

        /// Skip stats collection
        #[arg(long)]
        skip_metrics: bool,
    },

    /// Sync Kubernetes clusters
    K8s {
        /// Only this cluster
        #[arg(long)]
        cluster: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum IncidentCommands {
    /// Extract error blocks from a log file
    Extract {
        /// Log file to scan
        file: PathBuf,

        /// Container name recorded on each incident
        #[arg(long)]
        container: String,

        /// Container id (defaults to the name)
        #[arg(long)]
        container_id: Option<String>,

        /// Service the container belongs to
        #[arg(long)]
        service: Option<String>,

        /// Runtime the log came from
        #[arg(long, value_enum, default_value = "docker")]
        source: incidents::SourceArg,
    },

    /// List recorded incidents
    List {
        /// Only incidents of this container id
        #[arg(long)]
        container_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let config = config::Config::load(cli.config.as_deref())?;
    let snapshot = config.snapshot_path(cli.snapshot.as_deref())?;
    let ctx = CliContext {
        config,
        snapshot,
        format: cli.format,
    };

    let result = match cli.command {
        Commands::Sync(sync_cmd) => match sync_cmd {
            SyncCommands::Docker { host, skip_metrics } => {
                sync::sync_docker(&ctx, host, skip_metrics).await
            }
            SyncCommands::K8s { cluster } => sync::sync_k8s(&ctx, cluster).await,
        },
        Commands::Containers { host } => containers::list_containers(&ctx, host).await,
        Commands::Incidents(incident_cmd) => match incident_cmd {
            IncidentCommands::Extract {
                file,
                container,
                container_id,
                service,
                source,
            } => incidents::extract(&ctx, &file, &container, container_id, service, source).await,
            IncidentCommands::List { container_id } => incidents::list(&ctx, container_id).await,
        },
        Commands::Action {
            host,
            container,
            action,
        } => action::run_action(&ctx, &host, &container, action).await,
        Commands::HostInfo { host } => host_info::show_host_info(&ctx, &host).await,
    };

    if let Err(e) = &result {
        output::print_error(&format!("{:#}", e));
    }
    result
}
