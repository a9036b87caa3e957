//! STRATUM node daemon
//!
//! Serves the service enablement protocol for one cluster member.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use stratum_cluster::ClusterConfig;
use stratum_server::{NodeDaemon, NodeOptions, SupervisorKind};
use stratum_storage::StoreConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stratum-node")]
#[command(about = "STRATUM node daemon", long_about = None)]
struct Args {
    /// Cluster file
    #[arg(long, env = "STRATUM_CLUSTER")]
    cluster: PathBuf,

    /// Directory holding the record store
    #[arg(long, default_value = "/var/lib/stratum")]
    data_dir: PathBuf,

    /// Bind address (defaults to this node's member address)
    #[arg(short, long)]
    bind: Option<String>,

    /// Program that activates and probes services
    #[arg(long, conflicts_with = "simulate_startup_ms")]
    hook: Option<PathBuf>,

    /// Simulate services that become live this many milliseconds after
    /// activation (used when no hook is given)
    #[arg(long, default_value_t = 0)]
    simulate_startup_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stratum=info")))
        .init();

    let cluster = ClusterConfig::load(&args.cluster)
        .with_context(|| format!("loading cluster file {}", args.cluster.display()))?;
    let supervisor = match args.hook {
        Some(program) => SupervisorKind::Hook(program),
        None => SupervisorKind::Simulated {
            startup_delay: Duration::from_millis(args.simulate_startup_ms),
        },
    };

    let daemon = NodeDaemon::start(NodeOptions {
        cluster,
        store: StoreConfig::new(args.data_dir),
        supervisor,
        bind: args.bind,
    })
    .await?;
    let recovery = daemon.recovery();
    info!(
        restored = recovery.restored,
        reactivated = recovery.reactivated,
        failed = recovery.failed,
        "state recovered"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            signal.cancel();
        }
    });

    daemon.run(shutdown).await?;
    Ok(())
}
