//! STRATUM CLI
//!
//! Enables optional services on cluster nodes and waits for them to come
//! up.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;

use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use stratum_placement::rgw::{DEFAULT_PORT, DEFAULT_SSL_PORT};
use stratum_placement::{RgwPlacement, ServicePlacement};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(about = "STRATUM - enable services across a storage cluster", long_about = None)]
struct Cli {
    /// Cluster file
    #[arg(long, global = true, env = "STRATUM_CLUSTER", default_value = "/etc/stratum/cluster.json")]
    cluster: PathBuf,

    /// Readiness deadline in seconds (defaults to the cluster file's)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable a service
    Enable {
        #[command(subcommand)]
        service: EnableCommand,
    },
    /// Show whether a service is ready on a node
    Status {
        /// Service name
        service: String,
        /// Node to query (defaults to the local node)
        #[arg(long)]
        target: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EnableCommand {
    /// Enable the object gateway
    Rgw(RgwArgs),
    /// Enable a monitor
    Mon(CommonArgs),
    /// Enable a manager
    Mgr(CommonArgs),
    /// Enable a metadata server
    Mds(CommonArgs),
}

impl EnableCommand {
    fn into_parts(self) -> (&'static str, ServicePlacement, CommonArgs) {
        match self {
            Self::Rgw(args) => (
                "rgw",
                ServicePlacement::Rgw(RgwPlacement {
                    port: args.port,
                    ssl_port: args.ssl_port,
                    ssl_certificate: args.ssl_certificate,
                    ssl_private_key: args.ssl_private_key,
                }),
                args.common,
            ),
            Self::Mon(common) => ("mon", ServicePlacement::Mon, common),
            Self::Mgr(common) => ("mgr", ServicePlacement::Mgr, common),
            Self::Mds(common) => ("mds", ServicePlacement::Mds, common),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct CommonArgs {
    /// Node to enable the service on (defaults to the local node)
    #[arg(long, conflicts_with = "all")]
    target: Option<String>,

    /// Enable on every cluster member
    #[arg(long)]
    all: bool,

    /// Wait for the service to become ready
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    wait: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct RgwArgs {
    /// Port to serve on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Port to serve TLS on
    #[arg(long, default_value_t = DEFAULT_SSL_PORT)]
    ssl_port: u16,

    /// TLS certificate path
    #[arg(long, default_value = "")]
    ssl_certificate: String,

    /// TLS private key path
    #[arg(long, default_value = "")]
    ssl_private_key: String,

    #[command(flatten)]
    common: CommonArgs,
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose { "stratum=debug" } else { "stratum=info" }
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose))),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    commands::run(cli).await
}
