//! Command execution.

use crate::{Cli, Commands, CommonArgs, EnableCommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stratum_cluster::{
    Acknowledgment, AllMustSucceed, ClusterConfig, Dispatcher, Membership, ReadinessWaiter, TargetSelector,
    TcpTransport,
};
use stratum_placement::{RequestBuilder, SafeStoragePrefixes};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Client {
    dispatcher: Arc<Dispatcher>,
    waiter: ReadinessWaiter,
    deadline: Duration,
}

impl Client {
    fn connect(cli: &Cli) -> Result<Self> {
        let config = ClusterConfig::load(&cli.cluster)
            .wrap_err_with(|| format!("loading cluster file {}", cli.cluster.display()))?;
        let membership = Arc::new(Membership::from_config(&config));
        let dispatcher = Arc::new(Dispatcher::new(
            membership,
            Arc::new(TcpTransport::new()),
            config.dispatch.clone(),
        ));
        let waiter = ReadinessWaiter::new(Arc::clone(&dispatcher), config.wait.clone());
        let deadline = cli.timeout.map_or_else(|| waiter.default_deadline(), Duration::from_secs);
        Ok(Self {
            dispatcher,
            waiter,
            deadline,
        })
    }
}

/// Run the parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let client = Client::connect(&cli)?;
    match cli.command {
        Commands::Enable { service } => enable(&client, service).await,
        Commands::Status { service, target, json } => status(&client, &service, target.as_deref(), json).await,
    }
}

async fn enable(client: &Client, command: EnableCommand) -> Result<()> {
    let (service, placement, common) = command.into_parts();
    let builder = RequestBuilder::new(SafeStoragePrefixes::from_env());
    let built = builder.build(service, common.wait, &placement)?;
    for warning in &built.warnings {
        eprintln!("warning: {}", warning);
    }

    let acks = dispatch(client, &built.request, &common).await?;
    for ack in &acks {
        if ack.already_enabled {
            println!("{} is already enabled on {}", ack.service, ack.node);
        } else {
            println!("{} accepted by {} (attempt {})", ack.service, ack.node, ack.attempt);
        }
    }
    if !common.wait {
        return Ok(());
    }

    let cancel = interrupt_token();
    let started = Instant::now();
    for ack in &acks {
        let remaining = client.deadline.saturating_sub(started.elapsed());
        let report = client.waiter.wait_for(ack, remaining, &cancel).await?;
        println!("{} is ready on {}", report.service, report.node);
    }
    Ok(())
}

async fn dispatch(
    client: &Client,
    request: &stratum_placement::EnablementRequest,
    common: &CommonArgs,
) -> Result<Vec<Acknowledgment>> {
    if common.all {
        let report = client.dispatcher.broadcast(request, &AllMustSucceed).await?;
        return Ok(report.succeeded().into_iter().cloned().collect());
    }
    let target = TargetSelector::from_flag(common.target.as_deref())?;
    debug!(target = %target, "dispatching");
    Ok(vec![client.dispatcher.dispatch(request, &target).await?])
}

async fn status(client: &Client, service: &str, target: Option<&str>, json: bool) -> Result<()> {
    let target = TargetSelector::from_flag(target)?;
    let report = client.dispatcher.status(service, &target).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("node:    {}", report.node);
    println!("service: {}", report.service);
    println!("state:   {}", report.state);
    println!("live:    {}", report.live);
    println!("attempt: {}", report.attempt);
    if let Some(error) = &report.error {
        println!("error:   {}", error);
    }
    Ok(())
}

/// Token cancelled on Ctrl-C; cancelling only stops local waiting
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}
