//! # reqdist CLI Entry Point
//!
//! Starts coordinators and worker nodes.
//!
//! ## Usage
//!
//! ```bash
//! # Start a coordinator
//! reqdist coordinator -b 0.0.0.0:7100
//!
//! # Start a coordinator that runs the prime demo once a node joins
//! reqdist coordinator -b 0.0.0.0:7100 --primes 60000
//!
//! # Start a worker node
//! reqdist node -c 10.0.0.5:7100 -b 0.0.0.0:7200
//! ```
//!
//! Worker nodes read their capacity and intervals from `REQDIST_*`
//! environment variables (see [`Settings`]). The coordinator reads the
//! connect timeout it uses to reach them.

mod primes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use argh::FromArgs;
use reqdist_common::link::CoordinatorLink;
use reqdist_common::machine::ProcProbe;
use reqdist_common::requisition::Requisition;
use reqdist_common::transport::{NodeService, TcpTransport};
use reqdist_common::Settings;
use reqdist_coordinator::{Coordinator, CoordinatorConfig, CoordinatorServer};
use reqdist_node::{NodeServer, ProcessNode, RemoteCoordinator};
use tokio_util::sync::CancellationToken;

use crate::primes::PrimeSearch;

/// reqdist - requisition distribution system
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Coordinator(CoordinatorArgs),
    Node(NodeArgs),
}

/// Arguments for starting a coordinator.
///
/// # Example
///
/// ```bash
/// reqdist coordinator -b 0.0.0.0:7100 --call-timeout-ms 60000
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "coordinator")]
/// start a reqdist coordinator
struct CoordinatorArgs {
    /// address worker nodes connect to
    #[argh(option, short = 'b', default = "\"0.0.0.0:7100\".into()")]
    bind: String,

    /// how long a saturated unit waits before node selection runs again,
    /// in milliseconds
    #[argh(option, long = "recheck-interval-ms", default = "1000")]
    recheck_interval_ms: u64,

    /// optional bound on a whole remote call in milliseconds
    ///
    /// A call running longer evicts its node. Processing time is unbounded
    /// by default.
    #[argh(option, long = "call-timeout-ms")]
    call_timeout_ms: Option<u64>,

    /// find every prime below this limit once a node is available, then
    /// keep serving
    #[argh(option, long = "primes")]
    primes: Option<u64>,
}

/// Arguments for starting a worker node.
///
/// # Example
///
/// ```bash
/// REQDIST_BASE_IP=10.0.0 reqdist node -c 10.0.0.5:7100 -b 0.0.0.0:7200
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "node")]
/// start a reqdist worker node
struct NodeArgs {
    /// address of the coordinator
    #[argh(option, short = 'c')]
    coordinator: String,

    /// address to bind the node's server to
    ///
    /// Defaults to "0.0.0.0:0" which assigns a random available port.
    #[argh(option, short = 'b', default = "\"0.0.0.0:0\".into()")]
    bind: String,

    /// address the coordinator dials back
    ///
    /// Defaults to the advertised IP (see REQDIST_BASE_IP) and the bound
    /// port.
    #[argh(option, long = "advertise")]
    advertise: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Coordinator(args) => run_coordinator(args).await,
        Commands::Node(args) => run_node(args).await,
    }
}

async fn run_coordinator(args: CoordinatorArgs) -> Result<()> {
    let settings = Settings::from_env()?;
    let config = CoordinatorConfig {
        recheck_interval: Duration::from_millis(args.recheck_interval_ms),
        call_timeout: args.call_timeout_ms.map(Duration::from_millis),
        ..CoordinatorConfig::from(&settings)
    };
    let coordinator = Arc::new(Coordinator::with_config(config));
    let server = CoordinatorServer::bind(coordinator.clone(), &args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    let shutdown = CancellationToken::new();
    let serving = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };

    if let Some(limit) = args.primes {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = run_prime_demo(&coordinator, limit).await {
                tracing::error!("Prime demo failed: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    coordinator.finish().await?;
    shutdown.cancel();
    serving.await??;
    Ok(())
}

async fn run_prime_demo(coordinator: &Coordinator, limit: u64) -> Result<()> {
    while coordinator.controlled_nodes().is_empty() {
        tracing::info!("Waiting for a process node...");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let started = Instant::now();
    let primes = coordinator
        .submit(Requisition::divisible(PrimeSearch { limit }))
        .await?;
    let found = primes.as_array().map(Vec::len).unwrap_or_default();
    tracing::info!("Found {} primes below {} in {:?}", found, limit, started.elapsed());
    Ok(())
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let settings = Settings::from_env()?;
    let link: Arc<dyn CoordinatorLink> = Arc::new(RemoteCoordinator::new(
        args.coordinator.clone(),
        TcpTransport::new(settings.connect_timeout),
    ));
    let node = ProcessNode::from_settings(&settings, &ProcProbe::new(), link)?;

    let server = NodeServer::bind(node.clone(), primes::catalog(), &args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let advertised = match args.advertise {
        Some(addr) => addr,
        None => format!("{}:{}", settings.advertised_ip(), server.local_addr()?.port()),
    };
    tracing::info!("Node {} advertising {} to {}", node.name(), advertised, args.coordinator);
    node.set_advertised_addr(advertised);

    let shutdown = CancellationToken::new();
    let serving = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };
    node.launch().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    node.finish().await?;
    shutdown.cancel();
    serving.await??;
    Ok(())
}
