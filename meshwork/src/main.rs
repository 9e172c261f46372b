use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use meshwork_core::cluster::join_auth::{admin_token, join_token};
use meshwork_core::cluster::{Cluster, ClusterHandle, ClusterRuntime};
use meshwork_core::config::ClusterConfig;
use meshwork_core::observability::init_tracing;
use meshwork_core::runtime::InMemoryNetwork;

#[derive(Parser)]
#[command(name = "meshwork")]
#[command(about = "Gossip cluster membership tooling", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "meshwork=info,meshwork_core=info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration after validation
    Config {
        /// TOML file to load; environment variables are used otherwise
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "toml")]
        format: Format,
    },
    /// Run an in-process cluster and report how it converged
    Simulate {
        #[arg(long, default_value = "3")]
        nodes: usize,

        /// Give up waiting for convergence after this many seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Shared join secret for every simulated node
        #[arg(long)]
        join_secret: Option<String>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,

        #[arg(long)]
        json: bool,
    },
    /// Compute authentication tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Token a node presents with its join request
    Join {
        #[arg(long, env = "MESHWORK_JOIN_SECRET")]
        secret: String,
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        node_id: String,
        #[arg(long)]
        address: String,
    },
    /// Token accepted by administrative operations
    Admin {
        #[arg(long, env = "MESHWORK_ADMIN_SECRET")]
        secret: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Toml,
    Json,
}

#[derive(Serialize)]
struct MemberRow {
    id: String,
    address: String,
    status: String,
    generation: u64,
}

#[derive(Serialize)]
struct SimulationReport {
    nodes: usize,
    converged: bool,
    elapsed_ms: u128,
    leader: Option<String>,
    in_quorum: bool,
    members: Vec<MemberRow>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(Some(cli.log.as_str())) {
        eprintln!("tracing already initialised: {}", e);
    }

    match cli.command {
        Commands::Config { file, format } => print_config(file, format),
        Commands::Simulate {
            nodes,
            timeout,
            join_secret,
            metrics,
            json,
        } => simulate(nodes, Duration::from_secs(timeout), join_secret, metrics, json).await,
        Commands::Token { command } => print_token(command),
    }
}

fn print_config(file: Option<PathBuf>, format: Format) -> Result<()> {
    let config = match file {
        Some(path) => ClusterConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClusterConfig::from_env().context("loading configuration from environment")?,
    };
    let rendered = match format {
        Format::Toml => config.to_toml()?,
        Format::Json => serde_json::to_string_pretty(&config)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn print_token(command: TokenCommands) -> Result<()> {
    let token = match command {
        TokenCommands::Join {
            secret,
            cluster,
            node_id,
            address,
        } => join_token(&secret, &cluster, &node_id, &address)?,
        TokenCommands::Admin { secret } => admin_token(&secret)?,
    };
    println!("{}", token);
    Ok(())
}

async fn simulate(
    nodes: usize,
    timeout: Duration,
    join_secret: Option<String>,
    with_metrics: bool,
    json: bool,
) -> Result<()> {
    if nodes == 0 {
        bail!("--nodes must be at least 1");
    }
    if with_metrics {
        meshwork_core::metrics::init_prometheus().context("initialising metrics")?;
    }

    let network = InMemoryNetwork::new();
    let seed = node_address(0);
    let mut handles: Vec<ClusterHandle> = Vec::with_capacity(nodes);

    for i in 0..nodes {
        let address = node_address(i);
        let mut config = ClusterConfig::test(address.clone());
        config.cluster_name = "simulation".to_string();
        config.node.id = format!("node-{}", i + 1);
        config.discovery.seeds = vec![seed.clone()];
        config.security.join_secret = join_secret.clone();

        let runtime = ClusterRuntime::new(network.transport(address.clone()));
        let handle = Cluster::start(config, runtime)
            .await
            .with_context(|| format!("starting node at {}", address))?;
        handles.push(handle);
    }

    let started = Instant::now();
    let converged = wait_for_convergence(&handles, nodes, timeout).await?;
    if !converged {
        warn!(nodes, ?timeout, "cluster did not converge in time");
    }

    let state = handles[0].state().await?;
    let report = SimulationReport {
        nodes,
        converged,
        elapsed_ms: started.elapsed().as_millis(),
        leader: state.leader_address.clone(),
        in_quorum: state.in_quorum,
        members: state
            .view
            .members()
            .map(|m| MemberRow {
                id: m.id.clone(),
                address: m.address.clone(),
                status: m.status.to_string(),
                generation: m.generation,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} nodes, converged: {}, after {} ms",
            report.nodes, report.converged, report.elapsed_ms
        );
        println!("leader: {}", report.leader.as_deref().unwrap_or("-"));
        println!("{:<12} {:<20} {:<10} {}", "ID", "ADDRESS", "STATUS", "GEN");
        for row in &report.members {
            println!("{:<12} {:<20} {:<10} {}", row.id, row.address, row.status, row.generation);
        }
    }

    if with_metrics {
        println!("{}", meshwork_core::metrics::prometheus_metrics());
    }

    for handle in &handles {
        handle.shutdown().await?;
    }
    info!("simulation finished");
    Ok(())
}

/// Poll every node until each one sees all `expected` members as Up
async fn wait_for_convergence(handles: &[ClusterHandle], expected: usize, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut all = true;
        for handle in handles {
            let view = handle.view().await?;
            if view.healthy_count() != expected {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn node_address(index: usize) -> String {
    format!("127.0.0.1:{}", 7001 + index)
}
