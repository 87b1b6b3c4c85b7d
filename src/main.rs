//! slotwise - cluster coordination node
//!
//! Usage:
//!   slotwise [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>       Configuration file path
//!   -g, --gossip-addr <ADDR>  Gossip bind address (enables clustering)
//!   -s, --seed <ADDR>         Seed node, may be repeated
//!   -l, --log-level           Log level (error, warn, info, debug, trace)
//!   -h, --help                Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use slotwise::cluster::{
    ChannelHandlers, ClusterSubstrate, CoordinationAgent, GossipSubstrate, LoggingHandler,
    MemoryHub, NotificationChannel,
};
use slotwise::config::Config;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// slotwise - cluster coordination node
#[derive(Parser, Debug)]
#[command(name = "slotwise")]
#[command(version)]
#[command(about = "Slot tracking and cluster coordination for a clustered message broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gossip bind address; setting it enables clustering
    #[arg(short, long)]
    gossip_addr: Option<SocketAddr>,

    /// Seed node address (host:port), may be given more than once
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut file_config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(addr) = args.gossip_addr {
        file_config.cluster.enabled = true;
        file_config.cluster.gossip_addr = addr;
    }
    if !args.seeds.is_empty() {
        file_config.cluster.seeds = args.seeds;
    }

    let substrate: Arc<dyn ClusterSubstrate> = if file_config.cluster.enabled {
        info!(
            "Clustering enabled: gossip={} cluster_id={}",
            file_config.cluster.gossip_addr, file_config.cluster.cluster_id
        );
        if !file_config.cluster.seeds.is_empty() {
            info!("    Seeds: {}", file_config.cluster.seeds.join(", "));
        }
        Arc::new(GossipSubstrate::new(file_config.cluster.clone()).await?)
    } else {
        info!("Clustering disabled, running as a single node");
        let hub = MemoryHub::new();
        hub.join_with_uuid(
            file_config.cluster.get_node_uuid(),
            file_config.cluster.get_gossip_advertise_addr(),
        )
        .await
    };

    let mut handlers = ChannelHandlers::new();
    for channel in NotificationChannel::ALL {
        handlers.add(channel, LoggingHandler);
    }

    let agent = CoordinationAgent::new(substrate, handlers, file_config.coordination.clone());
    agent.start().await?;

    info!("Node {} started", agent.node_id());
    info!(
        "    Unique ID: {}, rank {:?} of {} members",
        agent.unique_id_for_node()?,
        agent.index_of_local_node(),
        agent.cluster_size()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    agent.shutdown().await?;
    info!("Node stopped");
    Ok(())
}
