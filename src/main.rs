//! ShardSync - Replicated-Log Shard Follower
//!
//! Attaches read-only shard replicas to remote core nodes and keeps
//! them following the upstream transaction log.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardsync::config::ShardSyncConfig;
use shardsync::error::Result;
use shardsync::replication::{run_supervised, ReplicaOptions};
use shardsync::routing::ReadRouter;
use shardsync::status::StatusRegistry;
use shardsync::store::MemStore;
use shardsync::upstream::TcpCoreClient;

/// ShardSync - Replicated-Log Shard Follower
#[derive(Parser)]
#[command(name = "shardsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "shardsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start following the configured shards
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "shardsync.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "replicant-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start following the configured shards
async fn run_start(config_path: PathBuf) -> Result<()> {
    let config = ShardSyncConfig::from_file(&config_path)?;
    tracing::info!(
        "starting node {} following {} shard(s)",
        config.node.id,
        config.cluster.shards.len()
    );

    let client = Arc::new(TcpCoreClient::new(
        config.connect_timeout(),
        config.request_timeout(),
    ));
    let store = Arc::new(MemStore::new());
    let router = Arc::new(ReadRouter::new());
    let status = Arc::new(StatusRegistry::new());

    // Surface status notifications in the log
    let mut feed = status.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = feed.recv().await {
            tracing::debug!("status: {:?}", event);
        }
    });

    let mut replicas = Vec::new();
    for shard in &config.cluster.shards {
        let opts = ReplicaOptions::from_config(&config, shard);
        replicas.push(tokio::spawn(run_supervised(
            shard.clone(),
            config.cluster.cores.clone(),
            opts,
            client.clone(),
            store.clone(),
            router.clone(),
            status.clone(),
        )));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    for replica in replicas {
        replica.abort();
    }

    Ok(())
}

/// Write a sample configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let sample = format!(
        r#"[node]
id = "{}"
data_dir = "/var/lib/shardsync"

[cluster]
cores = ["10.0.0.1:7654"]
shards = ["shard-a"]
reconnect_interval_ms = 5000

[spill]
mem_only = true
dir = "/tmp/rlog"

[logging]
level = "info"
format = "pretty"
"#,
        node_id
    );

    std::fs::write(&output, sample)?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match ShardSyncConfig::from_file(&config_path) {
        Ok(_) => {
            println!("Configuration OK: {}", config_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = ShardSyncConfig::from_file(&config_path)?;

    println!("Node ID:     {}", config.node.id);
    println!("Data dir:    {}", config.node.data_dir.display());
    println!("Cores:       {}", config.cluster.cores.join(", "));
    println!("Shards:      {}", config.cluster.shards.join(", "));
    println!(
        "Reconnect:   {} ms",
        config.cluster.reconnect_interval_ms
    );
    println!(
        "Spill queue: {}",
        if config.spill.mem_only {
            "memory-only".to_string()
        } else {
            format!("disk-backed at {}", config.spill.dir.display())
        }
    );

    Ok(())
}
