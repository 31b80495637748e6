//! Parameter-server process: hosts one or more shards of the key-value
//! store and answers push/pull RPCs until told to checkpoint and exit.
//! The local-only binary drives an in-process `LocalCluster` directly
//! rather than binding a socket, since the production transport is a
//! collaborator seam this crate doesn't implement (see `transport`).

use std::path::PathBuf;

use clap::Parser;
use shardml::config::TrainerConfig;
use shardml::monitoring::logging::LogConfig;
use shardml::transport::local::LocalCluster;
use shardml::Result;

#[derive(Parser, Debug)]
#[command(name = "shardml-server", about = "Sharded parameter-server process")]
struct Args {
    #[arg(long, env = "SHARDML_CONFIG")]
    config: PathBuf,

    /// Load a checkpoint written by an earlier run before serving.
    #[arg(long)]
    restore_from: Option<PathBuf>,

    /// Write a checkpoint here on a clean shutdown (Ctrl-C).
    #[arg(long)]
    checkpoint_to: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = TrainerConfig::load(&args.config)?;

    let log_config = if matches!(cfg.logging.format, shardml::config::LogFormat::Json) {
        LogConfig::production()
    } else {
        LogConfig::development()
    };
    log_config.init();

    tracing::info!(num_shards = cfg.cluster.num_shards, "starting parameter server");

    let cluster = LocalCluster::new(cfg.cluster.num_shards, &cfg.server);

    if let Some(dir) = &args.restore_from {
        for shard in 0..cluster.num_shards() {
            let path = dir.join(format!("shard-{shard}.bin"));
            if path.exists() {
                shardml::transport::KvTransport::snapshot_load(cluster.as_ref(), shard, &path).await?;
                tracing::info!(shard, ?path, "restored shard from checkpoint");
            }
        }
    }

    tokio::signal::ctrl_c().await.map_err(shardml::TrainerError::Io)?;
    tracing::info!("shutdown requested");

    if let Some(dir) = &args.checkpoint_to {
        std::fs::create_dir_all(dir)?;
        for shard in 0..cluster.num_shards() {
            let path = dir.join(format!("shard-{shard}.bin"));
            shardml::transport::KvTransport::snapshot_save(cluster.as_ref(), shard, &path).await?;
            tracing::info!(shard, ?path, "wrote checkpoint");
        }
    }

    Ok(())
}
