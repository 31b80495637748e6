//! Scheduler process: owns the one in-process cluster all simulated
//! workers share, assigns file parts round-robin, drives every worker's
//! data pass concurrently, and prints the merged progress after each pass.
//! Real straggler detection and reassignment are out of scope (spec.md §1);
//! `scheduler::StragglerEvent` is defined for a future scheduler to consume
//! but nothing here raises one yet, since the in-process transport never
//! times out a call.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use shardml::config::TrainerConfig;
use shardml::fileio::libsvm::LibsvmShardReader;
use shardml::localize::make_pool;
use shardml::monitoring::logging::LogConfig;
use shardml::scheduler::{assign_parts, ProgressAggregator};
use shardml::transport::local::LocalCluster;
use shardml::worker::run_data_pass;
use shardml::Result;

#[derive(Parser, Debug)]
#[command(name = "shardml-scheduler", about = "Drives a local multi-worker training run")]
struct Args {
    #[arg(long, env = "SHARDML_CONFIG")]
    config: PathBuf,

    /// Number of file parts the training file is split into.
    #[arg(long, default_value_t = 1)]
    num_parts: usize,
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

    let cluster = LocalCluster::new(cfg.cluster.num_shards, &cfg.server);
    let pool = Arc::new(make_pool(cfg.cluster.kernel_threads)?);

    for pass in 0..cfg.worker.num_passes {
        let mut handles = Vec::new();
        for worker_id in 0..cfg.cluster.num_workers {
            let parts = assign_parts(worker_id, cfg.cluster.num_workers, args.num_parts);
            let cluster = cluster.clone();
            let pool = pool.clone();
            let worker_cfg = cfg.worker.clone();
            let embedding_cfg = cfg.server.embedding.clone();
            let train_path = cfg.io.train_path.clone();
            let num_parts = args.num_parts;

            handles.push(tokio::spawn(async move {
                let mut total = shardml::progress::Progress::zero();
                for part_k in parts {
                    let mut reader = LibsvmShardReader::open(
                        &train_path,
                        part_k,
                        num_parts,
                        worker_cfg.shuffle_window,
                        worker_cfg.neg_sampling_rate,
                    )?;
                    let progress = run_data_pass(
                        &mut reader,
                        cluster.clone(),
                        worker_cfg.clone(),
                        embedding_cfg.clone(),
                        pool.clone(),
                        pass,
                        shardml::worker::PipelineMode::Train,
                    )
                    .await?;
                    total = total.merge(&progress);
                }
                Ok::<_, shardml::TrainerError>(total)
            }));
        }

        let mut aggregator = ProgressAggregator::new();
        for handle in handles {
            let progress = handle
                .await
                .map_err(|e| shardml::TrainerError::Transport(format!("worker task panicked: {e}")))??;
            aggregator.record(&progress);
        }

        let total = aggregator.total();
        tracing::info!(
            pass,
            workers_reported = aggregator.reports_received(),
            examples = total.examples,
            objective = total.objective,
            logloss = ?total.mean_logloss(),
            auc = ?total.auc(),
            "pass complete across cluster"
        );
    }

    Ok(())
}
