//! Worker process: reads one file part end to end against an in-process
//! parameter-server cluster and prints the resulting progress. Since this
//! crate's only `KvTransport` is in-process (`transport::local::LocalCluster`),
//! a standalone worker binary necessarily hosts its own cluster rather than
//! dialing a remote one; real cross-process operation is left to whoever
//! plugs in a network `KvTransport`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use shardml::config::TrainerConfig;
use shardml::fileio::libsvm::LibsvmShardReader;
use shardml::localize::make_pool;
use shardml::monitoring::logging::LogConfig;
use shardml::transport::local::LocalCluster;
use shardml::worker::{run_data_pass, PipelineMode};
use shardml::Result;

#[derive(Parser, Debug)]
#[command(name = "shardml-worker", about = "Minibatch training worker")]
struct Args {
    #[arg(long, env = "SHARDML_CONFIG")]
    config: PathBuf,

    #[arg(long)]
    part_k: usize,

    #[arg(long)]
    part_n: usize,

    /// Run a single prediction pass instead of training, writing one line
    /// per row (the raw margin, or a probability when
    /// `worker.predict_probability` is set) to this file.
    #[arg(long)]
    predict_out: Option<PathBuf>,
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

    if let Some(predict_out) = &args.predict_out {
        let mut reader = LibsvmShardReader::open(&cfg.io.train_path, args.part_k, args.part_n, 0, 1.0)?;
        let file = std::fs::File::create(predict_out)?;
        let sink: Arc<Mutex<dyn std::io::Write + Send>> = Arc::new(Mutex::new(std::io::BufWriter::new(file)));
        let mode = PipelineMode::Predict {
            probability: cfg.worker.predict_probability,
            sink,
        };
        let progress = run_data_pass(
            &mut reader,
            cluster.clone(),
            cfg.worker.clone(),
            cfg.server.embedding.clone(),
            pool.clone(),
            0,
            mode,
        )
        .await?;
        tracing::info!(examples = progress.examples, path = ?predict_out, "prediction pass complete");
        return Ok(());
    }

    for pass in 0..cfg.worker.num_passes {
        let mut reader = LibsvmShardReader::open(
            &cfg.io.train_path,
            args.part_k,
            args.part_n,
            cfg.worker.shuffle_window,
            cfg.worker.neg_sampling_rate,
        )?;

        let progress = run_data_pass(
            &mut reader,
            cluster.clone(),
            cfg.worker.clone(),
            cfg.server.embedding.clone(),
            pool.clone(),
            pass,
            PipelineMode::Train,
        )
        .await?;

        tracing::info!(
            pass,
            examples = progress.examples,
            objective = progress.objective,
            logloss = ?progress.mean_logloss(),
            auc = ?progress.auc(),
            "data pass complete"
        );
    }

    Ok(())
}
