//! End-to-end exercise of the full pipeline: a libsvm file part, localized
//! and trained against an in-process sharded cluster over several passes,
//! with embeddings enabled so both the scalar and expanded server-entry
//! paths get covered by one test.

use std::io::Write;
use std::sync::{Arc, Mutex};

use shardml::config::{EmbeddingConfig, ServerConfig, WorkerConfig};
use shardml::fileio::libsvm::LibsvmShardReader;
use shardml::localize::make_pool;
use shardml::transport::local::LocalCluster;
use shardml::transport::KvTransport;
use shardml::worker::{run_data_pass, PipelineMode};

fn write_fixture() -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    let lines = [
        "1 1:1.0 2:1.0 3:1.0",
        "-1 2:1.0 4:1.0",
        "1 1:1.0 4:1.0 5:1.0",
        "-1 3:1.0 5:1.0",
        "1 1:1.0 2:1.0 5:1.0",
        "-1 2:1.0 3:1.0 4:1.0",
    ];
    for line in &lines {
        writeln!(f, "{line}").unwrap();
    }
    f
}

#[tokio::test]
async fn trains_over_several_passes_and_improves_logloss() {
    let fixture = write_fixture();

    let mut server_cfg = ServerConfig::default();
    server_cfg.embedding = EmbeddingConfig {
        dim: 3,
        threshold: 2,
        l1_shrinkage_gate: false,
        ..EmbeddingConfig::default()
    };
    let cluster = LocalCluster::new(2, &server_cfg);

    let mut worker_cfg = WorkerConfig::default();
    worker_cfg.minibatch_size = 3;
    worker_cfg.max_concurrent = 2;

    let pool = Arc::new(make_pool(2).unwrap());

    let mut logloss_by_pass = Vec::new();
    for pass in 0..3 {
        let mut reader = LibsvmShardReader::open(fixture.path(), 0, 1, 0, 1.0).unwrap();
        let progress = run_data_pass(
            &mut reader,
            cluster.clone(),
            worker_cfg.clone(),
            server_cfg.embedding.clone(),
            pool.clone(),
            pass,
            PipelineMode::Train,
        )
        .await
        .unwrap();

        assert_eq!(progress.examples, 6);
        let logloss = progress.mean_logloss().unwrap();
        assert!(logloss.is_finite());
        logloss_by_pass.push(logloss);
    }

    // Three FTRL passes over the same six labelled rows should end up
    // fitting the data noticeably better than a single pass from scratch.
    assert!(
        logloss_by_pass[2] < logloss_by_pass[0],
        "logloss did not improve: {logloss_by_pass:?}"
    );
}

#[tokio::test]
async fn checkpoint_round_trips_across_a_fresh_cluster() {
    let fixture = write_fixture();

    let mut server_cfg = ServerConfig::default();
    server_cfg.embedding.dim = 2;
    server_cfg.embedding.threshold = 1;
    server_cfg.embedding.l1_shrinkage_gate = false;
    let cluster = LocalCluster::new(1, &server_cfg);

    let worker_cfg = WorkerConfig::default();
    let pool = Arc::new(make_pool(1).unwrap());

    let mut reader = LibsvmShardReader::open(fixture.path(), 0, 1, 0, 1.0).unwrap();
    run_data_pass(
        &mut reader,
        cluster.clone(),
        worker_cfg.clone(),
        server_cfg.embedding.clone(),
        pool.clone(),
        0,
        PipelineMode::Train,
    )
    .await
    .unwrap();

    let checkpoint = tempfile::NamedTempFile::new().unwrap();
    cluster.snapshot_save(0, checkpoint.path()).await.unwrap();

    let restored = LocalCluster::new(1, &server_cfg);
    restored.snapshot_load(0, checkpoint.path()).await.unwrap();

    let (before, _) = cluster.pull(&[1, 2, 3, 4, 5], &Default::default()).await.unwrap();
    let (after, _) = restored.pull(&[1, 2, 3, 4, 5], &Default::default()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn predict_pass_after_training_writes_one_probability_per_row() {
    let fixture = write_fixture();

    let server_cfg = ServerConfig::default();
    let cluster = LocalCluster::new(1, &server_cfg);
    let worker_cfg = WorkerConfig::default();
    let pool = Arc::new(make_pool(1).unwrap());

    let mut reader = LibsvmShardReader::open(fixture.path(), 0, 1, 0, 1.0).unwrap();
    run_data_pass(
        &mut reader,
        cluster.clone(),
        worker_cfg.clone(),
        server_cfg.embedding.clone(),
        pool.clone(),
        0,
        PipelineMode::Train,
    )
    .await
    .unwrap();

    let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink: Arc<Mutex<dyn Write + Send>> = buf.clone();
    let mut reader = LibsvmShardReader::open(fixture.path(), 0, 1, 0, 1.0).unwrap();
    let progress = run_data_pass(
        &mut reader,
        cluster.clone(),
        worker_cfg,
        server_cfg.embedding.clone(),
        pool,
        0,
        PipelineMode::Predict {
            probability: true,
            sink,
        },
    )
    .await
    .unwrap();

    assert_eq!(progress.examples, 6);
    let written = buf.lock().unwrap();
    let lines: Vec<&str> = std::str::from_utf8(&written).unwrap().lines().collect();
    assert_eq!(lines.len(), 6);
    for line in lines {
        let p: f32 = line.parse().unwrap();
        assert!((0.0..=1.0).contains(&p));
    }
}
