//! Prometheus metrics for the parameter-server pipeline. Registered lazily
//! on first access so binaries that never touch a metric pay nothing.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramVec};
use prometheus::{register_counter_vec, register_gauge_vec, register_histogram_vec};

lazy_static! {
    // === RPC METRICS ===
    pub static ref RPC_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "shardml_rpc_requests_total",
        "Number of push/pull RPCs issued",
        &["op"]
    )
    .unwrap();

    pub static ref RPC_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "shardml_rpc_duration_seconds",
        "Latency of push/pull RPCs",
        &["op"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    )
    .unwrap();

    // === SPARSITY METRICS ===
    pub static ref NEW_W_GAUGE: GaugeVec = register_gauge_vec!(
        "shardml_new_w",
        "Nonzero scalar-weight count per shard",
        &["shard"]
    )
    .unwrap();

    pub static ref NEW_V_GAUGE: GaugeVec = register_gauge_vec!(
        "shardml_new_v",
        "Nonzero embedding-expanded key count per shard",
        &["shard"]
    )
    .unwrap();

    // === TRAINING PROGRESS METRICS ===
    pub static ref OBJECTIVE_GAUGE: GaugeVec = register_gauge_vec!(
        "shardml_objective",
        "Summed objective over the last reporting window",
        &["worker"]
    )
    .unwrap();

    pub static ref AUC_GAUGE: GaugeVec = register_gauge_vec!(
        "shardml_auc",
        "Rolling AUC estimate",
        &["worker"]
    )
    .unwrap();

    // === MINIBATCH PIPELINE METRICS ===
    pub static ref MINIBATCHES_IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "shardml_minibatches_in_flight",
        "Minibatches currently outside the DONE state",
        &["worker"]
    )
    .unwrap();
}
