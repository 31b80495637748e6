//! Configuration for the three binaries (`scheduler`, `server`, `worker`).
//!
//! Loaded from a TOML file via `TrainerConfig::load`, with every field
//! defaulted so a minimal file (or none at all) still produces a runnable
//! configuration. CLI flags in each `bin/` entry point override the file
//! path only; per-field overrides are left to the config file by design.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

fn default_minibatch_size() -> usize {
    1000
}
fn default_max_concurrent() -> usize {
    4
}
fn default_shuffle_window() -> usize {
    0
}
fn default_neg_sampling_rate() -> f32 {
    1.0
}
fn default_num_passes() -> usize {
    1
}
fn default_kernel_threads() -> usize {
    2
}
fn default_alpha() -> f32 {
    0.1
}
fn default_beta() -> f32 {
    1.0
}
fn default_lambda1() -> f32 {
    0.0
}
fn default_lambda2() -> f32 {
    0.0
}
fn default_embedding_dim() -> usize {
    0
}
fn default_embedding_threshold() -> u64 {
    10
}
fn default_v_init_scale() -> f32 {
    0.01
}
fn default_alpha_v() -> f32 {
    0.01
}
fn default_beta_v() -> f32 {
    1.0
}
fn default_lambda2_v() -> f32 {
    0.0
}
fn default_true() -> bool {
    true
}
fn default_num_shards() -> usize {
    1
}
fn default_num_workers() -> usize {
    1
}
fn default_format() -> String {
    "libsvm".to_string()
}
fn default_checkpoint_dir() -> String {
    "./checkpoints".to_string()
}
fn default_report_interval_ms() -> u64 {
    1000
}

/// Algorithm used by the per-key scalar updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdaterAlgorithm {
    Ftrl,
    AdaGrad,
    Sgd,
}

impl Default for UpdaterAlgorithm {
    fn default() -> Self {
        UpdaterAlgorithm::Ftrl
    }
}

/// Objective the loss kernel evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectiveKind {
    Logistic,
    SquaredHinge,
    Squared,
}

impl Default for ObjectiveKind {
    fn default() -> Self {
        ObjectiveKind::Logistic
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(default = "default_minibatch_size")]
    pub minibatch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_shuffle_window")]
    pub shuffle_window: usize,
    #[serde(default = "default_neg_sampling_rate")]
    pub neg_sampling_rate: f32,
    #[serde(default = "default_num_passes")]
    pub num_passes: usize,
    #[serde(default)]
    pub objective: ObjectiveKind,
    /// In a prediction pass (`worker --predict-out`), write `sigmoid(s)`
    /// per row instead of the raw margin `s`.
    #[serde(default)]
    pub predict_probability: bool,
    #[serde(default)]
    pub grad_clip: Option<f32>,
    #[serde(default)]
    pub grad_dropout: Option<f32>,
    #[serde(default)]
    pub grad_normalize: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            minibatch_size: default_minibatch_size(),
            max_concurrent: default_max_concurrent(),
            shuffle_window: default_shuffle_window(),
            neg_sampling_rate: default_neg_sampling_rate(),
            num_passes: default_num_passes(),
            objective: ObjectiveKind::default(),
            predict_probability: false,
            grad_clip: None,
            grad_dropout: None,
            grad_normalize: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    #[serde(default = "default_embedding_threshold")]
    pub threshold: u64,
    #[serde(default = "default_v_init_scale")]
    pub init_scale: f32,
    #[serde(default = "default_alpha_v")]
    pub alpha: f32,
    #[serde(default = "default_beta_v")]
    pub beta: f32,
    #[serde(default = "default_lambda2_v")]
    pub lambda2: f32,
    #[serde(default = "default_true")]
    pub l1_shrinkage_gate: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: default_embedding_dim(),
            threshold: default_embedding_threshold(),
            init_scale: default_v_init_scale(),
            alpha: default_alpha_v(),
            beta: default_beta_v(),
            lambda2: default_lambda2_v(),
            l1_shrinkage_gate: default_true(),
        }
    }
}

impl EmbeddingConfig {
    pub fn enabled(&self) -> bool {
        self.dim > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default)]
    pub algorithm: UpdaterAlgorithm,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_beta")]
    pub beta: f32,
    #[serde(default = "default_lambda1")]
    pub lambda1: f32,
    #[serde(default = "default_lambda2")]
    pub lambda2: f32,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_kernel_threads")]
    pub kernel_threads: usize,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            algorithm: UpdaterAlgorithm::default(),
            alpha: default_alpha(),
            beta: default_beta(),
            lambda1: default_lambda1(),
            lambda2: default_lambda2(),
            embedding: EmbeddingConfig::default(),
            kernel_threads: default_kernel_threads(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_kernel_threads")]
    pub kernel_threads: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_shards: default_num_shards(),
            num_workers: default_num_workers(),
            kernel_threads: default_kernel_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    #[serde(default)]
    pub train_path: String,
    #[serde(default)]
    pub validation_path: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            train_path: String::new(),
            validation_path: None,
            format: default_format(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrainerConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TrainerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cfg: TrainerConfig = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.num_shards == 0 {
            return Err(TrainerError::Configuration(
                "cluster.num_shards must be >= 1".into(),
            ));
        }
        if self.worker.max_concurrent == 0 {
            return Err(TrainerError::Configuration(
                "worker.max_concurrent must be >= 1".into(),
            ));
        }
        if self.server.embedding.enabled() && self.server.embedding.alpha <= 0.0 {
            return Err(TrainerError::Configuration(
                "server.embedding.alpha must be > 0 when embeddings are enabled".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = TrainerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.algorithm, UpdaterAlgorithm::Ftrl);
        assert!(!cfg.server.embedding.enabled());
    }

    #[test]
    fn parses_partial_toml() {
        let text = r#"
            [server]
            algorithm = "adagrad"
            alpha = 0.2

            [server.embedding]
            dim = 4
            threshold = 5
        "#;
        let cfg: TrainerConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.server.algorithm, UpdaterAlgorithm::AdaGrad);
        assert_eq!(cfg.server.alpha, 0.2);
        assert_eq!(cfg.server.embedding.dim, 4);
        assert!(cfg.server.embedding.enabled());
        assert_eq!(cfg.worker.minibatch_size, default_minibatch_size());
    }

    #[test]
    fn rejects_zero_shards() {
        let mut cfg = TrainerConfig::default();
        cfg.cluster.num_shards = 0;
        assert!(cfg.validate().is_err());
    }
}
