//! `LocalCluster`: an in-process `KvTransport` over one `tokio::sync::mpsc`
//! channel per shard and a `DashMap`-backed `Shard` store, so the minibatch
//! pipeline has a runnable, independently testable end-to-end path without a
//! real network. Each shard's channel has a single consumer task, which is
//! what gives the "FIFO per (worker, server, key)" ordering guarantee
//! spec.md §5 requires: two pushes queued from anywhere arrive and apply in
//! the order they were sent.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};

use crate::config::ServerConfig;
use crate::data::FeaId;
use crate::error::{Result, TrainerError};
use crate::server::Shard;
use crate::transport::{KvTransport, PullOpts, PushCommand, PushOpts};

enum ShardCommand {
    PushGradient {
        key: FeaId,
        grad: Vec<f32>,
        respond: oneshot::Sender<Result<()>>,
    },
    PushCount {
        key: FeaId,
        count: u64,
        respond: oneshot::Sender<()>,
    },
    Pull {
        key: FeaId,
        respond: oneshot::Sender<Vec<f32>>,
    },
    SnapshotSave {
        path: PathBuf,
        respond: oneshot::Sender<Result<()>>,
    },
    SnapshotLoad {
        path: PathBuf,
        respond: oneshot::Sender<Result<()>>,
    },
}

struct ShardHandle {
    sender: mpsc::Sender<ShardCommand>,
}

fn spawn_shard_worker(shard_id: usize, config: ServerConfig) -> ShardHandle {
    let (tx, mut rx) = mpsc::channel::<ShardCommand>(1024);
    tokio::spawn(async move {
        let shard = Shard::new(&config);
        let mut rng = rand::rngs::StdRng::from_entropy();
        let shard_label = shard_id.to_string();
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ShardCommand::PushGradient { key, grad, respond } => {
                    crate::monitoring::metrics::RPC_REQUESTS_TOTAL
                        .with_label_values(&["push_gradient"])
                        .inc();
                    let result = shard.push_gradient(key, &grad);
                    crate::monitoring::metrics::NEW_W_GAUGE
                        .with_label_values(&[&shard_label])
                        .set(shard.new_w() as f64);
                    let _ = respond.send(result);
                }
                ShardCommand::PushCount { key, count, respond } => {
                    crate::monitoring::metrics::RPC_REQUESTS_TOTAL
                        .with_label_values(&["push_count"])
                        .inc();
                    shard.push_count(key, count, &mut rng);
                    crate::monitoring::metrics::NEW_V_GAUGE
                        .with_label_values(&[&shard_label])
                        .set(shard.new_v() as f64);
                    let _ = respond.send(());
                }
                ShardCommand::Pull { key, respond } => {
                    crate::monitoring::metrics::RPC_REQUESTS_TOTAL
                        .with_label_values(&["pull"])
                        .inc();
                    let _ = respond.send(shard.pull(key));
                }
                ShardCommand::SnapshotSave { path, respond } => {
                    let result = std::fs::File::create(&path)
                        .map_err(TrainerError::Io)
                        .and_then(|mut f| shard.snapshot_write(&mut f).map_err(TrainerError::Io));
                    let _ = respond.send(result);
                }
                ShardCommand::SnapshotLoad { path, respond } => {
                    let result = std::fs::File::open(&path)
                        .map_err(TrainerError::Io)
                        .and_then(|mut f| shard.snapshot_load(&mut f));
                    let _ = respond.send(result);
                }
            }
        }
    });
    ShardHandle { sender: tx }
}

pub struct LocalCluster {
    shards: Vec<ShardHandle>,
}

impl LocalCluster {
    pub fn new(num_shards: usize, config: &ServerConfig) -> Arc<Self> {
        let shards = (0..num_shards.max(1))
            .map(|shard_id| spawn_shard_worker(shard_id, config.clone()))
            .collect();
        Arc::new(Self { shards })
    }

    fn shard_of(&self, key: FeaId) -> usize {
        (key % self.shards.len() as u64) as usize
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    async fn send_gradient(&self, key: FeaId, grad: Vec<f32>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let shard = &self.shards[self.shard_of(key)];
        shard
            .sender
            .send(ShardCommand::PushGradient {
                key,
                grad,
                respond: tx,
            })
            .await
            .map_err(|_| TrainerError::Transport("shard worker channel closed".into()))?;
        rx.await
            .map_err(|_| TrainerError::Transport("shard worker dropped response".into()))?
    }

    async fn send_count(&self, key: FeaId, count: u64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let shard = &self.shards[self.shard_of(key)];
        shard
            .sender
            .send(ShardCommand::PushCount {
                key,
                count,
                respond: tx,
            })
            .await
            .map_err(|_| TrainerError::Transport("shard worker channel closed".into()))?;
        rx.await
            .map_err(|_| TrainerError::Transport("shard worker dropped response".into()))
    }

    async fn fetch(&self, key: FeaId) -> Result<Vec<f32>> {
        let (tx, rx) = oneshot::channel();
        let shard = &self.shards[self.shard_of(key)];
        shard
            .sender
            .send(ShardCommand::Pull { key, respond: tx })
            .await
            .map_err(|_| TrainerError::Transport("shard worker channel closed".into()))?;
        rx.await
            .map_err(|_| TrainerError::Transport("shard worker dropped response".into()))
    }
}

#[async_trait]
impl KvTransport for LocalCluster {
    async fn push(&self, keys: &[FeaId], payload: &[f32], value_lengths: &[u32], opts: &PushOpts) -> Result<()> {
        let mut offset = 0usize;
        let mut futures: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>>> =
            Vec::with_capacity(keys.len());
        for (&key, &len) in keys.iter().zip(value_lengths) {
            let slice = payload[offset..offset + len as usize].to_vec();
            offset += len as usize;
            match opts.command {
                PushCommand::Gradient => futures.push(Box::pin(self.send_gradient(key, slice))),
                PushCommand::Count => {
                    let count = slice.first().copied().unwrap_or(0.0).round().max(0.0) as u64;
                    futures.push(Box::pin(self.send_count(key, count)));
                }
            }
        }
        for f in futures {
            f.await?;
        }
        Ok(())
    }

    async fn pull(&self, keys: &[FeaId], _opts: &PullOpts) -> Result<(Vec<f32>, Vec<u32>)> {
        let mut values = Vec::new();
        let mut lengths = Vec::with_capacity(keys.len());
        for &key in keys {
            let v = self.fetch(key).await?;
            lengths.push(v.len() as u32);
            values.extend(v);
        }
        Ok((values, lengths))
    }

    async fn snapshot_save(&self, shard: usize, path: &std::path::Path) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shards[shard]
            .sender
            .send(ShardCommand::SnapshotSave {
                path: path.to_path_buf(),
                respond: tx,
            })
            .await
            .map_err(|_| TrainerError::Transport("shard worker channel closed".into()))?;
        rx.await
            .map_err(|_| TrainerError::Transport("shard worker dropped response".into()))?
    }

    async fn snapshot_load(&self, shard: usize, path: &std::path::Path) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shards[shard]
            .sender
            .send(ShardCommand::SnapshotLoad {
                path: path.to_path_buf(),
                respond: tx,
            })
            .await
            .map_err(|_| TrainerError::Transport("shard worker channel closed".into()))?;
        rx.await
            .map_err(|_| TrainerError::Transport("shard worker dropped response".into()))?
    }
}
