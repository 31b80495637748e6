//! The key-value transport collaborator: push/pull RPCs between a worker
//! and the sharded server store. This crate specifies the trait and ships
//! one concrete in-process implementation (`local::LocalCluster`); a real
//! deployment plugs a network transport in here instead.

pub mod local;

use async_trait::async_trait;

use crate::data::FeaId;
use crate::error::Result;

/// Distinguishes push-count from push-gradient; per spec.md §4.4.2 / §9
/// this is carried as an RPC command code, not inferred from payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushCommand {
    Count,
    Gradient,
}

#[derive(Debug, Clone)]
pub struct PushOpts {
    pub command: PushCommand,
    /// Clears the server's key-caching filter state for these keys after
    /// applying the push. A transport-layer concern; this crate only
    /// carries and records the flag (see SPEC_FULL.md §6).
    pub clear_key_cache: bool,
    pub quantize_bytes: Option<u8>,
    pub compress: bool,
    pub dependency_timestamp: Option<u64>,
}

impl Default for PushOpts {
    fn default() -> Self {
        Self {
            command: PushCommand::Gradient,
            clear_key_cache: false,
            quantize_bytes: None,
            compress: false,
            dependency_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PullOpts {
    pub quantize_bytes: Option<u8>,
    pub compress: bool,
    pub dependency_timestamp: Option<u64>,
}

#[async_trait]
pub trait KvTransport: Send + Sync {
    /// Sends one payload per key; `value_lengths[i]` is the length of key
    /// `i`'s slice of the flat `payload`. On the server side the updater
    /// sees one `(key, value_slice)` call per key.
    async fn push(&self, keys: &[FeaId], payload: &[f32], value_lengths: &[u32], opts: &PushOpts) -> Result<()>;

    /// Receives one payload per key, flattened the same way `push` sends.
    async fn pull(&self, keys: &[FeaId], opts: &PullOpts) -> Result<(Vec<f32>, Vec<u32>)>;

    /// Iterates a shard's local entries to a byte stream in undefined
    /// order, per spec.md §6's on-disk format.
    async fn snapshot_save(&self, shard: usize, path: &std::path::Path) -> Result<()>;
    async fn snapshot_load(&self, shard: usize, path: &std::path::Path) -> Result<()>;
}
