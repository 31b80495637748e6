//! One shard of the sharded key-value parameter store. A `dashmap::DashMap`
//! gives per-key critical sections without a cross-key lock (spec.md §5);
//! `new_w` / `new_V` are per-shard atomics summed at report time instead of
//! the source's process-global counters (design note, spec.md §9).

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use rand::Rng;

use crate::config::{EmbeddingConfig, ServerConfig};
use crate::data::FeaId;
use crate::error::{Result, TrainerError};
use crate::progress::Progress;
use crate::server::entry::ServerEntry;
use crate::server::updater::{self, ScalarParams};

pub struct Shard {
    entries: DashMap<FeaId, ServerEntry>,
    new_w: AtomicI64,
    new_v: AtomicI64,
    algorithm: crate::config::UpdaterAlgorithm,
    scalar_params: ScalarParams,
    embedding: EmbeddingConfig,
}

impl Shard {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            new_w: AtomicI64::new(0),
            new_v: AtomicI64::new(0),
            algorithm: config.algorithm,
            scalar_params: ScalarParams {
                alpha: config.alpha,
                beta: config.beta,
                lambda1: config.lambda1,
                lambda2: config.lambda2,
            },
            embedding: config.embedding.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies a push-gradient RPC for one key. `grad` is `[g_w0]` or
    /// `[g_w0, g_v1, ..., g_vd]`, matching the pull layout that produced it.
    pub fn push_gradient(&self, key: FeaId, grad: &[f32]) -> Result<()> {
        if grad.iter().any(|g| g.is_nan()) {
            return Err(TrainerError::Numeric(format!(
                "NaN gradient pushed for key {key}"
            )));
        }
        let mut entry = self.entries.entry(key).or_insert_with(ServerEntry::fresh);
        match &mut *entry {
            ServerEntry::Scalar { w0, aux, .. } => {
                let delta = updater::push_scalar(self.algorithm, &self.scalar_params, w0, aux, grad[0]);
                self.new_w.fetch_add(delta, Ordering::Relaxed);
            }
            ServerEntry::Expanded {
                w0,
                aux,
                embedding,
                embedding_cg,
                ..
            } => {
                let delta = updater::push_scalar(self.algorithm, &self.scalar_params, w0, aux, grad[0]);
                self.new_w.fetch_add(delta, Ordering::Relaxed);
                if grad.len() > 1 {
                    updater::push_embedding(&self.embedding, embedding, embedding_cg, &grad[1..]);
                }
            }
        }
        Ok(())
    }

    /// Applies a push-count RPC for one key, possibly expanding it.
    pub fn push_count(&self, key: FeaId, count: u64, rng: &mut impl Rng) {
        let mut entry = self.entries.entry(key).or_insert_with(ServerEntry::fresh);
        let added = updater::push_count(&self.embedding, &mut entry, count, rng);
        if added > 0 {
            self.new_v.fetch_add(added as i64, Ordering::Relaxed);
        }
    }

    /// Pull response for one key: `[0.0]` for an absent key, matching "an
    /// empty scalar entry is indistinguishable from an absent key".
    pub fn pull(&self, key: FeaId) -> Vec<f32> {
        self.entries
            .get(&key)
            .map(|e| e.weights_for_pull())
            .unwrap_or_else(|| vec![0.0])
    }

    pub fn new_w(&self) -> i64 {
        self.new_w.load(Ordering::Relaxed)
    }

    pub fn new_v(&self) -> i64 {
        self.new_v.load(Ordering::Relaxed)
    }

    /// Folds this shard's sparsity counters into a progress delta.
    pub fn progress_delta(&self) -> Progress {
        Progress {
            nnz_w: self.new_w().max(0) as u64,
            nnz_v: self.new_v().max(0) as u64,
            ..Progress::zero()
        }
    }

    /// Writes every entry as a length-prefixed
    /// `(key, size, weights[size], aux_len, aux[aux_len], feature_count)`
    /// record, in undefined (DashMap iteration) order.
    pub fn snapshot_write(&self, writer: &mut impl Write) -> io::Result<()> {
        for item in self.entries.iter() {
            let (key, entry) = (item.key(), item.value());
            let (size, weights, aux, feature_count) = entry.snapshot_parts();
            writer.write_all(&key.to_le_bytes())?;
            writer.write_all(&size.to_le_bytes())?;
            for w in &weights {
                writer.write_all(&w.to_le_bytes())?;
            }
            writer.write_all(&(aux.len() as i32).to_le_bytes())?;
            for a in &aux {
                writer.write_all(&a.to_le_bytes())?;
            }
            writer.write_all(&feature_count.to_le_bytes())?;
        }
        Ok(())
    }

    /// Replaces this shard's entries with the contents of a snapshot stream
    /// written by `snapshot_write`.
    pub fn snapshot_load(&self, reader: &mut impl Read) -> Result<()> {
        self.entries.clear();
        self.new_w.store(0, Ordering::Relaxed);
        self.new_v.store(0, Ordering::Relaxed);

        let mut u64_buf = [0u8; 8];
        let mut i32_buf = [0u8; 4];
        loop {
            match reader.read_exact(&mut u64_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(TrainerError::Io(e)),
            }
            let key = u64::from_le_bytes(u64_buf);

            reader.read_exact(&mut i32_buf)?;
            let size = i32::from_le_bytes(i32_buf);
            if size < 1 {
                return Err(TrainerError::CapacityExceeded(format!(
                    "checkpoint entry for key {key} has illegal size {size}"
                )));
            }
            let mut weights = vec![0f32; size as usize];
            for w in weights.iter_mut() {
                let mut b = [0u8; 4];
                reader.read_exact(&mut b)?;
                *w = f32::from_le_bytes(b);
            }

            reader.read_exact(&mut i32_buf)?;
            let aux_len = i32::from_le_bytes(i32_buf) as usize;
            let mut aux = vec![0f32; aux_len];
            for a in aux.iter_mut() {
                let mut b = [0u8; 4];
                reader.read_exact(&mut b)?;
                *a = f32::from_le_bytes(b);
            }

            reader.read_exact(&mut u64_buf)?;
            let feature_count = u64::from_le_bytes(u64_buf);

            let entry = ServerEntry::from_snapshot_parts(size, &weights, &aux, feature_count);
            self.entries.insert(key, entry);
        }
        Ok(())
    }
}
