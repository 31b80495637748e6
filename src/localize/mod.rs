//! Feature localizer: renumbers a minibatch's arbitrary 64-bit feature IDs
//! into the contiguous range `[0, U)`, where `U` is the number of unique IDs
//! observed in that minibatch, via a multithreaded sort over `(key, position)`
//! pairs.

use crate::data::{FeaId, LocalRowBlock, RowBlock};
use crate::error::{Result, TrainerError};

/// How a raw feature ID is transformed into the key the sort and the
/// uniqueness test operate on. `HashMod` is the feature-hashing trick: it
/// deliberately collapses the key space, so the dictionary stores the
/// post-hash key, not the original ID.
#[derive(Debug, Clone, Copy)]
pub enum KeyTransform {
    Verbatim,
    ByteReversed,
    HashMod(u64),
}

impl KeyTransform {
    pub fn apply(self, k: FeaId) -> u64 {
        match self {
            KeyTransform::Verbatim => k,
            KeyTransform::ByteReversed => reverse_bytes(k),
            KeyTransform::HashMod(max_key) => {
                if max_key == 0 {
                    k
                } else {
                    k % max_key
                }
            }
        }
    }
}

/// Bit-for-bit byte reversal of a 64-bit value, used to spread related IDs
/// (which tend to share low bits) uniformly across shards.
pub fn reverse_bytes(k: u64) -> u64 {
    k.swap_bytes()
}

/// Minimum records a single parallel-sort task is allowed to own, per the
/// divide-and-merge grain size this pipeline is specified against. rayon's
/// sort does not expose a configurable split threshold, so this constant is
/// documentation rather than a tunable passed into the call below.
#[allow(dead_code)]
const SORT_GRAIN: usize = 16 * 1024;

/// Localizes one minibatch's row block. Returns the remapped block plus, for
/// each unique feature in `dictionary` order, the number of occurrences in
/// this minibatch (saturating at `u32::MAX`).
pub fn localize(
    block: &RowBlock<FeaId>,
    transform: KeyTransform,
    pool: &rayon::ThreadPool,
) -> Result<(LocalRowBlock, Vec<u32>)> {
    use rayon::prelude::*;

    let nnz = block.indices.len();
    if nnz > u32::MAX as usize {
        return Err(TrainerError::CapacityExceeded(format!(
            "minibatch has {nnz} nonzeros, exceeds 32-bit position capacity"
        )));
    }

    if block.is_empty() {
        return Ok((
            LocalRowBlock {
                block: RowBlock {
                    labels: Vec::new(),
                    offsets: vec![0],
                    indices: Vec::new(),
                    values: None,
                    weights: None,
                },
                dictionary: Vec::new(),
            },
            Vec::new(),
        ));
    }

    // (transformed key, original position) pairs.
    let mut records: Vec<(u64, u32)> = pool.install(|| {
        block
            .indices
            .par_iter()
            .enumerate()
            .map(|(j, &k)| (transform.apply(k), j as u32))
            .collect()
    });

    // rayon's parallel sort picks its own split threshold; SORT_GRAIN
    // documents the minimum grain this pipeline relies on rather than one
    // this call configures directly.
    pool.install(|| {
        records.par_sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    });

    // A single ordered scan over the sorted records yields both the unique
    // dictionary and, directly, the per-position remap (no separate
    // two-finger merge pass is needed because positions sharing a key are
    // already adjacent after the sort).
    let mut dictionary = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    let mut remap = vec![0u32; nnz];

    let mut iter = records.iter();
    if let Some(&(first_key, first_pos)) = iter.next() {
        dictionary.push(first_key);
        counts.push(1);
        remap[first_pos as usize] = 1;
        for &(key, pos) in iter {
            if key != *dictionary.last().unwrap() {
                dictionary.push(key);
                counts.push(0);
            }
            let c = counts.last_mut().unwrap();
            *c = c.saturating_add(1);
            remap[pos as usize] = dictionary.len() as u32;
        }
    }

    let mut new_indices = Vec::with_capacity(nnz);
    for &r in &remap {
        new_indices.push(r - 1);
    }

    let local = LocalRowBlock {
        block: RowBlock {
            labels: block.labels.clone(),
            offsets: block.offsets.clone(),
            indices: new_indices,
            values: block.values.clone(),
            weights: block.weights.clone(),
        },
        dictionary,
    };

    Ok((local, counts))
}

pub fn make_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build()
        .map_err(|e| TrainerError::Configuration(format!("failed to build kernel thread pool: {e}")))
}
