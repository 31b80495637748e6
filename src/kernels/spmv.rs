//! Sparse-matrix × dense-vector kernels over a localized row block. Values
//! of `None` are treated as an implicit 1 for every nonzero.

use crate::data::RowBlock;

/// `y = D x`: one output per row, partitioned by source row so every thread
/// writes a disjoint output.
pub fn spmv_times(block: &RowBlock<u32>, x: &[f32], pool: &rayon::ThreadPool) -> Vec<f32> {
    use rayon::prelude::*;

    let mut y = vec![0f32; block.num_rows()];
    pool.install(|| {
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let idxs = block.row(i);
            *yi = match block.row_values(i) {
                Some(vals) => idxs
                    .iter()
                    .zip(vals)
                    .map(|(&k, &v)| x[k as usize] * v)
                    .sum(),
                None => idxs.iter().map(|&k| x[k as usize]).sum(),
            };
        });
    });
    y
}

/// `y = Dᵀ x`: one output per unique column (`u` entries). Each thread owns
/// a disjoint destination range and scans the whole (shared) row block,
/// keeping only contributions that fall inside its own range; this avoids
/// any lock on the accumulator at the cost of a full scan per thread.
pub fn spmv_trans_times(block: &RowBlock<u32>, x: &[f32], u: usize, pool: &rayon::ThreadPool) -> Vec<f32> {
    use rayon::prelude::*;

    let num_threads = pool.current_num_threads().max(1);
    let chunk = u.div_ceil(num_threads).max(1);
    let mut y = vec![0f32; u];

    pool.install(|| {
        y.par_chunks_mut(chunk).enumerate().for_each(|(t, y_chunk)| {
            let lo = t * chunk;
            let hi = lo + y_chunk.len();
            for i in 0..block.num_rows() {
                let xi = x[i];
                let idxs = block.row(i);
                match block.row_values(i) {
                    Some(vals) => {
                        for (&k, &v) in idxs.iter().zip(vals) {
                            let k = k as usize;
                            if k >= lo && k < hi {
                                y_chunk[k - lo] += xi * v;
                            }
                        }
                    }
                    None => {
                        for &k in idxs {
                            let k = k as usize;
                            if k >= lo && k < hi {
                                y_chunk[k - lo] += xi;
                            }
                        }
                    }
                }
            }
        });
    });
    y
}
