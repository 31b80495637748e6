//! Sparse-matrix × dense-matrix kernels. Dense matrices are flat row-major
//! `&[f32]` slices of `rows * d`.

use crate::data::RowBlock;

/// `Y = D X`: `X` is `u x d` (one row per unique column of `D`), `Y` is
/// `n x d`. Partitioned by output row, same as `spmv_times`.
pub fn spmm_times(block: &RowBlock<u32>, x: &[f32], d: usize, pool: &rayon::ThreadPool) -> Vec<f32> {
    use rayon::prelude::*;

    let mut y = vec![0f32; block.num_rows() * d];
    pool.install(|| {
        y.par_chunks_mut(d).enumerate().for_each(|(i, y_row)| {
            let idxs = block.row(i);
            match block.row_values(i) {
                Some(vals) => {
                    for (&k, &v) in idxs.iter().zip(vals) {
                        let x_row = &x[k as usize * d..k as usize * d + d];
                        for c in 0..d {
                            y_row[c] += v * x_row[c];
                        }
                    }
                }
                None => {
                    for &k in idxs {
                        let x_row = &x[k as usize * d..k as usize * d + d];
                        for c in 0..d {
                            y_row[c] += x_row[c];
                        }
                    }
                }
            }
        });
    });
    y
}

/// `Y = p·Z + Dᵀ X`: `X` is `n x d`, `Z` and the result are `u x d`. Each
/// thread owns a disjoint destination row range and scans the shared row
/// block, as in `spmv_trans_times`.
pub fn spmm_trans_times_plus(
    block: &RowBlock<u32>,
    x: &[f32],
    p: f32,
    z: &[f32],
    u: usize,
    d: usize,
    pool: &rayon::ThreadPool,
) -> Vec<f32> {
    use rayon::prelude::*;

    debug_assert_eq!(z.len(), u * d);
    let num_threads = pool.current_num_threads().max(1);
    let row_chunk = u.div_ceil(num_threads).max(1);

    let mut y: Vec<f32> = z.iter().map(|&zv| p * zv).collect();
    pool.install(|| {
        y.par_chunks_mut(row_chunk * d).enumerate().for_each(|(t, y_chunk)| {
            let lo = t * row_chunk;
            let rows_here = y_chunk.len() / d;
            let hi = lo + rows_here;
            for i in 0..block.num_rows() {
                let x_row = &x[i * d..i * d + d];
                let idxs = block.row(i);
                match block.row_values(i) {
                    Some(vals) => {
                        for (&k, &v) in idxs.iter().zip(vals) {
                            let k = k as usize;
                            if k >= lo && k < hi {
                                let out = &mut y_chunk[(k - lo) * d..(k - lo) * d + d];
                                for c in 0..d {
                                    out[c] += v * x_row[c];
                                }
                            }
                        }
                    }
                    None => {
                        for &k in idxs {
                            let k = k as usize;
                            if k >= lo && k < hi {
                                let out = &mut y_chunk[(k - lo) * d..(k - lo) * d + d];
                                for c in 0..d {
                                    out[c] += x_row[c];
                                }
                            }
                        }
                    }
                }
            }
        });
    });
    y
}
