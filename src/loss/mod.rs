//! Loss kernels and the factorization-machine bilinear term.
//!
//! Three binary losses share one shape: a forward pass producing a summed
//! objective, and a backward pass producing a dual vector `p` of length
//! `num_rows` such that `grad_w = Xᵀp`. The bilinear interaction term is
//! layered on top via two SpMM calls (`kernels::spmm`), as the design note
//! directs: `A = XV` is kept around for reuse in the backward pass rather
//! than recomputed.

pub mod evaluation;

use crate::config::ObjectiveKind;
use crate::data::RowBlock;
use crate::error::{Result, TrainerError};
use crate::kernels::{spmm_times, spmm_trans_times_plus, spmv_times, spmv_trans_times};

pub trait Loss: Send + Sync {
    /// Summed objective over all rows, given the linear+bilinear score `s`
    /// and labels `y` (±1). Errs with `TrainerError::Numeric` if the
    /// objective is NaN (spec.md §7 kind-5: a NaN fault aborts rather than
    /// silently propagating).
    fn forward(&self, s: &[f32], y: &[f32]) -> Result<f64>;

    /// Dual vector `p`, one entry per row, feeding `grad_w = Xᵀp`.
    fn backward(&self, s: &[f32], y: &[f32]) -> Vec<f32>;

    /// Prediction-mode output (spec.md §4.3): the raw margin, or its
    /// sigmoid when probability output is requested. Shared across all
    /// three losses rather than overridden, matching the source's single
    /// loss-type-agnostic `ScalarLoss::Predict`.
    fn predict(&self, s: &[f32], probability: bool) -> Vec<f32> {
        if probability {
            s.iter().map(|&si| 1.0 / (1.0 + (-si).exp())).collect()
        } else {
            s.to_vec()
        }
    }
}

/// Rejects a NaN summed objective rather than letting it flow into the
/// server push as a silent corruption (spec.md §7 kind-5).
fn finite_objective(obj: f64) -> Result<f64> {
    if obj.is_nan() {
        Err(TrainerError::Numeric("NaN objective from loss forward pass".into()))
    } else {
        Ok(obj)
    }
}

pub struct Logistic;
pub struct SquaredHinge;
pub struct Squared;

impl Loss for Logistic {
    fn forward(&self, s: &[f32], y: &[f32]) -> Result<f64> {
        let obj: f64 = s
            .iter()
            .zip(y)
            .map(|(&si, &yi)| ((-(yi as f64) * si as f64).exp()).ln_1p())
            .sum();
        finite_objective(obj)
    }

    fn backward(&self, s: &[f32], y: &[f32]) -> Vec<f32> {
        s.iter()
            .zip(y)
            .map(|(&si, &yi)| -yi / (1.0 + (yi * si).exp()))
            .collect()
    }
}

impl Loss for SquaredHinge {
    fn forward(&self, s: &[f32], y: &[f32]) -> Result<f64> {
        let obj: f64 = s
            .iter()
            .zip(y)
            .map(|(&si, &yi)| {
                let margin = 1.0 - yi as f64 * si as f64;
                if margin > 0.0 {
                    margin * margin
                } else {
                    0.0
                }
            })
            .sum();
        finite_objective(obj)
    }

    fn backward(&self, s: &[f32], y: &[f32]) -> Vec<f32> {
        s.iter()
            .zip(y)
            .map(|(&si, &yi)| if yi * si > 1.0 { yi } else { 0.0 })
            .collect()
    }
}

impl Loss for Squared {
    fn forward(&self, s: &[f32], y: &[f32]) -> Result<f64> {
        let obj: f64 = s
            .iter()
            .zip(y)
            .map(|(&si, &yi)| {
                let d = (si - yi) as f64;
                0.5 * d * d
            })
            .sum();
        finite_objective(obj)
    }

    fn backward(&self, s: &[f32], y: &[f32]) -> Vec<f32> {
        s.iter().zip(y).map(|(&si, &yi)| si - yi).collect()
    }
}

pub fn make_loss(kind: ObjectiveKind) -> Box<dyn Loss> {
    match kind {
        ObjectiveKind::Logistic => Box::new(Logistic),
        ObjectiveKind::SquaredHinge => Box::new(SquaredHinge),
        ObjectiveKind::Squared => Box::new(Squared),
    }
}

/// Writes one prediction per row to `out`, one line per row (spec.md §4.3's
/// prediction output stream).
pub fn write_predictions(predictions: &[f32], out: &mut dyn std::io::Write) -> Result<()> {
    for p in predictions {
        writeln!(out, "{p}").map_err(TrainerError::Io)?;
    }
    Ok(())
}

/// Gradient post-processing applied to the embedding gradient only, per
/// spec.md §4.3 step 4.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradPostprocess {
    pub clip: Option<f32>,
    pub dropout_rate: Option<f32>,
    pub normalize: bool,
}

impl GradPostprocess {
    pub fn apply(&self, grad_v: &mut [f32], d: usize, rng: &mut impl rand::Rng) {
        if let Some(c) = self.clip {
            for v in grad_v.iter_mut() {
                *v = v.clamp(-c, c);
            }
        }
        if let Some(r) = self.dropout_rate {
            if r > 0.0 {
                for v in grad_v.iter_mut() {
                    if rng.gen::<f32>() < r {
                        *v = 0.0;
                    }
                }
            }
        }
        if self.normalize {
            for row in grad_v.chunks_mut(d) {
                let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in row.iter_mut() {
                        *v /= norm;
                    }
                }
            }
        }
    }
}

fn squared_values_block(block: &RowBlock<u32>) -> RowBlock<u32> {
    RowBlock {
        labels: block.labels.clone(),
        offsets: block.offsets.clone(),
        indices: block.indices.clone(),
        values: block
            .values
            .as_ref()
            .map(|vals| vals.iter().map(|v| v * v).collect()),
        weights: None,
    }
}

/// Forward pass result. `a = X V` is retained for the backward pass; it is
/// `None` when no column in this minibatch carries an embedding.
pub struct FmForward {
    pub s: Vec<f32>,
    pub a: Option<Vec<f32>>,
}

/// `s = Xw`, plus, when `v` is given, the FM pairwise-interaction term
/// `½ Σⱼ (Aᵢⱼ² − Bᵢⱼ)` where `A = XV`, `B = (X⊙X)(V⊙V)`.
pub fn fm_forward(
    block: &RowBlock<u32>,
    w: &[f32],
    v: Option<(&[f32], usize)>,
    pool: &rayon::ThreadPool,
) -> Result<FmForward> {
    let mut s = spmv_times(block, w, pool);

    let a = match v {
        None => None,
        Some((v, d)) => {
            let a = spmm_times(block, v, d, pool);
            let v_sq: Vec<f32> = v.iter().map(|x| x * x).collect();
            let sq_block = squared_values_block(block);
            let b = spmm_times(&sq_block, &v_sq, d, pool);

            for (i, si) in s.iter_mut().enumerate() {
                let mut interaction = 0.0f32;
                for c in 0..d {
                    let aij = a[i * d + c];
                    let bij = b[i * d + c];
                    interaction += aij * aij - bij;
                }
                *si += 0.5 * interaction;
                if si.is_nan() {
                    return Err(TrainerError::Numeric(format!(
                        "NaN score at row {i} after FM interaction term"
                    )));
                }
            }
            Some(a)
        }
    };

    Ok(FmForward { s, a })
}

pub struct FmBackward {
    pub grad_w: Vec<f32>,
    pub grad_v: Option<Vec<f32>>,
}

/// `grad_w = Xᵀp`; when embeddings are present,
/// `grad_V = Xᵀ(diag(p)·X·V) − diag((X⊙X)ᵀp)·V`.
pub fn fm_backward(
    block: &RowBlock<u32>,
    p: &[f32],
    v: Option<(&[f32], usize)>,
    u: usize,
    pool: &rayon::ThreadPool,
) -> FmBackward {
    let grad_w = spmv_trans_times(block, p, u, pool);

    let grad_v = v.map(|(v, d)| {
        let a = spmm_times(block, v, d, pool);
        let scaled_a: Vec<f32> = a
            .chunks(d)
            .zip(p.iter())
            .flat_map(|(row, &pi)| row.iter().map(move |&x| x * pi))
            .collect();
        let zero_z = vec![0f32; u * d];
        let term1 = spmm_trans_times_plus(block, &scaled_a, 0.0, &zero_z, u, d, pool);

        let sq_block = squared_values_block(block);
        let c = spmv_trans_times(&sq_block, p, u, pool);
        let mut grad = term1;
        for j in 0..u {
            let cj = c[j];
            for k in 0..d {
                grad[j * d + k] -= cj * v[j * d + k];
            }
        }
        grad
    });

    FmBackward { grad_w, grad_v }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Row;
    use crate::localize::{localize, make_pool, KeyTransform};

    #[test]
    fn scenario_forward_pass_no_embeddings() {
        // spec.md §8 scenario 6
        let rows = vec![Row::new(1.0, vec![0, 1])];
        let block = RowBlock::from_rows(&rows);
        let pool = make_pool(1).unwrap();
        let (local, _) = localize(&block, KeyTransform::Verbatim, &pool).unwrap();
        let w = vec![0.3, -0.2];
        let fwd = fm_forward(&local.block, &w, None, &pool).unwrap();
        assert!((fwd.s[0] - 0.1).abs() < 1e-6);

        let loss = Logistic;
        let y = vec![1.0f32];
        let obj = loss.forward(&fwd.s, &y).unwrap();
        assert!((obj - 0.6444).abs() < 1e-3);
    }

    #[test]
    fn logistic_gradient_sign_matches_single_example_case() {
        // spec.md §8 law: positive example, one feature value 1, zero weight
        let rows = vec![Row::new(1.0, vec![0])];
        let block = RowBlock::from_rows(&rows);
        let pool = make_pool(1).unwrap();
        let (local, _) = localize(&block, KeyTransform::Verbatim, &pool).unwrap();
        let w = vec![0.0];
        let fwd = fm_forward(&local.block, &w, None, &pool).unwrap();
        let loss = Logistic;
        let y = vec![1.0f32];
        let p = loss.backward(&fwd.s, &y);
        let bwd = fm_backward(&local.block, &p, None, 1, &pool);
        assert!((bwd.grad_w[0] - (-0.5)).abs() < 1e-6);
    }

    #[test]
    fn forward_rejects_nan_objective() {
        let loss = Logistic;
        let s = vec![f32::NAN];
        let y = vec![1.0f32];
        assert!(loss.forward(&s, &y).is_err());
    }

    #[test]
    fn predict_reports_raw_margin_or_sigmoid() {
        let loss = Logistic;
        let s = vec![0.0f32, 2.0];
        assert_eq!(loss.predict(&s, false), vec![0.0, 2.0]);
        let probs = loss.predict(&s, true);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!(probs[1] > 0.5);
    }
}
