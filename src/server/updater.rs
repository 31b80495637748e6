//! Per-key online update rules: FTRL-Proximal, AdaGrad and plain SGD for the
//! scalar coordinate (spec.md §4.4.1), the expansion gate (§4.4.2), and the
//! independent AdaGrad embedding-coordinate update (§4.4.3).

use rand::Rng;

use crate::config::{EmbeddingConfig, UpdaterAlgorithm};
use crate::server::entry::{ScalarAux, ServerEntry};

#[derive(Debug, Clone, Copy)]
pub struct ScalarParams {
    pub alpha: f32,
    pub beta: f32,
    pub lambda1: f32,
    pub lambda2: f32,
}

/// `+1` / `-1` / `0` for the `new_w` sparsity counter: a transition across
/// zero in either direction, or no transition.
pub type NewWDelta = i64;

fn transition_delta(was_zero: bool, is_zero: bool) -> NewWDelta {
    match (was_zero, is_zero) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    }
}

/// FTRL's proximal soft-threshold on the dual accumulator `z`.
fn ftrl_prox(z: f32, scale: f32, lambda1: f32, lambda2: f32) -> f32 {
    if z.abs() <= lambda1 {
        0.0
    } else {
        -(z - z.signum() * lambda1) / (scale + lambda2)
    }
}

/// The soft-threshold used by AdaGrad and plain SGD, applied directly to a
/// scaled gradient-step point rather than a dual accumulator; same shape,
/// opposite sign convention from `ftrl_prox`.
fn grad_step_prox(z: f32, scale: f32, lambda1: f32, lambda2: f32) -> f32 {
    if z.abs() <= lambda1 {
        0.0
    } else {
        z.signum() * (z.abs() - lambda1) / (scale + lambda2)
    }
}

/// Applies one scalar-coordinate push. Returns the `new_w` delta to fold
/// into the shard's sparsity counter.
pub fn push_scalar(algorithm: UpdaterAlgorithm, params: &ScalarParams, w0: &mut f32, aux: &mut ScalarAux, g: f32) -> NewWDelta {
    let was_zero = *w0 == 0.0;
    let w_new = match algorithm {
        UpdaterAlgorithm::Ftrl => {
            let cg_old = aux.cg;
            let cg_new = (cg_old * cg_old + g * g).sqrt();
            let z_new = aux.z_or_t + g - (cg_new - cg_old) / params.alpha * *w0;
            let eta = (params.beta + cg_new) / params.alpha;
            aux.cg = cg_new;
            aux.z_or_t = z_new;
            ftrl_prox(z_new, eta, params.lambda1, params.lambda2)
        }
        UpdaterAlgorithm::AdaGrad => {
            let cg_old = aux.cg;
            let cg_new = (cg_old * cg_old + g * g).sqrt();
            let eta = (cg_new + params.beta) / params.alpha;
            aux.cg = cg_new;
            grad_step_prox(eta * *w0 - g, eta, params.lambda1, params.lambda2)
        }
        UpdaterAlgorithm::Sgd => {
            let t = aux.z_or_t + 1.0;
            let eta = (params.beta + t.sqrt()) / params.alpha;
            aux.z_or_t = t;
            grad_step_prox(eta * *w0 - g, eta, params.lambda1, params.lambda2)
        }
    };
    let is_zero = w_new == 0.0;
    *w0 = w_new;
    transition_delta(was_zero, is_zero)
}

/// Independent AdaGrad update for each embedding coordinate (spec.md
/// §4.4.3); `alpha`, `beta`, `lambda2` come from `EmbeddingConfig` and may
/// differ from the scalar updater's hyperparameters.
pub fn push_embedding(cfg: &EmbeddingConfig, embedding: &mut [f32], embedding_cg: &mut [f32], grad: &[f32]) {
    for ((w, cg), &g) in embedding.iter_mut().zip(embedding_cg.iter_mut()).zip(grad) {
        let adjusted = g + cfg.lambda2 * *w;
        let cg_new = (*cg * *cg + adjusted * adjusted).sqrt();
        let eta = cfg.alpha / (cg_new + cfg.beta);
        *cg = cg_new;
        *w -= eta * adjusted;
    }
}

/// Applies a push-count message: accumulates `feature_count` and, if the
/// expansion gate opens, grows the entry from scalar to scalar+embedding in
/// place. Returns the embedding dimension added to `new_V` if expansion
/// happened this call (0 otherwise). Idempotent once already expanded.
pub fn push_count(cfg: &EmbeddingConfig, entry: &mut ServerEntry, count: u64, rng: &mut impl Rng) -> u64 {
    match entry {
        ServerEntry::Expanded { feature_count, .. } => {
            *feature_count += count;
            0
        }
        ServerEntry::Scalar {
            w0,
            aux,
            feature_count,
        } => {
            *feature_count += count;
            let gate_open = !cfg.l1_shrinkage_gate || *w0 != 0.0;
            if cfg.enabled() && *feature_count >= cfg.threshold && gate_open {
                let d = cfg.dim;
                let mut embedding = Vec::with_capacity(d);
                for _ in 0..d {
                    embedding.push(rng.gen_range(-cfg.init_scale..=cfg.init_scale));
                }
                *entry = ServerEntry::Expanded {
                    w0: *w0,
                    embedding: embedding.into_boxed_slice(),
                    aux: *aux,
                    embedding_cg: vec![0.0; d].into_boxed_slice(),
                    feature_count: *feature_count,
                };
                d as u64
            } else {
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ftrl_params() -> ScalarParams {
        ScalarParams {
            alpha: 0.1,
            beta: 1.0,
            lambda1: 1.0,
            lambda2: 0.0,
        }
    }

    #[test]
    fn scenario_ftrl_push_above_threshold() {
        let mut w0 = 0.0f32;
        let mut aux = ScalarAux::default();
        let delta = push_scalar(UpdaterAlgorithm::Ftrl, &ftrl_params(), &mut w0, &mut aux, 2.0);
        assert!((aux.cg - 2.0).abs() < 1e-6);
        assert!((aux.z_or_t - 2.0).abs() < 1e-6);
        assert!((w0 - (-1.0 / 30.0)).abs() < 1e-5);
        assert_eq!(delta, 1);
    }

    #[test]
    fn scenario_ftrl_push_below_threshold_stays_zero() {
        let mut w0 = 0.0f32;
        let mut aux = ScalarAux::default();
        let delta = push_scalar(UpdaterAlgorithm::Ftrl, &ftrl_params(), &mut w0, &mut aux, 0.5);
        assert!((aux.cg - 0.5).abs() < 1e-6);
        assert_eq!(w0, 0.0);
        assert_eq!(delta, 0);
    }

    #[test]
    fn scenario_adagrad_two_pushes() {
        let params = ScalarParams {
            alpha: 0.1,
            beta: 1.0,
            lambda1: 0.0,
            lambda2: 0.0,
        };
        let mut w0 = 0.0f32;
        let mut aux = ScalarAux::default();
        push_scalar(UpdaterAlgorithm::AdaGrad, &params, &mut w0, &mut aux, 1.0);
        assert!((w0 - (-0.05)).abs() < 1e-5);
        push_scalar(UpdaterAlgorithm::AdaGrad, &params, &mut w0, &mut aux, 1.0);
        assert!((w0 - (-0.09142)).abs() < 1e-4);
    }

    #[test]
    fn scenario_expansion_gate() {
        let cfg = EmbeddingConfig {
            dim: 4,
            threshold: 5,
            init_scale: 0.01,
            alpha: 0.01,
            beta: 1.0,
            lambda2: 0.0,
            l1_shrinkage_gate: true,
        };
        let mut entry = ServerEntry::fresh();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let added = push_count(&cfg, &mut entry, 7, &mut rng);
        assert_eq!(added, 4);
        assert_eq!(entry.size(), 5);
        match &entry {
            ServerEntry::Expanded { w0, embedding, .. } => {
                assert_eq!(*w0, 0.0);
                for &v in embedding.iter() {
                    assert!((-0.01..=0.01).contains(&v));
                }
            }
            _ => panic!("expected expansion"),
        }
    }

    #[test]
    fn expansion_gated_off_when_w0_is_zero_and_gate_enabled() {
        let cfg = EmbeddingConfig {
            dim: 2,
            threshold: 1,
            init_scale: 0.01,
            alpha: 0.01,
            beta: 1.0,
            lambda2: 0.0,
            l1_shrinkage_gate: true,
        };
        let mut entry = ServerEntry::fresh();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let added = push_count(&cfg, &mut entry, 10, &mut rng);
        assert_eq!(added, 0);
        assert_eq!(entry.size(), 1);
    }

    #[test]
    fn expansion_is_idempotent() {
        let cfg = EmbeddingConfig {
            dim: 2,
            threshold: 1,
            init_scale: 0.01,
            alpha: 0.01,
            beta: 1.0,
            lambda2: 0.0,
            l1_shrinkage_gate: false,
        };
        let mut entry = ServerEntry::fresh();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        push_count(&cfg, &mut entry, 5, &mut rng);
        let weights_before = entry.weights_for_pull();
        let added_again = push_count(&cfg, &mut entry, 3, &mut rng);
        assert_eq!(added_again, 0);
        assert_eq!(entry.weights_for_pull(), weights_before);
    }
}
