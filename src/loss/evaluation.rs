//! Folds per-row prediction/label pairs into a `Progress` delta: AUC (via
//! rank sum), accuracy at a 0.5 probability threshold, and log-loss.

use ordered_float::OrderedFloat;

use crate::progress::Progress;

fn sigmoid(s: f32) -> f32 {
    1.0 / (1.0 + (-s).exp())
}

/// Evaluates one minibatch's scores against its labels (±1) and returns the
/// additive `Progress` contribution; merge this into the running total with
/// `Progress::merge`.
pub fn evaluate(scores: &[f32], labels: &[f32], objective: f64) -> Progress {
    assert_eq!(scores.len(), labels.len());
    let n = scores.len();

    let mut ranked: Vec<(OrderedFloat<f32>, bool)> = scores
        .iter()
        .zip(labels)
        .map(|(&s, &y)| (OrderedFloat(s), y > 0.0))
        .collect();
    ranked.sort_by_key(|&(s, _)| s);

    let mut rank_sum_positive = 0.0f64;
    let mut positive_count = 0u64;
    let mut negative_count = 0u64;
    for (rank, &(_, is_positive)) in ranked.iter().enumerate() {
        if is_positive {
            rank_sum_positive += (rank + 1) as f64;
            positive_count += 1;
        } else {
            negative_count += 1;
        }
    }
    let auc_numerator = if positive_count > 0 {
        rank_sum_positive - (positive_count * (positive_count + 1)) as f64 / 2.0
    } else {
        0.0
    };

    let mut accuracy_numerator = 0.0f64;
    let mut logloss = 0.0f64;
    for (&s, &y) in scores.iter().zip(labels) {
        let prob = sigmoid(s) as f64;
        let predicted_positive = prob >= 0.5;
        if predicted_positive == (y > 0.0) {
            accuracy_numerator += 1.0;
        }
        let p_true = if y > 0.0 { prob } else { 1.0 - prob };
        logloss -= p_true.max(1e-12).ln();
    }

    Progress {
        examples: n as u64,
        nnz_w: 0,
        nnz_v: 0,
        positive_count,
        negative_count,
        objective,
        auc_numerator,
        logloss,
        accuracy_numerator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_separation_gives_auc_one() {
        let scores = vec![-2.0, -1.0, 1.0, 2.0];
        let labels = vec![-1.0, -1.0, 1.0, 1.0];
        let progress = evaluate(&scores, &labels, 0.0);
        assert_eq!(progress.auc(), Some(1.0));
        assert_eq!(progress.accuracy(), Some(1.0));
    }

    #[test]
    fn inverted_ranking_gives_auc_zero() {
        let scores = vec![2.0, 1.0, -1.0, -2.0];
        let labels = vec![-1.0, -1.0, 1.0, 1.0];
        let progress = evaluate(&scores, &labels, 0.0);
        assert_eq!(progress.auc(), Some(0.0));
    }
}
