//! Scoring rules for probability forecasts against 0/1 outcomes.

use super::calibration::clamp_prob;

pub fn brier(pred: &[f64], y: &[f64]) -> f64 {
    if pred.is_empty() {
        return 0.0;
    }
    pred.iter().zip(y).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / pred.len() as f64
}

pub fn log_loss(pred: &[f64], y: &[f64]) -> f64 {
    if pred.is_empty() {
        return 0.0;
    }
    pred.iter()
        .zip(y)
        .map(|(p, y)| {
            let p = clamp_prob(*p);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / pred.len() as f64
}

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// given their average rank. `None` when only one class is present.
pub fn roc_auc(pred: &[f64], y: &[f64]) -> Option<f64> {
    let n_pos = y.iter().filter(|v| **v > 0.5).count();
    let n_neg = y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..pred.len()).collect();
    order.sort_by(|&a, &b| pred[a].total_cmp(&pred[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && pred[order[j + 1]] == pred[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if y[k] > 0.5 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}
