use serde::{Deserialize, Serialize};

use super::calibration::sigmoid;
use super::WinModel;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy)]
pub struct LogisticParams {
    pub max_iters: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            learning_rate: 0.1,
            l2: 1e-3,
        }
    }
}

/// L2-regularised logistic regression over standardized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        feature_names: &[&str],
        params: LogisticParams,
    ) -> Result<Self, PipelineError> {
        let dim = feature_names.len();
        if x.is_empty() || x.len() != y.len() {
            return Err(PipelineError::InsufficientData(format!(
                "{} feature rows for {} outcomes",
                x.len(),
                y.len()
            )));
        }
        if let Some(bad) = x.iter().position(|row| row.len() != dim) {
            return Err(PipelineError::InsufficientData(format!(
                "row {bad} has {} features, expected {dim}",
                x[bad].len()
            )));
        }

        let n = x.len() as f64;
        let mut means = vec![0.0; dim];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scales = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = s.sqrt();
            if *s < 1e-12 {
                *s = 1.0;
            }
        }

        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| row.iter().zip(&means).zip(&scales).map(|((v, m), s)| (v - m) / s).collect())
            .collect();

        let mut w = vec![0.0; dim];
        let mut b = 0.0;
        for i in 0..params.max_iters.max(1) {
            let lr = params.learning_rate / (1.0 + 0.001 * i as f64);
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, target) in z.iter().zip(y) {
                let err = sigmoid(dot(&w, row) + b) - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (wj, g) in w.iter_mut().zip(&grad_w) {
                *wj -= lr * (g / n + params.l2 * *wj);
            }
            b -= lr * grad_b / n;
            if !b.is_finite() || w.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::InsufficientData(format!(
                    "logistic fit diverged at iteration {i}"
                )));
            }
        }

        Ok(Self {
            feature_names: feature_names.iter().map(|s| s.to_string()).collect(),
            means,
            scales,
            weights: w,
            intercept: b,
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl WinModel for LogisticModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let z: f64 = features
            .iter()
            .zip(&self.means)
            .zip(&self.scales)
            .zip(&self.weights)
            .map(|(((v, m), s), w)| w * (v - m) / s)
            .sum();
        sigmoid(z + self.intercept)
    }
}
