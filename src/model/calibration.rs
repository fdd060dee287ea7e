/// Probability calibration: isotonic regression (pool-adjacent-violators)
/// and Platt scaling `p_calibrated = sigmoid(a * logit(p_raw) + b)`.
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::ProbabilityCalibrator;

pub(crate) const EPS: f64 = 1e-6;

pub(crate) fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

pub(crate) fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMethod {
    #[default]
    Isotonic,
    Platt,
}

// ── Platt ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibration {
    pub a: f64,
    pub b: f64,
}

pub fn apply_platt(raw_prob: f64, model: PlattCalibration) -> f64 {
    let x = logit(raw_prob);
    sigmoid(model.a * x + model.b).clamp(0.0, 1.0)
}

/// Fit Platt parameters by gradient descent on log loss. Needs at least 8
/// samples with both outcomes present.
pub fn fit_platt(samples: &[(f64, f64)], max_iters: usize, learning_rate: f64, l2: f64) -> Option<PlattCalibration> {
    if samples.len() < 8 {
        return None;
    }
    let positives = samples.iter().filter(|(_, y)| *y > 0.5).count();
    if positives == 0 || positives == samples.len() {
        return None;
    }

    let n = samples.len() as f64;
    let mut a = 1.0f64;
    let mut b = 0.0f64;

    for i in 0..max_iters.max(1) {
        let lr = learning_rate / (1.0 + 0.01 * i as f64);
        let mut grad_a = 0.0;
        let mut grad_b = 0.0;
        for (raw_p, y) in samples {
            let x = logit(*raw_p);
            let err = sigmoid(a * x + b) - *y;
            grad_a += err * x;
            grad_b += err;
        }
        grad_a = grad_a / n + l2 * a;
        grad_b /= n;
        a -= lr * grad_a;
        b -= lr * grad_b;
        if !a.is_finite() || !b.is_finite() {
            return None;
        }
    }
    Some(PlattCalibration { a, b })
}

// ── Isotonic ────────────────────────────────────────────────────────────────

/// Monotone piecewise-linear map from raw to calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibration {
    /// Raw-probability knots, non-decreasing
    pub x: Vec<f64>,
    /// Calibrated value at each knot, non-decreasing
    pub y: Vec<f64>,
}

struct Block {
    lo: f64,
    hi: f64,
    sum: f64,
    n: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.n
    }
}

impl IsotonicCalibration {
    /// Pool adjacent violators over samples sorted by raw probability.
    pub fn fit(samples: &[(f64, f64)]) -> Option<Self> {
        let mut pts: Vec<(f64, f64)> = samples.iter().copied().filter(|(x, y)| x.is_finite() && y.is_finite()).collect();
        if pts.is_empty() {
            return None;
        }
        pts.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut blocks: Vec<Block> = Vec::with_capacity(pts.len());
        for (x, y) in pts {
            blocks.push(Block { lo: x, hi: x, sum: y, n: 1.0 });
            while blocks.len() >= 2 {
                let last = &blocks[blocks.len() - 1];
                let prev = &blocks[blocks.len() - 2];
                // equal raw values always share a level
                if prev.mean() < last.mean() && prev.hi < last.lo {
                    break;
                }
                if let Some(last) = blocks.pop() {
                    if let Some(prev) = blocks.last_mut() {
                        prev.hi = last.hi;
                        prev.sum += last.sum;
                        prev.n += last.n;
                    }
                }
            }
        }

        let mut x = Vec::with_capacity(blocks.len() * 2);
        let mut y = Vec::with_capacity(blocks.len() * 2);
        for b in &blocks {
            let level = b.mean();
            x.push(b.lo);
            y.push(level);
            if b.hi > b.lo {
                x.push(b.hi);
                y.push(level);
            }
        }
        Some(Self { x, y })
    }

    /// Interpolate between knots; values outside the fitted range clip to
    /// the nearest end.
    pub fn apply(&self, raw: f64) -> f64 {
        let (Some(&first_x), Some(&last_x)) = (self.x.first(), self.x.last()) else {
            return raw;
        };
        if raw <= first_x {
            return self.y[0];
        }
        if raw >= last_x {
            return self.y[self.y.len() - 1];
        }
        let i = self.x.partition_point(|&k| k <= raw);
        let (x0, x1) = (self.x[i - 1], self.x[i]);
        let (y0, y1) = (self.y[i - 1], self.y[i]);
        if x1 <= x0 {
            return y1;
        }
        y0 + (y1 - y0) * (raw - x0) / (x1 - x0)
    }
}

// ── Persisted form ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CalibratorArtifact {
    Isotonic(IsotonicCalibration),
    Platt(PlattCalibration),
    /// Pass-through used when a calibrator could not be fitted
    Identity,
}

impl CalibratorArtifact {
    pub fn fit(method: CalibrationMethod, samples: &[(f64, f64)]) -> Self {
        let fitted = match method {
            CalibrationMethod::Isotonic => IsotonicCalibration::fit(samples).map(CalibratorArtifact::Isotonic),
            CalibrationMethod::Platt => fit_platt(samples, 500, 0.2, 1e-3).map(CalibratorArtifact::Platt),
        };
        fitted.unwrap_or(CalibratorArtifact::Identity)
    }
}

impl ProbabilityCalibrator for CalibratorArtifact {
    fn calibrate(&self, raw: f64) -> f64 {
        let p = match self {
            CalibratorArtifact::Isotonic(iso) => iso.apply(raw),
            CalibratorArtifact::Platt(platt) => apply_platt(raw, *platt),
            CalibratorArtifact::Identity => raw,
        };
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metrics::log_loss;
    use approx::assert_relative_eq;

    fn overconfident() -> Vec<(f64, f64)> {
        let mut samples = Vec::new();
        for i in 1..100 {
            let p_true = i as f64 / 100.0;
            let p_raw = ((p_true - 0.5) * 1.8 + 0.5).clamp(0.01, 0.99);
            let y = if p_true > 0.65 {
                1.0
            } else if p_true < 0.35 {
                0.0
            } else {
                (i % 2) as f64
            };
            samples.push((p_raw, y));
        }
        samples
    }

    #[test]
    fn platt_fit_improves_distorted_synthetic_probabilities() {
        let samples = overconfident();
        let fit = fit_platt(&samples, 500, 0.2, 1e-3).unwrap();
        let (raw, y): (Vec<f64>, Vec<f64>) = samples.iter().copied().unzip();
        let after: Vec<f64> = raw.iter().map(|p| apply_platt(*p, fit)).collect();
        assert!(log_loss(&after, &y) < log_loss(&raw, &y));
    }

    #[test]
    fn apply_platt_bounds_output() {
        let m = PlattCalibration { a: 1.2, b: -0.1 };
        let p = apply_platt(0.999_999, m);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn isotonic_pools_violators() {
        let samples = [(0.1, 0.0), (0.2, 1.0), (0.3, 0.0), (0.4, 1.0), (0.5, 1.0)];
        let iso = IsotonicCalibration::fit(&samples).unwrap();
        assert!(iso.y.windows(2).all(|w| w[0] <= w[1]));
        // 0.2 and 0.3 pool to 0.5
        assert_relative_eq!(iso.apply(0.25), 0.5);
        assert_relative_eq!(iso.apply(0.0), 0.0);
        assert_relative_eq!(iso.apply(0.9), 1.0);
    }

    #[test]
    fn isotonic_output_is_monotone() {
        let iso = IsotonicCalibration::fit(&overconfident()).unwrap();
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=100 {
            let p = iso.apply(i as f64 / 100.0);
            assert!(p >= prev - 1e-12);
            prev = p;
        }
    }

    #[test]
    fn isotonic_ties_share_a_level() {
        let iso = IsotonicCalibration::fit(&[(0.4, 1.0), (0.4, 0.0), (0.6, 1.0)]).unwrap();
        assert_relative_eq!(iso.apply(0.4), 0.5);
    }

    #[test]
    fn unfit_calibrator_falls_back_to_identity() {
        let cal = CalibratorArtifact::fit(CalibrationMethod::Platt, &[(0.3, 1.0)]);
        assert_eq!(cal, CalibratorArtifact::Identity);
        assert_relative_eq!(cal.calibrate(0.42), 0.42);
    }

    #[test]
    fn artifact_serializes_with_method_tag() {
        let cal = CalibratorArtifact::Platt(PlattCalibration { a: 1.0, b: 0.0 });
        let v = serde_json::to_value(&cal).unwrap();
        assert_eq!(v["method"], "platt");
    }
}
