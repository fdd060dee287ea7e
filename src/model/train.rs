//! Cross-validated training of the win model and its calibrator.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::calibration::{CalibrationMethod, CalibratorArtifact};
use super::logistic::{LogisticModel, LogisticParams};
use super::metrics::{brier, log_loss, roc_auc};
use super::{ProbabilityCalibrator, WinModel};
use crate::db::models::{DecisionLabel, FEATURE_NAMES};
use crate::error::PipelineError;

pub const MIN_TRAIN_ROWS: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    pub folds: usize,
    pub seed: u64,
    pub calibration: CalibrationMethod,
    pub params: LogisticParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            folds: 3,
            seed: 42,
            calibration: CalibrationMethod::Isotonic,
            params: LogisticParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub auc: Option<f64>,
}

/// Contents of `train.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub n_rows: usize,
    pub n_positive: usize,
    pub seed: u64,
    pub calibration: CalibrationMethod,
    pub feature_names: Vec<String>,
    pub folds: Vec<FoldMetrics>,
    pub mean_brier: f64,
    pub mean_log_loss: f64,
    pub mean_auc: Option<f64>,
    /// Out-of-fold metrics after calibration
    pub calibrated_brier: f64,
    pub calibrated_log_loss: f64,
}

pub struct TrainOutcome {
    pub model: LogisticModel,
    pub calibrator: CalibratorArtifact,
    pub report: TrainReport,
}

/// Assign each row to a fold so every fold keeps roughly the class balance.
pub fn stratified_folds(y: &[f64], k: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fold_of = vec![0usize; y.len()];
    for class in [0.0, 1.0] {
        let mut idx: Vec<usize> = (0..y.len()).filter(|&i| (y[i] > 0.5) == (class > 0.5)).collect();
        idx.shuffle(&mut rng);
        for (pos, i) in idx.into_iter().enumerate() {
            fold_of[i] = pos % k;
        }
    }
    fold_of
}

pub fn train(labels: &[DecisionLabel], cfg: &TrainConfig) -> Result<TrainOutcome, PipelineError> {
    if cfg.folds < 2 {
        return Err(PipelineError::invalid_config(format!("folds must be at least 2, got {}", cfg.folds)));
    }
    let x: Vec<Vec<f64>> = labels.iter().map(|l| l.snapshot.feature_vector()).collect();
    let y: Vec<f64> = labels.iter().map(|l| f64::from(l.outcome)).collect();
    let n_positive = y.iter().filter(|v| **v > 0.5).count();

    if labels.len() < MIN_TRAIN_ROWS {
        return Err(PipelineError::InsufficientData(format!(
            "{} labeled rows, need at least {MIN_TRAIN_ROWS}",
            labels.len()
        )));
    }
    if n_positive == 0 || n_positive == labels.len() {
        return Err(PipelineError::InsufficientData(format!(
            "all {} rows share one outcome",
            labels.len()
        )));
    }

    let fold_of = stratified_folds(&y, cfg.folds, cfg.seed);
    let mut oof = vec![0.0; y.len()];
    let mut folds = Vec::with_capacity(cfg.folds);

    for fold in 0..cfg.folds {
        let (test_idx, train_idx): (Vec<usize>, Vec<usize>) = (0..y.len()).partition(|&i| fold_of[i] == fold);
        if test_idx.is_empty() {
            continue;
        }
        let tx: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
        let ty: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();
        let model = LogisticModel::fit(&tx, &ty, &FEATURE_NAMES, cfg.params)?;

        let pred: Vec<f64> = test_idx.iter().map(|&i| model.predict(&x[i])).collect();
        let truth: Vec<f64> = test_idx.iter().map(|&i| y[i]).collect();
        for (&i, p) in test_idx.iter().zip(&pred) {
            oof[i] = *p;
        }
        let m = FoldMetrics {
            fold,
            n_train: train_idx.len(),
            n_test: test_idx.len(),
            brier: brier(&pred, &truth),
            log_loss: log_loss(&pred, &truth),
            auc: roc_auc(&pred, &truth),
        };
        info!(
            "[train] fold {} n_train={} n_test={} brier={:.4} logloss={:.4} auc={}",
            fold,
            m.n_train,
            m.n_test,
            m.brier,
            m.log_loss,
            m.auc.map(|a| format!("{a:.4}")).unwrap_or_else(|| "n/a".into())
        );
        folds.push(m);
    }

    let samples: Vec<(f64, f64)> = oof.iter().copied().zip(y.iter().copied()).collect();
    let calibrator = CalibratorArtifact::fit(cfg.calibration, &samples);
    if calibrator == CalibratorArtifact::Identity {
        warn!("[train] {:?} calibrator could not be fitted; using raw probabilities", cfg.calibration);
    }
    let calibrated: Vec<f64> = oof.iter().map(|p| calibrator.calibrate(*p)).collect();

    let model = LogisticModel::fit(&x, &y, &FEATURE_NAMES, cfg.params)?;

    let k = folds.len().max(1) as f64;
    let aucs: Vec<f64> = folds.iter().filter_map(|f| f.auc).collect();
    let report = TrainReport {
        n_rows: labels.len(),
        n_positive,
        seed: cfg.seed,
        calibration: cfg.calibration,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        mean_brier: folds.iter().map(|f| f.brier).sum::<f64>() / k,
        mean_log_loss: folds.iter().map(|f| f.log_loss).sum::<f64>() / k,
        mean_auc: (!aucs.is_empty()).then(|| aucs.iter().sum::<f64>() / aucs.len() as f64),
        calibrated_brier: brier(&calibrated, &y),
        calibrated_log_loss: log_loss(&calibrated, &y),
        folds,
    };
    info!(
        "[train] rows={} positives={} CV brier={:.4} logloss={:.4} calibrated brier={:.4}",
        report.n_rows, report.n_positive, report.mean_brier, report.mean_log_loss, report.calibrated_brier
    );
    Ok(TrainOutcome {
        model,
        calibrator,
        report,
    })
}
