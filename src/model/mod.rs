pub mod artifacts;
pub mod calibration;
pub mod logistic;
pub mod metrics;
pub mod train;

use std::fmt;

use crate::backtest::ScoredLabel;
use crate::db::models::DecisionLabel;

/// Anything that maps a feature vector to a raw win probability.
pub trait WinModel: Send + Sync {
    /// Feature order the model was fitted on
    fn feature_names(&self) -> &[String];
    fn predict(&self, features: &[f64]) -> f64;
}

/// Maps a raw probability onto a calibrated one.
pub trait ProbabilityCalibrator: Send + Sync {
    fn calibrate(&self, raw: f64) -> f64;
}

/// A model chained with its calibrator.
pub struct Predictor {
    model: Box<dyn WinModel>,
    calibrator: Box<dyn ProbabilityCalibrator>,
}

impl Predictor {
    pub fn new(model: Box<dyn WinModel>, calibrator: Box<dyn ProbabilityCalibrator>) -> Self {
        Self { model, calibrator }
    }

    pub fn probability(&self, features: &[f64]) -> f64 {
        self.calibrator.calibrate(self.model.predict(features))
    }
}

impl fmt::Debug for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor")
            .field("features", &self.model.feature_names())
            .finish_non_exhaustive()
    }
}

/// Attach calibrated win probabilities to decision labels.
pub fn score_labels(predictor: &Predictor, labels: Vec<DecisionLabel>) -> Vec<ScoredLabel> {
    labels
        .into_iter()
        .map(|label| {
            let p = predictor.probability(&label.snapshot.feature_vector());
            ScoredLabel::new(label, p)
        })
        .collect()
}
