use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::calibration::CalibratorArtifact;
use super::logistic::LogisticModel;
use super::{Predictor, WinModel};
use crate::db::models::FEATURE_NAMES;
use crate::error::PipelineError;

pub const MODEL_FILE: &str = "model.json";
pub const CALIBRATOR_FILE: &str = "calibrator.json";

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path, expected: &str) -> Result<T> {
    if !path.is_file() {
        return Err(PipelineError::missing("model artifact", path, expected).into());
    }
    let body = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write `model.json` and `calibrator.json` into `dir`.
pub fn save(dir: &Path, model: &LogisticModel, calibrator: &CalibratorArtifact) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let model_path = dir.join(MODEL_FILE);
    let cal_path = dir.join(CALIBRATOR_FILE);
    write_json(&model_path, model)?;
    write_json(&cal_path, calibrator)?;
    info!("[artifacts] saved {} and {}", model_path.display(), cal_path.display());
    Ok((model_path, cal_path))
}

/// Load the predictor from `dir`, refusing a model trained on a different
/// feature layout.
pub fn load(dir: &Path) -> Result<Predictor> {
    let model: LogisticModel = read_json(&dir.join(MODEL_FILE), "a trained model (run `train` first)")?;
    let calibrator: CalibratorArtifact = read_json(&dir.join(CALIBRATOR_FILE), "a fitted calibrator (run `train` first)")?;

    let expected: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    if model.feature_names() != expected.as_slice() {
        return Err(PipelineError::ArtifactMismatch {
            artifact: dir.join(MODEL_FILE).display().to_string(),
            expected,
            found: model.feature_names().to_vec(),
        }
        .into());
    }
    Ok(Predictor::new(Box::new(model), Box::new(calibrator)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::calibration::PlattCalibration;

    fn scratch(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("edge-engine-artifacts-{tag}-{}", std::process::id()))
    }

    fn model(names: &[&str]) -> LogisticModel {
        LogisticModel {
            feature_names: names.iter().map(|s| s.to_string()).collect(),
            means: vec![0.0; names.len()],
            scales: vec![1.0; names.len()],
            weights: vec![0.0; names.len()],
            intercept: 0.0,
        }
    }

    #[test]
    fn save_then_load_predicts() {
        let dir = scratch("ok");
        let cal = CalibratorArtifact::Platt(PlattCalibration { a: 1.0, b: 0.0 });
        save(&dir, &model(&FEATURE_NAMES), &cal).unwrap();
        let predictor = load(&dir).unwrap();
        let p = predictor.probability(&[0.0; 6]);
        assert!((p - 0.5).abs() < 1e-9);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mismatched_features_are_rejected() {
        let dir = scratch("mismatch");
        save(&dir, &model(&["a", "b"]), &CalibratorArtifact::Identity).unwrap();
        let err = load(&dir).unwrap_err().downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::ArtifactMismatch { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn absent_artifacts_are_missing_data() {
        let err = load(&scratch("absent")).unwrap_err().downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::MissingData { .. }));
    }
}
