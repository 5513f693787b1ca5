use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PredictorError, Result};
use crate::features::FeatureSettings;
use crate::model::{ModelConfig, ModelKind};
use crate::predictor::HybridSettings;
use crate::types::Weather;

/// Settings for a full acquisition → training → prediction run.
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureSettings,
    pub model: ModelConfig,
    pub hybrid: HybridSettings,
    pub cv_folds: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            features: FeatureSettings::default(),
            model: ModelConfig::default(),
            hybrid: HybridSettings::default(),
            cv_folds: 5,
            test_fraction: 0.2,
            split_seed: 42,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| {
            PredictorError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            PredictorError::Configuration(format!("invalid config JSON in {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.hybrid.validate()?;
        if self.cv_folds < 2 {
            return Err(PredictorError::Configuration(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(PredictorError::Configuration(format!(
                "test_fraction must be in (0, 1), got {}",
                self.test_fraction
            )));
        }
        Ok(())
    }

    /// Model configuration with the request's backend swapped in.
    pub fn model_for(&self, kind: ModelKind) -> ModelConfig {
        ModelConfig {
            kind,
            ..self.model.clone()
        }
    }
}

/// How the two estimates are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    #[default]
    Hybrid,
    MlOnly,
    PerformanceOnly,
}

/// Inclusive range of seasons to train on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonWindow {
    pub from: i32,
    pub to: i32,
}

impl SeasonWindow {
    pub fn contains(&self, season: i32) -> bool {
        (self.from..=self.to).contains(&season)
    }
}

/// One prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionRequest {
    pub circuit: String,
    pub weather: Weather,
    pub backend: ModelKind,
    pub mode: PredictionMode,
    pub ml_weight: f64,
    pub seasons: Option<SeasonWindow>,
}

impl Default for PredictionRequest {
    fn default() -> Self {
        Self {
            circuit: "Japan".to_string(),
            weather: Weather::Dry,
            backend: ModelKind::Linear,
            mode: PredictionMode::Hybrid,
            ml_weight: 0.7,
            seasons: None,
        }
    }
}

impl PredictionRequest {
    pub fn validate(&self) -> Result<()> {
        if self.circuit.trim().is_empty() {
            return Err(PredictorError::Configuration("circuit must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.ml_weight) {
            return Err(PredictorError::Configuration(format!(
                "ml_weight must be in [0, 1], got {}",
                self.ml_weight
            )));
        }
        if let Some(w) = self.seasons {
            if w.from > w.to {
                return Err(PredictorError::Configuration(format!(
                    "season window {}..={} is empty",
                    w.from, w.to
                )));
            }
        }
        Ok(())
    }

    /// Blend weight after applying the mode.
    pub fn effective_ml_weight(&self) -> f64 {
        match self.mode {
            PredictionMode::Hybrid => self.ml_weight,
            PredictionMode::MlOnly => 1.0,
            PredictionMode::PerformanceOnly => 0.0,
        }
    }
}
