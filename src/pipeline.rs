//! Acquisition → cleaning → training → prediction / evaluation.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::config::{PipelineConfig, PredictionRequest, SeasonWindow};
use crate::error::{PredictorError, Result};
use crate::features::{train_test_split, FeatureEngineer};
use crate::model::{ModelKind, RegressionModel};
use crate::predictor::{HybridPredictor, RaceHistory};
use crate::source::SessionSource;
use crate::types::{
    CrossValidationMetrics, EvaluationMetrics, GridPrediction, PredictionDiagnostics,
    RawSessionRecord,
};

/// Held-out scores, cross-validation and diagnostics for one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub backend: ModelKind,
    pub train_rows: usize,
    pub test_rows: usize,
    pub metrics: EvaluationMetrics,
    pub cross_validation: CrossValidationMetrics,
    pub diagnostics: PredictionDiagnostics,
    /// Only for backends that expose importance.
    pub feature_importance: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    engineer: FeatureEngineer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let engineer = FeatureEngineer::new(&config.features);
        Ok(Self { config, engineer })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engineer(&self) -> &FeatureEngineer {
        &self.engineer
    }

    /// Fetch, filter to `seasons` and clean.
    pub fn load_history(
        &self,
        source: &dyn SessionSource,
        seasons: Option<SeasonWindow>,
    ) -> Result<RaceHistory> {
        let raw = fetch(source)?;
        let raw: Vec<RawSessionRecord> = match seasons {
            Some(window) => raw.into_iter().filter(|r| window.contains(r.season)).collect(),
            None => raw,
        };
        let dataset = self.engineer.clean(&raw)?;
        Ok(RaceHistory::build(&self.engineer, dataset))
    }

    /// Train a `kind` model on every labelled row of `history`.
    pub fn train(&self, history: &RaceHistory, kind: ModelKind) -> Result<RegressionModel> {
        let (x, y, _) = self.engineer.prepare_features(history.engineered())?;
        let mut model = RegressionModel::new(self.config.model_for(kind))?;
        model.train(&x, &y)?;
        Ok(model)
    }

    pub fn predict(
        &self,
        history: &RaceHistory,
        model: &RegressionModel,
        request: &PredictionRequest,
    ) -> Result<Vec<GridPrediction>> {
        request.validate()?;
        HybridPredictor::new(history, model)
            .with_settings(self.config.hybrid.clone())
            .predict_future_race(&request.circuit, request.weather, request.effective_ml_weight())
    }

    /// Fetch, train and predict in one go.
    pub fn run_prediction(
        &self,
        source: &dyn SessionSource,
        request: &PredictionRequest,
    ) -> Result<Vec<GridPrediction>> {
        request.validate()?;
        let history = self.load_history(source, request.seasons)?;
        let model = self.train(&history, request.backend)?;
        self.predict(&history, &model, request)
    }

    /// Split, train, score on the held-out rows and cross-validate.
    pub fn evaluate(&self, history: &RaceHistory, kind: ModelKind) -> Result<EvaluationReport> {
        let (x, y, metadata) = self.engineer.prepare_features(history.engineered())?;
        let split = train_test_split(
            &x,
            &y,
            &metadata,
            self.config.test_fraction,
            self.config.split_seed,
        )?;

        let mut model = RegressionModel::new(self.config.model_for(kind))?;
        model.train(&split.x_train, &split.y_train)?;
        let metrics = model.evaluate(&split.x_test, &split.y_test)?;
        let cross_validation = model.cross_validate(&x, &y, self.config.cv_folds)?;
        let diagnostics = model.prediction_diagnostics(&split.x_test, &split.y_test, &split.meta_test)?;
        let feature_importance = match model.feature_importance() {
            Ok(importance) => Some(importance),
            Err(PredictorError::UnsupportedOperation { .. }) => None,
            Err(e) => return Err(e),
        };

        info!(
            "{} evaluation: mae={:.3} rmse={:.3} r2={:.3}, cv mae={:.3}±{:.3}",
            kind,
            metrics.mae,
            metrics.rmse,
            metrics.r2,
            cross_validation.mae_mean,
            cross_validation.mae_std
        );
        Ok(EvaluationReport {
            backend: kind,
            train_rows: split.y_train.len(),
            test_rows: split.y_test.len(),
            metrics,
            cross_validation,
            diagnostics,
            feature_importance,
        })
    }

    pub fn run_evaluation(
        &self,
        source: &dyn SessionSource,
        kind: ModelKind,
        seasons: Option<SeasonWindow>,
    ) -> Result<EvaluationReport> {
        let history = self.load_history(source, seasons)?;
        self.evaluate(&history, kind)
    }
}

/// Pull rows from `source`; nothing delivered is a hard stop.
pub fn fetch(source: &dyn SessionSource) -> Result<Vec<RawSessionRecord>> {
    match source.fetch_recent_seasons(false) {
        None => Err(PredictorError::Acquisition(
            "session source returned no data".into(),
        )),
        Some(rows) if rows.is_empty() => Err(PredictorError::Acquisition(
            "session source returned an empty table".into(),
        )),
        Some(rows) => {
            info!("fetched {} raw session rows", rows.len());
            Ok(rows)
        }
    }
}
