//! Formula 1 qualifying (Q3) lap-time and grid prediction.
//!
//! Historical sessions are cleaned and turned into a feature table
//! ([`features`]), a regression backend is fit on it ([`model`]), and the
//! [`predictor::HybridPredictor`] blends the model with pace factors to rank
//! the grid for a race that has no Q1/Q2 times yet.

pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod predictor;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{PipelineConfig, PredictionMode, PredictionRequest, SeasonWindow};
pub use error::{PredictorError, Result};
pub use features::{FeatureEngineer, FeatureMatrix, FeatureSettings, LabelVector, RowMetadata};
pub use model::{ModelConfig, ModelKind, RegressionModel};
pub use pipeline::{EvaluationReport, Pipeline};
pub use predictor::{
    blend_and_rank, BaselineSource, Candidate, HybridPredictor, HybridSettings,
    PerformanceFactors, RaceHistory, RosterEntry, WeatherFactors,
};
pub use source::{JsonFileSource, SessionSource};
pub use types::{
    CrossValidationMetrics, EvaluationMetrics, GridPrediction, PredictionDiagnostics,
    RawSessionRecord, SessionDataset, SessionRecord, Weather,
};
