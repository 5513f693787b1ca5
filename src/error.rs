use thiserror::Error;

use crate::model::ModelKind;

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("data quality: {0}")]
    DataQuality(String),

    #[error("insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("model has not been trained")]
    NotTrained,

    #[error("training failed: {0}")]
    Training(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{operation} is not supported by the {backend} backend")]
    UnsupportedOperation {
        operation: &'static str,
        backend: ModelKind,
    },

    #[error("feature dimension mismatch: expected {expected} columns, got {actual}")]
    Shape { expected: usize, actual: usize },

    #[error("hybrid predictor has no trained model")]
    MissingModel,

    #[error("session data unavailable: {0}")]
    Acquisition(String),
}

impl PredictorError {
    /// True for errors caused by the caller's request or data rather than the
    /// predictor itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DataQuality(_)
                | Self::InsufficientData { .. }
                | Self::Configuration(_)
                | Self::UnsupportedOperation { .. }
                | Self::Shape { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PredictorError>;
