//! Regression model over interchangeable backends.
//!
//! A `RegressionModel` owns the fitted parameters of one trained instance.
//! It has no interior mutability: callers that share one instance must not
//! retrain it while another caller reads from it (e.g. keep it behind a
//! read/write lock and take the write side only for `train`).

mod ensemble;
mod linear;
pub mod metrics;
mod tree;
pub mod validation;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PredictorError, Result};
use crate::features::{FeatureMatrix, LabelVector, RowMetadata};
use crate::types::{
    CrossValidationMetrics, DiagnosticPoint, EvaluationMetrics, PredictionDiagnostics,
};

pub use ensemble::{GradientBoosting, RandomForest};
pub use linear::LinearFit;

/// Prediction interface shared by every backend.
pub(crate) trait Regressor {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64;

    /// Normalised per-feature weights, for backends that can explain themselves.
    fn feature_importance(&self) -> Option<Vec<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[default]
    #[serde(rename = "linear")]
    Linear,
    #[serde(rename = "ridge")]
    Ridge,
    #[serde(rename = "rf", alias = "random_forest")]
    RandomForest,
    #[serde(rename = "gbm", alias = "gradient_boosted")]
    GradientBoosted,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Linear,
        ModelKind::Ridge,
        ModelKind::RandomForest,
        ModelKind::GradientBoosted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Ridge => "ridge",
            ModelKind::RandomForest => "rf",
            ModelKind::GradientBoosted => "gbm",
        }
    }

    pub fn is_linear(self) -> bool {
        matches!(self, ModelKind::Linear | ModelKind::Ridge)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = PredictorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "ols" => Ok(ModelKind::Linear),
            "ridge" => Ok(ModelKind::Ridge),
            "rf" | "random_forest" => Ok(ModelKind::RandomForest),
            "gbm" | "gradient_boosted" => Ok(ModelKind::GradientBoosted),
            other => Err(PredictorError::Configuration(format!(
                "unknown model backend '{}' (expected linear, ridge, rf or gbm)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub ridge_alpha: f64,
    pub n_trees: usize,
    pub forest_max_depth: usize,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub boost_max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(ModelKind::default())
    }
}

impl ModelConfig {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            ridge_alpha: 1.0,
            n_trees: 100,
            forest_max_depth: 10,
            n_estimators: 100,
            learning_rate: 0.1,
            boost_max_depth: 3,
            min_samples_split: 2,
            seed: 42,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PredictorError::Configuration(msg));
        match self.kind {
            ModelKind::Ridge if !(self.ridge_alpha.is_finite() && self.ridge_alpha > 0.0) => {
                invalid(format!("ridge_alpha must be positive, got {}", self.ridge_alpha))
            }
            ModelKind::RandomForest if self.n_trees == 0 => invalid("n_trees must be at least 1".into()),
            ModelKind::GradientBoosted if self.n_estimators == 0 => {
                invalid("n_estimators must be at least 1".into())
            }
            ModelKind::GradientBoosted
                if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) =>
            {
                invalid(format!(
                    "learning_rate must be in (0, 1], got {}",
                    self.learning_rate
                ))
            }
            ModelKind::RandomForest | ModelKind::GradientBoosted if self.min_samples_split < 2 => {
                invalid("min_samples_split must be at least 2".into())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Linear(LinearFit),
    Forest(RandomForest),
    Boosted(GradientBoosting),
}

impl Backend {
    fn regressor(&self) -> &dyn Regressor {
        match self {
            Backend::Linear(m) => m,
            Backend::Forest(m) => m,
            Backend::Boosted(m) => m,
        }
    }
}

#[derive(Debug, Clone)]
struct Trained {
    columns: Vec<String>,
    backend: Backend,
}

#[derive(Debug, Clone)]
enum ModelState {
    Untrained,
    Trained(Trained),
}

#[derive(Debug, Clone)]
pub struct RegressionModel {
    config: ModelConfig,
    state: ModelState,
}

impl RegressionModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: ModelState::Untrained,
        })
    }

    /// Model with default hyperparameters for `kind`.
    pub fn with_kind(kind: ModelKind) -> Self {
        Self {
            config: ModelConfig::new(kind),
            state: ModelState::Untrained,
        }
    }

    /// Untrained instance with the same configuration.
    pub fn fresh(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: ModelState::Untrained,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.config.kind
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ModelState::Trained(_))
    }

    /// Columns the model was trained on.
    pub fn feature_names(&self) -> Option<&[String]> {
        match &self.state {
            ModelState::Trained(t) => Some(&t.columns),
            ModelState::Untrained => None,
        }
    }

    /// Fit on `x`/`y`, replacing any previous fit. On error the previous
    /// state is kept.
    pub fn train(&mut self, x: &FeatureMatrix, y: &LabelVector) -> Result<()> {
        let trained = self.fit(x, y)?;
        self.state = ModelState::Trained(trained);
        info!(
            "trained {} model on {} rows x {} features",
            self.config.kind,
            x.nrows(),
            x.ncols()
        );
        Ok(())
    }

    fn fit(&self, x: &FeatureMatrix, y: &LabelVector) -> Result<Trained> {
        if x.ncols() == 0 {
            return Err(PredictorError::Training("feature matrix has no columns".into()));
        }
        if x.nrows() != y.len() {
            return Err(PredictorError::Training(format!(
                "row count mismatch: {} feature rows, {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(PredictorError::Training("no training rows".into()));
        }
        if x.values().iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(PredictorError::Training("non-finite value in training data".into()));
        }

        let values = x.values().view();
        let labels = y.to_vec();
        let backend = match self.config.kind {
            ModelKind::Linear => Backend::Linear(LinearFit::ordinary(values, y.view())?),
            ModelKind::Ridge => {
                Backend::Linear(LinearFit::ridge(values, y.view(), self.config.ridge_alpha)?)
            }
            ModelKind::RandomForest => {
                Backend::Forest(RandomForest::fit(values, &labels, &self.config))
            }
            ModelKind::GradientBoosted => {
                Backend::Boosted(GradientBoosting::fit(values, &labels, &self.config))
            }
        };

        Ok(Trained {
            columns: x.columns().to_vec(),
            backend,
        })
    }

    fn trained(&self) -> Result<&Trained> {
        match &self.state {
            ModelState::Trained(t) => Ok(t),
            ModelState::Untrained => Err(PredictorError::NotTrained),
        }
    }

    /// Predicted `q3_sec` for every row of `x`.
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        let trained = self.trained()?;
        if x.ncols() != trained.columns.len() {
            return Err(PredictorError::Shape {
                expected: trained.columns.len(),
                actual: x.ncols(),
            });
        }
        let model = trained.backend.regressor();
        Ok(x.values()
            .axis_iter(Axis(0))
            .map(|row| model.predict_row(row))
            .collect())
    }

    /// Held-out MAE, RMSE and R².
    pub fn evaluate(&self, x_test: &FeatureMatrix, y_test: &LabelVector) -> Result<EvaluationMetrics> {
        self.trained()?;
        check_rows(x_test, y_test)?;
        let predicted = self.predict(x_test)?;
        let actual = y_test.to_vec();
        Ok(EvaluationMetrics {
            mae: metrics::mae(&actual, &predicted),
            rmse: metrics::rmse(&actual, &predicted),
            r2: metrics::r2(&actual, &predicted),
        })
    }

    /// Seeded k-fold cross-validation on fresh instances; `self` is untouched.
    pub fn cross_validate(
        &self,
        x: &FeatureMatrix,
        y: &LabelVector,
        folds: usize,
    ) -> Result<CrossValidationMetrics> {
        if folds < 2 {
            return Err(PredictorError::Configuration(format!(
                "cross-validation needs at least 2 folds, got {}",
                folds
            )));
        }
        if folds > x.nrows() {
            return Err(PredictorError::Configuration(format!(
                "{} folds requested but only {} rows available",
                folds,
                x.nrows()
            )));
        }
        check_rows(x, y)?;

        let mut maes = Vec::with_capacity(folds);
        let mut r2s = Vec::with_capacity(folds);
        for (fold, (train_idx, test_idx)) in validation::kfold(x.nrows(), folds, self.config.seed)
            .into_iter()
            .enumerate()
        {
            let mut model = self.fresh();
            model.fit_rows(x, y, &train_idx)?;
            let scores = model.evaluate(
                &x.select_rows(&test_idx),
                &y.select(Axis(0), &test_idx),
            )?;
            debug!(
                "fold {}: mae={:.3} r2={:.3} ({} test rows)",
                fold,
                scores.mae,
                scores.r2,
                test_idx.len()
            );
            maes.push(scores.mae);
            r2s.push(scores.r2);
        }

        Ok(CrossValidationMetrics {
            mae_mean: metrics::mean(&maes),
            mae_std: metrics::std_dev(&maes),
            r2_mean: metrics::mean(&r2s),
            r2_std: metrics::std_dev(&r2s),
        })
    }

    fn fit_rows(&mut self, x: &FeatureMatrix, y: &LabelVector, rows: &[usize]) -> Result<()> {
        let trained = self.fit(&x.select_rows(rows), &y.select(Axis(0), rows))?;
        self.state = ModelState::Trained(trained);
        Ok(())
    }

    /// Per-feature weights of the tree backends, keyed by column name.
    pub fn feature_importance(&self) -> Result<BTreeMap<String, f64>> {
        let trained = self.trained()?;
        if self.config.kind.is_linear() {
            return Err(PredictorError::UnsupportedOperation {
                operation: "feature_importance",
                backend: self.config.kind,
            });
        }
        let weights = trained
            .backend
            .regressor()
            .feature_importance()
            .ok_or(PredictorError::UnsupportedOperation {
                operation: "feature_importance",
                backend: self.config.kind,
            })?;
        Ok(trained.columns.iter().cloned().zip(weights).collect())
    }

    /// Actual vs predicted laps with their source records, plus mean
    /// absolute error per driver and per circuit.
    pub fn prediction_diagnostics(
        &self,
        x: &FeatureMatrix,
        y: &LabelVector,
        metadata: &[RowMetadata],
    ) -> Result<PredictionDiagnostics> {
        check_rows(x, y)?;
        if metadata.len() != y.len() {
            return Err(PredictorError::DataQuality(format!(
                "{} metadata rows for {} labels",
                metadata.len(),
                y.len()
            )));
        }
        let predicted = self.predict(x)?;

        let points: Vec<DiagnosticPoint> = metadata
            .iter()
            .zip(y.iter().zip(&predicted))
            .map(|(m, (&actual, &predicted))| DiagnosticPoint {
                driver: m.driver.clone(),
                team: m.team.clone(),
                circuit: m.circuit.clone(),
                season: m.season,
                round: m.round,
                actual,
                predicted,
                residual: actual - predicted,
            })
            .collect();

        Ok(PredictionDiagnostics {
            mae_by_driver: group_mae(&points, |p| &p.driver),
            mae_by_circuit: group_mae(&points, |p| &p.circuit),
            points,
        })
    }
}

fn check_rows(x: &FeatureMatrix, y: &LabelVector) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(PredictorError::DataQuality(format!(
            "row count mismatch: {} feature rows, {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if y.is_empty() {
        return Err(PredictorError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }
    Ok(())
}

fn group_mae<F>(points: &[DiagnosticPoint], key: F) -> BTreeMap<String, f64>
where
    F: Fn(&DiagnosticPoint) -> &String,
{
    let mut groups: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for p in points {
        let entry = groups.entry(key(p).clone()).or_insert((0.0, 0));
        entry.0 += p.residual.abs();
        entry.1 += 1;
    }
    groups
        .into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureEngineer;
    use crate::testing::synthetic_history;
    use ndarray::{Array1, Array2};

    fn prepared() -> (FeatureMatrix, LabelVector, Vec<RowMetadata>) {
        let engineer = FeatureEngineer::default();
        let cleaned = engineer.clean(&synthetic_history()).unwrap();
        engineer
            .prepare_features(&engineer.engineer_features(&cleaned))
            .unwrap()
    }

    fn ten_rows() -> (FeatureMatrix, LabelVector) {
        let values = Array2::from_shape_fn((10, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y: Array1<f64> = (0..10).map(|i| 90.0 + 0.1 * i as f64).collect();
        (
            FeatureMatrix::new(vec!["a".into(), "b".into()], values).unwrap(),
            y,
        )
    }

    #[test]
    fn test_backend_names_parse() {
        assert_eq!("rf".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        assert_eq!("GBM".parse::<ModelKind>().unwrap(), ModelKind::GradientBoosted);
        assert_eq!("ridge".parse::<ModelKind>().unwrap(), ModelKind::Ridge);
        assert!(matches!(
            "svm".parse::<ModelKind>(),
            Err(PredictorError::Configuration(_))
        ));
        let kind: ModelKind = serde_json::from_str("\"random_forest\"").unwrap();
        assert_eq!(kind, ModelKind::RandomForest);
    }

    #[test]
    fn test_read_operations_require_training() {
        let (x, y, meta) = prepared();
        let model = RegressionModel::with_kind(ModelKind::GradientBoosted);
        assert!(matches!(model.evaluate(&x, &y), Err(PredictorError::NotTrained)));
        assert!(matches!(model.predict(&x), Err(PredictorError::NotTrained)));
        assert!(matches!(model.feature_importance(), Err(PredictorError::NotTrained)));
        assert!(matches!(
            model.prediction_diagnostics(&x, &y, &meta),
            Err(PredictorError::NotTrained)
        ));
    }

    #[test]
    fn test_train_validates_shapes() {
        let (x, y) = ten_rows();
        let mut model = RegressionModel::with_kind(ModelKind::Linear);

        let short = y.slice(ndarray::s![..5]).to_owned();
        assert!(matches!(model.train(&x, &short), Err(PredictorError::Training(_))));

        let empty = FeatureMatrix::new(vec![], Array2::zeros((10, 0))).unwrap();
        assert!(matches!(model.train(&empty, &y), Err(PredictorError::Training(_))));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_failed_retrain_keeps_previous_fit() {
        let (x, y) = ten_rows();
        let mut model = RegressionModel::with_kind(ModelKind::Ridge);
        model.train(&x, &y).unwrap();
        let before = model.predict(&x).unwrap();

        let short = y.slice(ndarray::s![..3]).to_owned();
        assert!(model.train(&x, &short).is_err());
        assert!(model.is_trained());
        assert_eq!(model.predict(&x).unwrap(), before);
    }

    #[test]
    fn test_predict_checks_column_count() {
        let (x, y) = ten_rows();
        let mut model = RegressionModel::with_kind(ModelKind::RandomForest);
        model.train(&x, &y).unwrap();

        let wide = FeatureMatrix::new(
            vec!["a".into(), "b".into(), "c".into()],
            Array2::zeros((2, 3)),
        )
        .unwrap();
        assert!(matches!(
            model.predict(&wide),
            Err(PredictorError::Shape { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_every_backend_is_deterministic() {
        let (x, y, _) = prepared();
        for kind in ModelKind::ALL {
            let mut a = RegressionModel::with_kind(kind);
            let mut b = RegressionModel::with_kind(kind);
            a.train(&x, &y).unwrap();
            b.train(&x, &y).unwrap();
            assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap(), "{} differs", kind);
        }
    }

    #[test]
    fn test_evaluate_reports_metrics() {
        let (x, y, _) = prepared();
        let mut model = RegressionModel::with_kind(ModelKind::Linear);
        model.train(&x, &y).unwrap();
        let scores = model.evaluate(&x, &y).unwrap();
        assert!(scores.mae >= 0.0);
        assert!(scores.rmse >= scores.mae);
        assert!(scores.r2 > 0.9, "in-sample fit should be tight, got {}", scores.r2);
    }

    #[test]
    fn test_cross_validation_fold_limits() {
        let (x, y) = ten_rows();
        let model = RegressionModel::with_kind(ModelKind::Linear);

        let cv = model.cross_validate(&x, &y, 5).unwrap();
        assert!(cv.mae_mean.is_finite());
        assert!(cv.mae_std >= 0.0);
        assert!(cv.r2_mean.is_finite());

        assert!(matches!(
            model.cross_validate(&x, &y, 11),
            Err(PredictorError::Configuration(_))
        ));
        assert!(matches!(
            model.cross_validate(&x, &y, 1),
            Err(PredictorError::Configuration(_))
        ));
    }

    #[test]
    fn test_cross_validation_leaves_model_untouched() {
        let (x, y, _) = prepared();
        let untrained = RegressionModel::with_kind(ModelKind::Ridge);
        untrained.cross_validate(&x, &y, 5).unwrap();
        assert!(!untrained.is_trained());

        let mut trained = RegressionModel::with_kind(ModelKind::Ridge);
        trained.train(&x, &y).unwrap();
        let before = trained.predict(&x).unwrap();
        let first = trained.cross_validate(&x, &y, 4).unwrap();
        let second = trained.cross_validate(&x, &y, 4).unwrap();
        assert_eq!(first, second);
        assert_eq!(trained.predict(&x).unwrap(), before);
    }

    #[test]
    fn test_feature_importance_capability() {
        let (x, y, _) = prepared();
        for kind in [ModelKind::Linear, ModelKind::Ridge] {
            let mut model = RegressionModel::with_kind(kind);
            // training state is checked before capability
            assert!(matches!(model.feature_importance(), Err(PredictorError::NotTrained)));
            model.train(&x, &y).unwrap();
            assert!(matches!(
                model.feature_importance(),
                Err(PredictorError::UnsupportedOperation { .. })
            ));
        }
        for kind in [ModelKind::RandomForest, ModelKind::GradientBoosted] {
            let mut model = RegressionModel::with_kind(kind);
            model.train(&x, &y).unwrap();
            let importance = model.feature_importance().unwrap();
            assert_eq!(importance.len(), x.ncols());
            let total: f64 = importance.values().sum();
            assert!(total.is_finite() && total > 0.0);
        }
    }

    #[test]
    fn test_invalid_hyperparameters() {
        let config = ModelConfig {
            ridge_alpha: 0.0,
            ..ModelConfig::new(ModelKind::Ridge)
        };
        assert!(matches!(
            RegressionModel::new(config),
            Err(PredictorError::Configuration(_))
        ));
        let config = ModelConfig {
            learning_rate: 1.5,
            ..ModelConfig::new(ModelKind::GradientBoosted)
        };
        assert!(RegressionModel::new(config).is_err());
    }

    #[test]
    fn test_diagnostics_group_errors() {
        let (x, y, meta) = prepared();
        let mut model = RegressionModel::with_kind(ModelKind::GradientBoosted);
        model.train(&x, &y).unwrap();
        let diag = model.prediction_diagnostics(&x, &y, &meta).unwrap();
        assert_eq!(diag.points.len(), y.len());
        assert!(diag.mae_by_circuit.contains_key("Monaco"));
        for p in &diag.points {
            assert!((p.actual - p.predicted - p.residual).abs() < 1e-12);
        }
    }
}
