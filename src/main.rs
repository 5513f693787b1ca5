use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json,
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tracing_subscriber::EnvFilter;

use quali_predictor::{
    EvaluationReport, GridPrediction, JsonFileSource, ModelKind, Pipeline, PipelineConfig,
    PredictionRequest, PredictorError, RaceHistory, RegressionModel, SeasonWindow,
};

// ---------- Request/Response types ----------

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct EvaluateBody {
    backend: ModelKind,
    seasons: Option<SeasonWindow>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(e: PredictorError) -> ApiError {
    let status = match &e {
        PredictorError::Acquisition(_) => StatusCode::BAD_GATEWAY,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn join_error(e: tokio::task::JoinError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("worker failed: {}", e) })),
    )
}

// ---------- Server state ----------

struct AppState {
    pipeline: Pipeline,
    source: JsonFileSource,
    history: RaceHistory,
    // one fitted model per backend; write side only while training
    models: HashMap<ModelKind, RwLock<RegressionModel>>,
}

impl AppState {
    fn slot(&self, kind: ModelKind) -> quali_predictor::Result<&RwLock<RegressionModel>> {
        self.models.get(&kind).ok_or_else(|| {
            PredictorError::Configuration(format!("backend {} is not loaded", kind))
        })
    }

    fn ensure_trained(&self, kind: ModelKind) -> quali_predictor::Result<()> {
        let slot = self.slot(kind)?;
        if slot.read().is_trained() {
            return Ok(());
        }
        let mut model = slot.write();
        if !model.is_trained() {
            *model = self.pipeline.train(&self.history, kind)?;
            tracing::info!("trained {} model on demand", kind);
        }
        Ok(())
    }

    fn predict(&self, request: &PredictionRequest) -> quali_predictor::Result<Vec<GridPrediction>> {
        request.validate()?;
        if request.seasons.is_some() {
            // a custom window needs its own history and fit
            return self.pipeline.run_prediction(&self.source, request);
        }
        self.ensure_trained(request.backend)?;
        let model = self.slot(request.backend)?.read();
        self.pipeline.predict(&self.history, &model, request)
    }

    fn evaluate(&self, body: &EvaluateBody) -> quali_predictor::Result<EvaluationReport> {
        match body.seasons {
            Some(window) => self
                .pipeline
                .run_evaluation(&self.source, body.backend, Some(window)),
            None => self.pipeline.evaluate(&self.history, body.backend),
        }
    }
}

// ---------- Handlers ----------

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<Vec<GridPrediction>>, ApiError> {
    tracing::debug!(
        "predict circuit={} weather={} backend={} mode={:?}",
        request.circuit,
        request.weather,
        request.backend,
        request.mode
    );
    let grid = tokio::task::spawn_blocking(move || state.predict(&request))
        .await
        .map_err(join_error)?
        .map_err(api_error)?;
    Ok(Json(grid))
}

async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EvaluateBody>,
) -> Result<Json<EvaluationReport>, ApiError> {
    let report = tokio::task::spawn_blocking(move || state.evaluate(&body))
        .await
        .map_err(join_error)?
        .map_err(api_error)?;
    Ok(Json(report))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let trained: Vec<&str> = ModelKind::ALL
        .iter()
        .filter(|k| state.models.get(k).map_or(false, |m| m.read().is_trained()))
        .map(|k| k.as_str())
        .collect();
    Json(json!({
        "status": "ok",
        "records": state.history.dataset().len(),
        "roster": state.history.roster().len(),
        "trained": trained,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data_path = std::env::var("DATA_PATH").context("DATA_PATH not set")?;
    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => PipelineConfig::load(&path).with_context(|| format!("loading config {}", path))?,
        Err(_) => PipelineConfig::default(),
    };
    let port: u16 = std::env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8080);

    let default_backend = config.model.kind;
    let pipeline = Pipeline::new(config)?;
    let source = JsonFileSource::new(&data_path);
    let history = pipeline
        .load_history(&source, None)
        .with_context(|| format!("loading session history from {}", data_path))?;

    let models = ModelKind::ALL
        .iter()
        .map(|&kind| -> anyhow::Result<(ModelKind, RwLock<RegressionModel>)> {
            let model = RegressionModel::new(pipeline.config().model_for(kind))?;
            Ok((kind, RwLock::new(model)))
        })
        .collect::<anyhow::Result<HashMap<_, _>>>()?;

    let state = Arc::new(AppState {
        pipeline,
        source,
        history,
        models,
    });

    // Warm the configured backend so the first request is not a training run
    let warm = state.clone();
    tokio::task::spawn_blocking(move || warm.ensure_trained(default_backend))
        .await?
        .context("training default backend")?;
    tracing::info!("warmup fit ok ({})", default_backend);

    let app = axum::Router::new()
        .route("/predict", post(predict))
        .route("/evaluate", post(evaluate))
        .route("/health", get(health))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
