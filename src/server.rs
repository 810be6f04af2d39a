//! JSON HTTP API over the [`ModelService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/projects` | List projects |
//! | `GET`  | `/projects/current` | Current project with its full bundle |
//! | `POST` | `/projects/switch` | `{ "project_name": "..." }` |
//! | `GET`  | `/models` | List stored models |
//! | `GET`  | `/models/current` | Currently selected model |
//! | `POST` | `/models/switch` | `{ "model_tag": "name:version" }` |
//! | `POST` | `/train` | Train with the given parameters |
//! | `POST` | `/predict` | `{ "data": [[f64, ...], ...] }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "row 0 has 5 features but ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `model_unavailable` (503), `internal` (500).
//! Requests that exceed `[server].timeout_secs` get `408`.
//!
//! `POST /train` always answers with a `TrainResponse`; the status is `200` on
//! success, `400` when validation rejected the request and `500` when training
//! failed.
//!
//! The service runs blocking work (network, training, disk), so every handler
//! takes the service lock on the blocking thread pool.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::config::{Config, EnvOverrides};
use crate::errors::PredictError;
use crate::models::ProjectSummary;
use crate::service::{CurrentModel, CurrentProject, ModelService, SwitchResponse, TrainRequest};
use crate::store::ModelInfo;
use crate::train::TrainingExecutor;

type SharedService = Arc<Mutex<ModelService>>;

/// Build the service on the blocking pool and serve until the process exits.
///
/// `make_executor` runs on a blocking thread, so it may construct blocking
/// HTTP clients.
pub async fn run_server<F>(config: Config, make_executor: F) -> anyhow::Result<()>
where
    F: FnOnce(&Config) -> anyhow::Result<Box<dyn TrainingExecutor>> + Send + 'static,
{
    let bind_addr = config.server.bind.clone();
    let timeout = Duration::from_secs(config.server.timeout_secs);

    let service = tokio::task::spawn_blocking(move || {
        let executor = make_executor(&config)?;
        ModelService::new(&config, &EnvOverrides::from_env(), executor)
    })
    .await??;

    let app = router(service, timeout);

    tracing::info!("Model server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes over `service`, with CORS and a per-request timeout.
pub fn router(service: ModelService, timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/projects", get(handle_projects))
        .route("/projects/current", get(handle_current_project))
        .route("/projects/switch", post(handle_switch_project))
        .route("/models", get(handle_models))
        .route("/models/current", get(handle_current_model))
        .route("/models/switch", post(handle_switch_model))
        .route("/train", post(handle_train))
        .route("/predict", post(handle_predict))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .with_state(Arc::new(Mutex::new(service)))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<PredictError> for AppError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::NoModel => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "model_unavailable",
                message: err.to_string(),
            },
            other => bad_request(other.to_string()),
        }
    }
}

/// Run `f` with the service locked, on the blocking pool. A panic in an
/// earlier request poisons the mutex; the service is still usable since
/// every operation leaves it consistent before it can panic.
async fn with_service<T, F>(service: SharedService, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&mut ModelService) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = service.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering model service after a panicked request");
            poisoned.into_inner()
        });
        f(&mut guard)
    })
    .await
    .map_err(|e| internal(format!("worker failed: {}", e)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Projects ============

async fn handle_projects(
    State(service): State<SharedService>,
) -> Result<Json<Vec<ProjectSummary>>, AppError> {
    Ok(Json(with_service(service, |s| s.projects()).await?))
}

async fn handle_current_project(
    State(service): State<SharedService>,
) -> Result<Json<CurrentProject>, AppError> {
    Ok(Json(with_service(service, |s| s.current_project()).await?))
}

#[derive(Deserialize)]
struct SwitchProjectRequest {
    project_name: String,
}

async fn handle_switch_project(
    State(service): State<SharedService>,
    Json(req): Json<SwitchProjectRequest>,
) -> Result<Json<SwitchResponse>, AppError> {
    let response = with_service(service, move |s| s.switch_project(&req.project_name)).await?;
    Ok(Json(response))
}

// ============ Models ============

async fn handle_models(
    State(service): State<SharedService>,
) -> Result<Json<Vec<ModelInfo>>, AppError> {
    Ok(Json(with_service(service, |s| s.models()).await?))
}

async fn handle_current_model(
    State(service): State<SharedService>,
) -> Result<Json<CurrentModel>, AppError> {
    Ok(Json(with_service(service, |s| s.current_model()).await?))
}

#[derive(Deserialize)]
struct SwitchModelRequest {
    model_tag: String,
}

async fn handle_switch_model(
    State(service): State<SharedService>,
    Json(req): Json<SwitchModelRequest>,
) -> Result<Json<SwitchResponse>, AppError> {
    let response = with_service(service, move |s| s.switch_model(&req.model_tag)).await?;
    Ok(Json(response))
}

// ============ POST /train ============

async fn handle_train(
    State(service): State<SharedService>,
    Json(req): Json<TrainRequest>,
) -> Result<Response, AppError> {
    let response = with_service(service, move |s| s.train_model(&req)).await?;
    let status = if response.success {
        StatusCode::OK
    } else if response.invalid {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(response)).into_response())
}

// ============ POST /predict ============

#[derive(Deserialize)]
struct PredictRequest {
    data: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct PredictResponse {
    predictions: Vec<[f64; 2]>,
}

async fn handle_predict(
    State(service): State<SharedService>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, AppError> {
    let predictions = with_service(service, move |s| s.predict(&req.data)).await??;
    Ok(Json(PredictResponse { predictions }))
}
