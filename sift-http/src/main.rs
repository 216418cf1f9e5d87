use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sift_core::{AnalysisError, AnalysisKernel, AskResponse, SiftConfig};
use sift_store::DataFusionEngine;
use sift_types::{InvestigationResult, QueryIntent, Row};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    kernel: Arc<AnalysisKernel>,
}

fn default_user() -> String {
    "anonymous".into()
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    dataset_id: String,
    #[serde(default = "default_user")]
    user_id: String,
    question: String,
}

#[derive(Debug, Deserialize)]
struct InvestigateRequest {
    dataset_id: String,
    #[serde(default = "default_user")]
    user_id: String,
    question: String,
    #[serde(default)]
    initial_data: Vec<Row>,
    #[serde(default)]
    interpretation: Option<QueryIntent>,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    request_id: Uuid,
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    body: T,
}

impl<T> Envelope<T> {
    fn new(body: T) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            body,
        }
    }
}

struct ApiError(AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AnalysisError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AnalysisError::UnknownDataset(_) => StatusCode::NOT_FOUND,
            AnalysisError::OracleExhausted { .. } => StatusCode::BAD_GATEWAY,
            AnalysisError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut response = (status, Json(json!({ "error": self.0.to_string() }))).into_response();
        if let AnalysisError::RateLimitExceeded { retry_after } = &self.0 {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SiftConfig::load()?;
    let catalog = config.build_catalog().await?;
    let kernel = Arc::new(AnalysisKernel::new(
        &config,
        Arc::new(catalog),
        Arc::new(DataFusionEngine::new()),
        config.llm.build_engine(),
    ));
    let _sweeper = kernel.spawn_maintenance();

    let app = app(AppState { kernel });

    let addr: SocketAddr = config.server.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, datasets = config.datasets.len(), "sift HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/analyze", post(analyze))
        .route("/v1/investigate", post(investigate))
        .route("/v1/datasets/:id/invalidate", post(invalidate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<Envelope<AskResponse>>, ApiError> {
    let response = state
        .kernel
        .ask(&req.dataset_id, &req.user_id, &req.question)
        .await?;
    Ok(Json(Envelope::new(response)))
}

async fn investigate(
    State(state): State<AppState>,
    Json(req): Json<InvestigateRequest>,
) -> Result<Json<Envelope<InvestigationResult>>, ApiError> {
    let result = state
        .kernel
        .investigate(
            &req.dataset_id,
            &req.user_id,
            &req.question,
            &req.initial_data,
            req.interpretation.as_ref(),
        )
        .await?;
    Ok(Json(Envelope::new(result)))
}

async fn invalidate(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.kernel.invalidate_dataset(&dataset_id).await;
    Json(json!({ "dataset_id": dataset_id, "removed": removed }))
}
