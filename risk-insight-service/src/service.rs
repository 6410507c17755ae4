use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use risk_insight::{
    AnalysisError, AnalysisResult, InsightSynthesizer, Orchestrator, OpenRouterBackend,
    PubMedClient,
};

use crate::{config::ServiceConfig, models::AnalyzeRequest};

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Wire the production pipeline from config and the OpenRouter API key.
pub fn build_orchestrator(config: &ServiceConfig, api_key: &str) -> Orchestrator {
    let literature = Arc::new(match &config.pubmed_base_url {
        Some(base_url) => PubMedClient::with_base_url(base_url.as_str(), config.search_timeout),
        None => PubMedClient::new(config.search_timeout),
    });
    let backend = Arc::new(OpenRouterBackend::new(api_key, &config.model));
    let synthesizer = InsightSynthesizer::new(backend, config.inference_timeout);
    Orchestrator::new(literature, synthesizer).with_max_abstracts(config.max_abstracts)
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/analyze", post(analyze))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Cancer Risk Insight Service",
        "version": "1.0.0",
        "description": "Literature-grounded cancer risk correlation analysis",
        "endpoints": {
            "POST /analyze": "Analyze a health profile against recent literature",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<AnalysisResult> {
    let Json(request) = payload.map_err(|rejection| {
        bad_request_error(&format!("Invalid input: {}", rejection.body_text()))
    })?;

    info!("received analysis request");

    match state.orchestrator.analyze(request.user_data).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => Err(error_response(&e)),
    }
}

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

/// Map each pipeline error kind to a distinct status and a short,
/// non-technical message, so callers can tell "invalid input" from
/// "nothing found" from "try again".
fn error_response(err: &AnalysisError) -> ApiError {
    match err {
        AnalysisError::InvalidProfile(reason) => {
            bad_request_error(&format!("Invalid input: {reason}"))
        }
        AnalysisError::NoAbstractsFound => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "We couldn't find relevant published research for this profile."
            })),
        ),
        AnalysisError::LiteratureUnavailable(_) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "The research library is temporarily unavailable. Please try again."
            })),
        ),
        AnalysisError::InferenceUnavailable(_) | AnalysisError::MalformedModelOutput { .. } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "The analysis could not be completed. Please retry."
            })),
        ),
    }
}
