use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use crate::data_models::IndexStats;
use crate::errors::PipelineError;
use crate::orchestrator::{Orchestrator, PipelineOptions};

use super::models::{ErrorResponse, QueryRequest, QueryResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Upper bounds on the per-request knobs.
pub const MAX_NUM_RESULTS: usize = 50;
pub const MAX_TOP_K: usize = 100;

fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::EmptyQuery => StatusCode::BAD_REQUEST,
        PipelineError::SearchFailed { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::NoValidUrls | PipelineError::NoUsableContent => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Index(_) | PipelineError::System(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: &PipelineError) -> ApiError {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
            kind: error.kind().to_string(),
        }),
    )
}

pub async fn query_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(api_error(&PipelineError::EmptyQuery));
    }

    let defaults = orchestrator.default_options();
    let options = PipelineOptions {
        num_results: request
            .num_results
            .unwrap_or(defaults.num_results)
            .clamp(1, MAX_NUM_RESULTS),
        search_first: request.search_first.unwrap_or(defaults.search_first),
        top_k: request.top_k.unwrap_or(defaults.top_k).clamp(1, MAX_TOP_K),
    };

    let mut outcome = orchestrator.run(&request.query, options).await;
    if let Some(failure) = outcome.failure.take() {
        return Err(api_error(&failure));
    }
    QueryResponse::from_outcome(outcome).map(Json).ok_or_else(|| {
        api_error(&PipelineError::System(
            "pipeline finished without a result".to_string(),
        ))
    })
}

pub async fn stats_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<IndexStats> {
    Json(orchestrator.indexer().stats().await)
}
