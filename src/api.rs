// src/api.rs
//! Thin JSON surface over the pipeline. Rendering and result caching belong to the client.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::EvalError;
use crate::listing::{EvaluationRun, FilterCriteria};
use crate::pipeline::Evaluator;

#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<Evaluator>,
    /// Overall budget for one run; the pipeline itself only bounds single calls.
    pub run_budget: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/evaluate", post(evaluate))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

pub enum ApiError {
    Eval(EvalError),
    Timeout(Duration),
}

impl From<EvalError> for ApiError {
    fn from(e: EvalError) -> Self {
        ApiError::Eval(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Eval(e) => {
                let status = match e.category() {
                    "scoring_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    ErrorBody {
                        error: e.category(),
                        detail: e.to_string(),
                    },
                )
            }
            ApiError::Timeout(budget) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorBody {
                    error: "run_timeout",
                    detail: format!("evaluation exceeded {}s", budget.as_secs()),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

async fn evaluate(
    State(state): State<AppState>,
    Json(criteria): Json<FilterCriteria>,
) -> Result<Json<EvaluationRun>, ApiError> {
    let run = tokio::time::timeout(state.run_budget, state.evaluator.run(criteria))
        .await
        .map_err(|_| {
            tracing::warn!(budget = ?state.run_budget, "evaluation run timed out");
            ApiError::Timeout(state.run_budget)
        })??;
    Ok(Json(run))
}
