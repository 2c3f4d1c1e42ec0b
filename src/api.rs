use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tokio_util::sync::CancellationToken;

use crate::connectivity::check_connectivity;
use crate::error::UserFacing;
use crate::orchestrator::{Orchestrator, RecommendationResult};
use crate::report;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/connectivity", get(connectivity))
        .route("/recommend", post(recommend))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RecommendReq {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Serialize)]
struct RecommendResp {
    result: RecommendationResult,
    text: String,
}

#[derive(Serialize)]
struct ErrorResp {
    category: UserFacing,
    message: &'static str,
}

fn status_for(category: UserFacing) -> StatusCode {
    match category {
        UserFacing::InvalidLocation => StatusCode::UNPROCESSABLE_ENTITY,
        UserFacing::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        UserFacing::ServiceMisconfigured => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(category: UserFacing) -> Response {
    let body = ErrorResp {
        category,
        message: category.message(),
    };
    (status_for(category), Json(body)).into_response()
}

async fn connectivity(State(state): State<AppState>) -> Response {
    let o = &state.orchestrator;
    let report = check_connectivity(o.probe(), o.targets()).await;
    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn recommend(State(state): State<AppState>, Json(body): Json<RecommendReq>) -> Response {
    // Dropping this future (client gone) detaches from the flight.
    let cancel = CancellationToken::new();
    match state
        .orchestrator
        .recommend_at(&body.user_id, body.latitude, body.longitude, &cancel)
        .await
    {
        Ok(result) => {
            let text = report::render(&result);
            Json(RecommendResp { result, text }).into_response()
        }
        Err(failure) => error_response(failure.category()),
    }
}
