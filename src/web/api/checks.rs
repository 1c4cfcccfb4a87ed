use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::message::Message;
use crate::metrics;
use crate::web::api::error::{ApiResult, ErrorResponse};
use crate::web::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AbortRequest {
    pub checks: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AbortResponse {
    /// Number of checks persisted and broadcast.
    pub aborted: usize,
}

#[utoipa::path(
    get,
    path = "/checks",
    tag = "checks",
    responses(
        (status = 200, description = "Currently aborted check IDs", body = Vec<String>)
    )
)]
pub async fn list_checks(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.aborted_checks().await)
}

#[utoipa::path(
    post,
    path = "/abort",
    tag = "checks",
    request_body = AbortRequest,
    responses(
        (status = 200, description = "Checks aborted and broadcast", body = AbortResponse),
        (status = 400, description = "Empty check list", body = ErrorResponse),
        (status = 500, description = "Checks could not be persisted", body = ErrorResponse)
    )
)]
pub async fn abort_checks(
    State(state): State<AppState>,
    Json(request): Json<AbortRequest>,
) -> ApiResult<Json<AbortResponse>> {
    state.store.add_aborted_checks(&request.checks).await?;
    metrics::record_notified(request.checks.len());

    for check in &request.checks {
        let msg = Message::abort(check.as_str());
        state.broadcaster.broadcast(&msg).await;
        metrics::record_broadcasted(&msg.action);
    }
    log::info!("Aborted {} checks", request.checks.len());

    Ok(Json(AbortResponse {
        aborted: request.checks.len(),
    }))
}

#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses(
        (status = 200, description = "Service is up")
    )
)]
pub async fn status() {}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "status",
    responses(
        (status = 200, description = "Prometheus text exposition", body = String),
        (status = 404, description = "No metrics recorder installed")
    )
)]
pub async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}
