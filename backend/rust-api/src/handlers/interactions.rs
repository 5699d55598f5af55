use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use validator::Validate;

use crate::extractors::AppJson;
use crate::models::interaction::{InteractionRequest, Outcome};
use crate::services::AppState;

fn status_for(outcome: Outcome) -> StatusCode {
    match outcome {
        Outcome::Success => StatusCode::OK,
        Outcome::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Outcome::TransientFailure => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Synchronous request/response contract for the chat transport.
pub async fn handle_interaction(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<InteractionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    tracing::debug!(
        "Interaction: user_id={}, kind={}",
        req.user_id,
        req.kind.as_str()
    );

    let response = state.orchestrator.dispatch(req).await;
    Ok((status_for(response.outcome), Json(response)))
}
