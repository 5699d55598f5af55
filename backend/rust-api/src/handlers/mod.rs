use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

#[derive(Debug, Serialize)]
struct StoreHealth {
    healthy: bool,
    backend: String,
    pending_writes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Liveness plus a bounded backend ping; 503 while the store is unreachable.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = check_store(&state).await;
    let status_code = if store.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if store.healthy { "healthy" } else { "degraded" },
            "service": "quizbot-api",
            "version": env!("CARGO_PKG_VERSION"),
            "questions": state.orchestrator.catalog().len(),
            "cached_users": state.orchestrator.users().len(),
            "dependencies": { "store": store },
        })),
    )
}

async fn check_store(state: &AppState) -> StoreHealth {
    let ping = tokio::time::timeout(Duration::from_secs(1), state.store.ping()).await;
    let error = match ping {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("store ping timed out after 1s".to_string()),
    };
    if let Some(e) = &error {
        tracing::warn!("Health check: store unavailable: {}", e);
    }

    StoreHealth {
        healthy: error.is_none(),
        backend: state.config.database.backend.as_str().to_string(),
        pending_writes: state.store.pending_writes(),
        error,
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic Auth against `quiz.metrics_auth`.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // username:password
    if credentials != state.config.quiz.metrics_auth {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod interactions;
