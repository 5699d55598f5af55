use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// JSON extractor whose rejections are JSON bodies the transport can parse.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let status = rejection.status();
                let message = rejection.body_text();
                tracing::warn!("Rejected interaction body: {}", message);
                Err((
                    status,
                    Json(json!({
                        "outcome": "rejected",
                        "message": message,
                        "status": status.as_u16()
                    })),
                )
                    .into_response())
            }
        }
    }
}
