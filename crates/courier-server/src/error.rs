use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_shared::ProtocolError;
use courier_store::StoreError;

use crate::auth::AuthError;
use crate::delivery::DeliveryError;
use crate::presence::PresenceError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DeliveryError> for ServerError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Invalid(e) => ServerError::BadRequest(e.to_string()),
            DeliveryError::Persist(e) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        ServerError::Internal(format!("Store: {err}"))
    }
}

impl From<PresenceError> for ServerError {
    fn from(err: PresenceError) -> Self {
        ServerError::Internal(format!("Presence: {err}"))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
