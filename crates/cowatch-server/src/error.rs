use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use cowatch_core::net::messages::{ErrorMsg, error_code};

use crate::store::StoreError;

/// Failures of room operations, reported to the socket as an `error` event.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("room {room_code} not found")]
    RoomNotFound { room_code: String },
    #[error("invalid room code")]
    InvalidRoomCode,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn to_error_msg(&self) -> ErrorMsg {
        let code = match self {
            Self::RoomNotFound { .. } => error_code::ROOM_NOT_FOUND,
            Self::InvalidRoomCode => error_code::INVALID_ROOM_CODE,
            Self::Store(_) => error_code::UNAVAILABLE,
        };
        let message = match self {
            Self::Store(_) => "Room service temporarily unavailable".to_string(),
            other => other.to_string(),
        };
        ErrorMsg {
            code: code.to_string(),
            message,
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m) | Self::NotFound(m) | Self::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        tracing::warn!(error = %e, "Store error while serving request");
        Self::Internal("store unavailable".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
