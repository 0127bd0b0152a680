use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Body shape shared by every endpoint, success or failure.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    pub message: T,
    pub time: i64,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

pub fn reply<T: Serialize>(status: StatusCode, message: T) -> Response {
    let body = Envelope {
        status: status.as_u16(),
        message,
        time: now_ms(),
    };
    (status, Json(body)).into_response()
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("Access is denied for {method} {path} (IP {ip})")]
    Forbidden {
        method: String,
        path: String,
        ip: String,
    },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("{0}")]
    NotFound(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("task: {0}")]
    Task(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => reply(StatusCode::UNAUTHORIZED, "Invalid API key"),
            AppError::Forbidden { .. } => reply(StatusCode::FORBIDDEN, self.to_string()),
            AppError::InvalidRequest(msg) => reply(StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge => reply(StatusCode::PAYLOAD_TOO_LARGE, "File too large"),
            AppError::NotFound(msg) => reply(StatusCode::NOT_FOUND, msg),
            _ => {
                error!("request failed: {self}");
                reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}
