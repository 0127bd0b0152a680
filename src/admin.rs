use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, OriginalUri, Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::fs;
use tracing::warn;

use crate::{
    error::{reply, AppError},
    routes::{request_target, AppState},
};

/// Rejects every `/admin` request whose peer address is not on the allowlist.
pub async fn gate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());
    let allowed = ip
        .as_deref()
        .is_some_and(|ip| state.config.admin_ips.iter().any(|a| a == ip));
    if !allowed {
        let path = req
            .extensions()
            .get::<OriginalUri>()
            .map(|u| request_target(&u.0))
            .unwrap_or_else(|| request_target(req.uri()));
        let ip = ip.unwrap_or_else(|| "unknown".to_string());
        warn!("admin access denied: {} {} from {}", req.method(), path, ip);
        return Err(AppError::Forbidden {
            method: req.method().to_string(),
            path,
            ip,
        });
    }
    Ok(next.run(req).await)
}

pub async fn list_files(State(state): State<AppState>) -> Result<Response, AppError> {
    let mut entries = fs::read_dir(&state.config.file_store).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(reply(StatusCode::OK, names))
}

pub async fn list_keys(State(state): State<AppState>) -> impl IntoResponse {
    reply(StatusCode::OK, state.keys.list().await)
}

pub async fn create_key(State(state): State<AppState>) -> Result<Response, AppError> {
    let key = state.keys.add().await?;
    Ok(reply(StatusCode::OK, key))
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    if !state.keys.remove(&key).await? {
        return Err(AppError::NotFound(format!("Key {key} does not exist")));
    }
    Ok(reply(StatusCode::OK, key))
}
