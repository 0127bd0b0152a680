use std::{path::Path as FsPath, sync::Arc};

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, OriginalUri, Path, State,
    },
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    admin,
    config::Config,
    error::{reply, AppError},
    keys::KeyStore,
    names,
};

/// Process-wide state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub keys: Arc<KeyStore>,
}

impl AppState {
    pub fn new(config: Config, keys: KeyStore) -> Self {
        Self {
            config: Arc::new(config),
            keys: Arc::new(keys),
        }
    }

    /// Public name of the key store, which the read path must never serve.
    fn shielded_name(&self) -> Option<&str> {
        self.keys.path().file_name().and_then(|n| n.to_str())
    }
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);

    let admin_routes = Router::new()
        .route("/ls", get(admin::list_files).fallback(not_found))
        .route(
            "/keys",
            get(admin::list_keys)
                .post(admin::create_key)
                .fallback(not_found),
        )
        .route("/keys/{key}", delete(admin::delete_key).fallback(not_found))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), admin::gate));

    Router::new()
        .route(
            "/upload",
            post(upload)
                .fallback(not_found)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/{name}", get(serve_file).fallback(not_found))
        .nest("/admin", admin_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Path plus query string, as the client sent it.
pub fn request_target(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

pub async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(format!("Cannot {method} {}", request_target(&uri)))
}

async fn serve_file(
    State(state): State<AppState>,
    method: Method,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let missing = || AppError::NotFound(format!("Cannot {method} /{name}"));
    if state.shielded_name() == Some(name.as_str()) || !names::is_servable(&name) {
        return Err(missing());
    }

    let file = match fs::File::open(state.config.file_store.join(&name)).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(missing());
    }

    let headers = [
        (header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.to_string()),
        (header::CONTENT_LENGTH, meta.len().to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Accepts a bare token or `Bearer <token>` in `Authorization`.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => raw[7..].trim(),
        _ => raw,
    };
    (!token.is_empty()).then(|| token.to_string())
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::InvalidRequest(e.body_text())
    }
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    if state.config.require_api_key {
        let token = token_from_headers(&headers).ok_or(AppError::Unauthorized)?;
        if !state.keys.contains(&token).await {
            return Err(AppError::Unauthorized);
        }
    }

    let mut multipart = multipart.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let original = match (field.name(), field.file_name()) {
            (Some("file"), Some(original)) => original.to_string(),
            _ => continue,
        };
        let name = names::generate(&original);
        let size = store_field(&state.config.file_store, &name, field).await?;
        info!("stored upload {name} ({size} bytes)");
        return Ok(reply(StatusCode::OK, name));
    }
    Err(AppError::InvalidRequest("File not uploaded".to_string()))
}

/// Streams `field` into a new entry; a partial file is removed on failure.
async fn store_field(dir: &FsPath, name: &str, mut field: Field<'_>) -> Result<u64, AppError> {
    let path = dir.join(name);
    let mut out = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;

    let written = async {
        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            size += chunk.len() as u64;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok::<u64, AppError>(size)
    }
    .await;

    if written.is_err() {
        let _ = fs::remove_file(&path).await;
    }
    written
}
