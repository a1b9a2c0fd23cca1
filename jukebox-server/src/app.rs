//! REST routes and the state shared by every handler.

use crate::session;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jukebox_core::{
    CoreError, EntryId, EntrySnapshot, ErrorCategory, QueueManager, RequestError, ResolvedSource,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<QueueManager>,
    pub sink_count: usize,
}

pub fn router(state: AppState, serve_audio: bool) -> Router {
    let mut router = Router::new()
        .route("/api/health", get(health))
        .route("/api/state", get(current_state))
        .route("/api/queue", get(queue))
        .route("/api/current_song", get(current_song))
        .route("/api/add_song", post(add_song))
        .route("/api/search", get(search))
        .route("/ws", get(session::ws_handler));
    if serve_audio {
        router = router.route("/api/audio/{id}", get(audio));
    }
    router.with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: RequestError,
}

const fn status_for(error: &CoreError) -> StatusCode {
    if matches!(error, CoreError::Cancelled) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match error.category() {
        ErrorCategory::Input => StatusCode::BAD_REQUEST,
        ErrorCategory::Resolution | ErrorCategory::Download | ErrorCategory::Analysis => {
            StatusCode::BAD_GATEWAY
        }
        ErrorCategory::Sink
        | ErrorCategory::Protocol
        | ErrorCategory::Config
        | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: &CoreError) -> Response {
    let body = ErrorBody {
        success: false,
        error: RequestError::new(error.category(), error.to_string()),
    };
    (status_for(error), Json(body)).into_response()
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    sessions: usize,
    sinks: usize,
    queue_length: usize,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        sessions: state.manager.broadcaster().session_count().await,
        sinks: state.sink_count,
        queue_length: state.manager.queue().await.len(),
    })
}

async fn current_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.snapshot().await)
}

#[derive(Serialize)]
struct QueueResponse {
    queue: Vec<EntrySnapshot>,
    current: Option<EntrySnapshot>,
    is_playing: bool,
}

async fn queue(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.manager.snapshot().await;
    Json(QueueResponse {
        queue: snapshot.queue,
        current: snapshot.current,
        is_playing: snapshot.is_playing,
    })
}

async fn current_song(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.current_song().await)
}

#[derive(Debug, Deserialize)]
pub struct AddSongRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub added_by: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddSongResponse {
    success: bool,
    song_id: EntryId,
}

async fn add_song(State(state): State<AppState>, Json(request): Json<AddSongRequest>) -> Response {
    match state.manager.enqueue(&request.url, request.added_by).await {
        Ok(song_id) => Json(AddSongResponse {
            success: true,
            song_id,
        })
        .into_response(),
        Err(e) => api_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    let query = params.q.trim();
    if query.is_empty() {
        return api_error(&CoreError::InvalidInput {
            reason: "search query is empty".to_string(),
        });
    }
    match state
        .manager
        .pipeline()
        .resolver()
        .search_or_resolve(query)
        .await
    {
        Ok(results) => Json(results).into_response(),
        Err(CoreError::ResolveNotFound { .. }) => Json(Vec::<ResolvedSource>::new()).into_response(),
        Err(e) => api_error(&e),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// Downloaded audio so browsers can play along with the clock
async fn audio(State(state): State<AppState>, axum::extract::Path(id): axum::extract::Path<String>) -> Response {
    let Ok(id) = id.parse::<EntryId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(path) = state.manager.audio_path(id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Audio for entry {id} unavailable at {}: {e}", path.display());
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mut response = (
        [(header::CONTENT_TYPE, content_type_for(&path))],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();
    if let Ok(metadata) = tokio::fs::metadata(&path).await {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, metadata.len().into());
    }
    response
}
