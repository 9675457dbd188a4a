//! Informational and control endpoints around the stream.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, Json};
use quickseed_core::streaming::{ReadinessState, SessionError, SessionStats};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::server::AppState;

/// Error body plus status for the JSON API.
pub type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn readiness_label(state: ReadinessState) -> &'static str {
    match state {
        ReadinessState::Initializing => "initializing",
        ReadinessState::Buffering => "buffering",
        ReadinessState::Ready => "ready",
    }
}

pub async fn index_page(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Quickseed</title></head>
<body>
<h1>Quickseed stream server</h1>
<ul>
<li><a href="{url}">/stream</a> - media stream (GET, HEAD, OPTIONS, Range)</li>
<li><a href="/test">/test</a> - liveness check</li>
<li><a href="/info">/info</a> - selected file</li>
<li><a href="/status">/status</a> - session statistics</li>
<li><a href="/files">/files</a> - files in the source</li>
<li>POST /api/select/{{index}} - switch file</li>
<li>POST /api/seek - move the download window</li>
</ul>
</body>
</html>"#,
        url = state.stream_url
    ))
}

pub async fn test_page(State(state): State<AppState>) -> String {
    match state.session.current() {
        Some(active) => format!(
            "Quickseed server is running\nFile: {}\nSize: {} bytes\n",
            active.file.path, active.file.length
        ),
        None => "Quickseed server is running\nNo file selected\n".to_string(),
    }
}

pub async fn stream_info(State(state): State<AppState>) -> Json<Value> {
    let Some(active) = state.session.current() else {
        return Json(json!({
            "error": "No file selected",
            "status": "server_running",
        }));
    };

    let readiness = state.session.readiness();
    let content_type = mime_guess::from_path(&active.file.path).first_or_octet_stream();
    Json(json!({
        "file": active.file.path,
        "size": active.file.length,
        "stream_url": state.stream_url,
        "content_type": content_type.as_ref(),
        "status": readiness_label(readiness.state),
    }))
}

pub async fn session_status(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.session.stats())
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub index: usize,
    pub path: String,
    pub size: u64,
    pub is_video: bool,
    pub selected: bool,
}

pub async fn list_files(State(state): State<AppState>) -> Json<Vec<FileEntry>> {
    let selected = state.session.current().map(|active| active.file.index);
    let files = state
        .session
        .files()
        .into_iter()
        .map(|file| FileEntry {
            index: file.index,
            is_video: file.is_video(),
            selected: selected == Some(file.index),
            size: file.length,
            path: file.path,
        })
        .collect();
    Json(files)
}

/// Switches the stream to another file of the source.
pub async fn select_file(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<Value>, ApiError> {
    match state.session.reselect(index).await {
        Ok(file) => {
            info!("File {} selected through API", index);
            Ok(Json(json!({
                "selected": file,
                "stream_url": state.stream_url,
            })))
        }
        Err(e @ SessionError::IndexOutOfRange { .. }) => {
            Err(api_error(StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e @ SessionError::MetadataUnavailable { .. }) => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => {
            warn!("File selection failed: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// Byte offset within the selected file
    pub offset: u64,
}

/// Moves the download window to a playback position.
pub async fn seek(
    State(state): State<AppState>,
    Json(request): Json<SeekRequest>,
) -> Result<Json<Value>, ApiError> {
    match state.session.seek(request.offset).await {
        Ok(window) => Ok(Json(json!({
            "offset": request.offset,
            "window": window,
        }))),
        Err(e) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
    }
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
