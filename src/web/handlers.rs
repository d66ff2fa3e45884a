//! File, stream, and admin endpoints.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::buffer::BufferConfig;
use crate::errors::AppError;
use crate::logsink::Event;
use crate::scheduler;

use super::AppState;

/// Serve the merged playlist. When file authentication is enabled the
/// `username`/`password` query parameters must match a stored
/// credential.
pub async fn serve_m3u(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if file != "tvmux.m3u" {
        return not_found(&file);
    }
    let auth_required = state.context.settings.read().await.auth_files;
    if auth_required {
        let username = params.get("username").map(String::as_str).unwrap_or("");
        let password = params.get("password").map(String::as_str).unwrap_or("");
        let authorized = state
            .context
            .data
            .read()
            .await
            .credentials
            .iter()
            .any(|c| c.username == username && c.password == password);
        if !authorized {
            return (StatusCode::FORBIDDEN, "invalid credentials").into_response();
        }
    }
    serve_data_file(&state, &file, "audio/x-mpegurl").await
}

/// Serve the merged guide, plain or gzipped.
pub async fn serve_xmltv(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    match file.as_str() {
        "tvmux.xml" => serve_data_file(&state, &file, "application/xml").await,
        "tvmux.xml.gz" => serve_data_file(&state, &file, "application/gzip").await,
        _ => not_found(&file),
    }
}

async fn serve_data_file(state: &AppState, file: &str, content_type: &str) -> Response {
    let path = state.context.paths.root().join(file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type.to_string())],
            bytes,
        )
            .into_response(),
        Err(_) => not_found(file),
    }
}

/// Resolve a stream id and fan the upstream out to this client.
pub async fn stream(State(state): State<AppState>, Path(url_id): Path<String>) -> Response {
    let resolved = {
        let data = state.context.data.read().await;
        data.urls
            .get(&url_id)
            .map(|entry| (entry.url.clone(), entry.playlist_id.clone()))
    };
    let Some((upstream_url, playlist_id)) = resolved else {
        warn!("stream request for unknown id {url_id}");
        return not_found(&url_id);
    };

    let config = BufferConfig::from_settings(&*state.context.settings.read().await);
    let reader = match state.streams.open_stream(&playlist_id, &upstream_url, config) {
        Ok(reader) => reader,
        Err(e) => {
            error!("failed to open stream {url_id}: {e}");
            state.context.log.error(format!("stream {url_id}: {e}"));
            return (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response();
        }
    };

    let log = state.context.log.clone();
    let body = futures::stream::unfold(Some(reader), move |slot| {
        let log = log.clone();
        async move {
            let mut reader = slot?;
            match reader.next_segment().await {
                Ok(Some(bytes)) => Some((Ok::<Bytes, std::io::Error>(bytes), Some(reader))),
                Ok(None) => None,
                Err(e) => {
                    log.error(format!("stream aborted: {e}"));
                    Some((
                        Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
                        None,
                    ))
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub scan_in_progress: bool,
    pub active_streams: usize,
    pub channels: usize,
    pub active_channels: usize,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let data = state.context.data.read().await;
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        scan_in_progress: state.context.scan_in_progress(),
        active_streams: state.streams.active_sessions(),
        channels: data.xepg.channels.len(),
        active_channels: data.xepg.channels.values().filter(|c| c.x_active).count(),
    })
}

pub async fn event_log(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.context.log.events())
}

/// Kick a refresh cycle. Returns a busy status instead of blocking
/// when one is already running.
pub async fn trigger_update(State(state): State<AppState>) -> Response {
    match scheduler::run_refresh(&state.context).await {
        Ok(report) => Json(json!({
            "status": "ok",
            "matched": report.matched,
            "created": report.created,
            "deleted": report.deleted,
        }))
        .into_response(),
        Err(AppError::ScanInProgress) => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "busy" })),
        )
            .into_response(),
        Err(e) => {
            state.context.log.error(format!("refresh failed: {e}"));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("not found: {what}")).into_response()
}
