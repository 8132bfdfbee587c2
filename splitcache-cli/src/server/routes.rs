use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use splitcache_lib::preload::{assignment, is_valid_global_name};

use super::state::AppState;

/// Query string accepted by the preload endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PreloadQuery {
    /// Comma separated split names. Absent or empty means every split.
    pub splits: Option<String>,
    /// Overrides the configured global name.
    pub global: Option<String>,
}

impl PreloadQuery {
    /// Requested global name, or the configured one.
    fn global_name(&self, state: &AppState) -> Result<String, Response> {
        let global = self
            .global
            .clone()
            .unwrap_or_else(|| state.preload.global_name().to_string());
        if is_valid_global_name(&global) {
            Ok(global)
        } else {
            Err((
                StatusCode::BAD_REQUEST,
                format!("invalid global name: {}", global),
            )
                .into_response())
        }
    }

    fn split_names(&self) -> Vec<String> {
        self.splits
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn etag_for(body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    format!("\"{:x}\"", hasher.finalize())
}

fn not_modified(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag || tag.trim() == "*"))
}

fn cached_response(headers: &HeaderMap, content_type: &'static str, body: String) -> Response {
    let etag = etag_for(&body);
    if not_modified(headers, &etag) {
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
    }
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (header::ETAG, etag),
        ],
        body,
    )
        .into_response()
}

// ── Health ───────────────────────────────────────────────────

pub async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.poller.stats().await;
    let synced = stats.updated_at.is_some();
    let status = if synced {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if synced { "ok" } else { "syncing" },
        "running": state.poller.is_running(),
        "splits": stats.splits,
        "segments": stats.segments,
        "since": stats.since,
        "using_segments_count": stats.using_segments_count,
        "subsets": stats.subsets,
        "updated_at": stats.updated_at.map(|t| t.to_rfc3339()),
    });
    (status, Json(body)).into_response()
}

// ── GET /preload ─────────────────────────────────────────────

pub async fn handle_preload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreloadQuery>,
    headers: HeaderMap,
) -> Response {
    let global = query
        .global
        .as_deref()
        .unwrap_or_else(|| state.preload.global_name());
    let names = query.split_names();
    match state.preload.script_for(global, &names).await {
        Ok(script) => cached_response(&headers, "text/html; charset=utf-8", script),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

// ── GET /preload.json ────────────────────────────────────────

pub async fn handle_preload_json(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreloadQuery>,
    headers: HeaderMap,
) -> Response {
    let names = query.split_names();
    let serialized = state.poller.serialized_data(&names).await;
    cached_response(&headers, "application/json", serialized)
}

// ── GET /preload.js ──────────────────────────────────────────

/// Same payload as `/preload` without the surrounding script tag, for
/// pages that load it with `<script src>`.
pub async fn handle_preload_js(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreloadQuery>,
    headers: HeaderMap,
) -> Response {
    let global = match query.global_name(&state) {
        Ok(global) => global,
        Err(response) => return response,
    };

    let names = query.split_names();
    let serialized = state.poller.serialized_data(&names).await;
    let body = assignment(&global, &serialized);
    cached_response(&headers, "application/javascript; charset=utf-8", body)
}
