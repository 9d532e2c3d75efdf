//! Control API (§6): JSON endpoints mounted under `/api` by [`crate::router`] for
//! inspecting and mutating live [`SharedConfig`] state, [`HostStats`] snapshots, and a
//! Store save on every mutation. Grounded in the teacher's `management/admin.rs` JSON
//! surface, translated onto axum's `Router`/`Json` extractors rather than hand-rolled
//! hyper request matching, matching this project's own `metrics.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{LogLevel, SharedConfig};
use crate::error::ProxyError;
use crate::host_stats::HostStats;
use crate::store::{ConfigStore, StoredConfig};

#[derive(Clone)]
pub struct ApiState {
	pub cfg: SharedConfig,
	pub stats: Arc<HostStats>,
	pub store: Arc<dyn ConfigStore>,
}

/// Every route's `MethodRouter` gets an explicit `not_found` fallback so a method the
/// route doesn't list (e.g. `PUT /headers`) answers `404`, per §6, rather than axum's
/// default `405 Method Not Allowed`.
pub fn router(state: ApiState) -> axum::Router {
	axum::Router::new()
		.route(
			"/headers",
			get(get_headers).post(post_header).delete(delete_header).fallback(not_found),
		)
		.route("/loglevel", get(get_loglevel).post(post_loglevel).fallback(not_found))
		.route("/auth", get(get_auth).post(post_auth).fallback(not_found))
		.route("/stats", get(get_stats).post(post_stats).fallback(not_found))
		.route("/debug", get(get_debug).post(post_debug).fallback(not_found))
		.with_state(state)
}

/// Persists the subset of `cfg` the store contract covers; a failure is logged and
/// swallowed, per §7's `StoreWarning`.
async fn persist(state: &ApiState) {
	let cfg = state.cfg.snapshot().await;
	if let Err(e) = state.store.save(&StoredConfig::from_config(&cfg)).await {
		warn!(error = %e, "failed to persist config");
	}
}

#[derive(Serialize)]
struct HeadersResponse {
	global: HashMap<String, String>,
	clients: HashMap<String, HashMap<String, String>>,
}

async fn get_headers(State(state): State<ApiState>) -> Json<HeadersResponse> {
	Json(HeadersResponse {
		global: state.cfg.get_headers().await,
		clients: state.cfg.get_client_headers().await,
	})
}

#[derive(Deserialize)]
struct HeaderWrite {
	name: String,
	value: String,
	client: Option<String>,
}

async fn post_header(State(state): State<ApiState>, Json(body): Json<HeaderWrite>) -> StatusCode {
	match body.client {
		Some(client) => state.cfg.set_client_header(client, body.name, body.value).await,
		None => state.cfg.set_header(body.name, body.value).await,
	}
	persist(&state).await;
	StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct HeaderDelete {
	name: String,
	client: Option<String>,
}

async fn delete_header(State(state): State<ApiState>, Json(body): Json<HeaderDelete>) -> StatusCode {
	match body.client {
		Some(client) => state.cfg.delete_client_header(&client, &body.name).await,
		None => state.cfg.delete_header(&body.name).await,
	}
	persist(&state).await;
	StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct LogLevelResponse {
	level: LogLevel,
}

async fn get_loglevel(State(state): State<ApiState>) -> Json<LogLevelResponse> {
	Json(LogLevelResponse { level: state.cfg.get_log_level().await })
}

#[derive(Deserialize)]
struct LogLevelRequest {
	level: String,
}

async fn post_loglevel(State(state): State<ApiState>, Json(body): Json<LogLevelRequest>) -> StatusCode {
	state.cfg.set_log_level(LogLevel::parse(&body.level)).await;
	StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct AuthResponse {
	enabled: bool,
	username: String,
}

async fn get_auth(State(state): State<ApiState>) -> Json<AuthResponse> {
	let (enabled, username, _) = state.cfg.get_auth().await;
	Json(AuthResponse { enabled, username })
}

#[derive(Deserialize)]
struct AuthRequest {
	enabled: bool,
	username: String,
	password: String,
}

async fn post_auth(State(state): State<ApiState>, Json(body): Json<AuthRequest>) -> StatusCode {
	state.cfg.set_auth(body.enabled, body.username, body.password).await;
	persist(&state).await;
	StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct StatsResponse {
	enabled: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	top: Option<Vec<crate::host_stats::Stat>>,
}

async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
	let enabled = state.cfg.snapshot().await.stats_enabled;
	let top = enabled.then(|| state.stats.top(10));
	Json(StatsResponse { enabled, top })
}

#[derive(Deserialize)]
struct ToggleRequest {
	enabled: bool,
}

async fn post_stats(State(state): State<ApiState>, Json(body): Json<ToggleRequest>) -> StatusCode {
	state.cfg.set_stats_enabled(body.enabled).await;
	StatusCode::NO_CONTENT
}

async fn get_debug(State(state): State<ApiState>) -> Json<ToggleRequest> {
	Json(ToggleRequest { enabled: state.cfg.snapshot().await.debug_logs })
}

async fn post_debug(State(state): State<ApiState>, Json(body): Json<ToggleRequest>) -> StatusCode {
	state.cfg.set_debug_logs(body.enabled).await;
	StatusCode::NO_CONTENT
}

/// Falls back here for any `/api/*` path axum's explicit routes above don't cover, or any
/// method they don't list (e.g. `PUT /headers`) — both read as "unknown method" per §6.
pub async fn not_found() -> Response {
	ProxyError::NotFound.into_response()
}
