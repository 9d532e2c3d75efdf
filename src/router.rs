//! Top-level dispatch (§4.8): auth gate, then the reserved `/metrics`, `/api/*`, `/ui`,
//! `/ui/*` prefixes, else the active proxy. Composes the middleware chain from
//! [`crate::middleware`] in the order **Metrics → Auth/Router → Stats → UltraDebug →
//! Debug → Handler** (§4.7) around whichever of [`crate::forward`]/[`crate::reverse`] is
//! installed. Grounded in the teacher's own top-level `Router::new().merge(...).layer(...)`
//! composition style (`crates/agentgateway/src/http/mod.rs`), adapted to this project's
//! single-binary, single-listener shape.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::api::{self, ApiState};
use crate::config::SharedConfig;
use crate::error::ProxyError;
use crate::forward::{self, ForwardProxy};
use crate::host_stats::HostStats;
use crate::metrics::Metrics;
use crate::middleware::{self, HostSource};
use crate::reverse::{self, ReverseProxy};

/// Which proxy mode this deployment installed, decided once at startup from
/// [`crate::config::Mode`] and never swapped at runtime.
pub enum ActiveProxy {
	Forward(ForwardProxy),
	Reverse(Arc<ReverseProxy>),
}

/// Everything [`build`] needs beyond the proxy implementation itself.
pub struct RouterDeps {
	pub cfg: SharedConfig,
	pub stats: Arc<HostStats>,
	pub metrics: Arc<Metrics>,
	pub api_state: ApiState,
}

/// Validates `Authorization`/`Proxy-Authorization: Basic base64(user:pass)` against the
/// live-configured credentials. A no-op when auth is disabled or `username` is empty,
/// matching §4.8 item 1's `auth enabled && username != ""` gate.
async fn auth_gate_middleware(State(cfg): State<SharedConfig>, req: Request, next: Next) -> Response {
	let snapshot = cfg.snapshot().await;
	if !snapshot.auth_enabled || snapshot.username.is_empty() {
		return next.run(req).await;
	}

	if credentials_match(req.headers(), &snapshot.username, &snapshot.password) {
		next.run(req).await
	} else {
		ProxyError::AuthRequired.into_response()
	}
}

/// Decodes `Authorization`/`Proxy-Authorization: Basic base64(user:pass)` and compares it
/// byte-exactly against `username`/`password`. Either header is accepted (§6).
fn credentials_match(headers: &axum::http::HeaderMap, username: &str, password: &str) -> bool {
	headers
		.get(header::AUTHORIZATION)
		.or_else(|| headers.get("proxy-authorization"))
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Basic "))
		.and_then(|b64| BASE64.decode(b64).ok())
		.and_then(|raw| String::from_utf8(raw).ok())
		.and_then(|decoded| decoded.split_once(':').map(|(u, p)| (u.to_string(), p.to_string())))
		.is_some_and(|(user, pass)| user == username && pass == password)
}

async fn ui_not_found() -> Response {
	ProxyError::NotFound.into_response()
}

/// Mounts `/metrics`, `/api` (stripped, delegated to [`api::router`]), and the `/ui`
/// redirect + 404 placeholder shared by both proxy modes.
fn reserved_routes(deps: &RouterDeps, metrics_app: crate::metrics::App) -> Router {
	Router::new()
		.merge(metrics_app.router())
		.nest("/api", api::router(deps.api_state.clone()))
		.route(
			"/ui",
			get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/ui/")]) }),
		)
		.route("/ui/{*rest}", any(ui_not_found))
}

/// Wraps `proxy_router` (a fallback-only router owning the proxy handler's state) with
/// Stats → UltraDebug → Debug, in that outermost-to-innermost order.
fn with_proxy_middlewares(proxy_router: Router, cfg: SharedConfig, stats: Arc<HostStats>, source: HostSource) -> Router {
	proxy_router
		.layer(from_fn_with_state(cfg.clone(), middleware::debug_middleware))
		.layer(from_fn_with_state(cfg.clone(), middleware::ultra_debug_middleware))
		.layer(from_fn_with_state((cfg, stats, source), middleware::stats_middleware))
}

/// Builds the complete router for a forward-mode deployment.
pub fn build_forward(proxy: ForwardProxy, deps: RouterDeps, metrics_app: crate::metrics::App) -> Router {
	let proxy_router = Router::new()
		.fallback(forward::handle)
		.with_state((proxy, deps.cfg.clone()));
	let proxy_router = with_proxy_middlewares(proxy_router, deps.cfg.clone(), deps.stats.clone(), HostSource::Authority);

	reserved_routes(&deps, metrics_app)
		.merge(proxy_router)
		.layer(from_fn_with_state(deps.cfg.clone(), auth_gate_middleware))
		.layer(from_fn_with_state(deps.metrics.clone(), middleware::metrics_middleware))
}

/// Builds the complete router for a reverse-mode deployment.
pub fn build_reverse(proxy: ReverseProxy, deps: RouterDeps, metrics_app: crate::metrics::App) -> Router {
	let target_host: Arc<str> = Arc::from(proxy.target_host());
	let proxy = Arc::new(proxy);
	let proxy_router = Router::new()
		.fallback(reverse::handle)
		.with_state((proxy, deps.cfg.clone()));
	let proxy_router =
		with_proxy_middlewares(proxy_router, deps.cfg.clone(), deps.stats.clone(), HostSource::Fixed(target_host));

	reserved_routes(&deps, metrics_app)
		.merge(proxy_router)
		.layer(from_fn_with_state(deps.cfg.clone(), auth_gate_middleware))
		.layer(from_fn_with_state(deps.metrics.clone(), middleware::metrics_middleware))
}

/// Builds the complete router for whichever mode is active, the entry point `main` calls.
pub fn build(proxy: ActiveProxy, deps: RouterDeps, metrics_app: crate::metrics::App) -> Router {
	match proxy {
		ActiveProxy::Forward(p) => build_forward(p, deps, metrics_app),
		ActiveProxy::Reverse(p) => build_reverse(p, deps, metrics_app),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use http::HeaderMap;

	fn basic_header(user: &str, pass: &str) -> String {
		format!("Basic {}", BASE64.encode(format!("{user}:{pass}")))
	}

	#[test]
	fn credentials_match_accepts_correct_basic_auth() {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, basic_header("alice", "secret").parse().unwrap());
		assert!(credentials_match(&headers, "alice", "secret"));
	}

	#[test]
	fn credentials_match_accepts_proxy_authorization_header() {
		let mut headers = HeaderMap::new();
		headers.insert("proxy-authorization", basic_header("alice", "secret").parse().unwrap());
		assert!(credentials_match(&headers, "alice", "secret"));
	}

	#[test]
	fn credentials_match_rejects_wrong_password() {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, basic_header("alice", "wrong").parse().unwrap());
		assert!(!credentials_match(&headers, "alice", "secret"));
	}

	#[test]
	fn credentials_match_rejects_missing_header() {
		let headers = HeaderMap::new();
		assert!(!credentials_match(&headers, "alice", "secret"));
	}
}
