//! Debug log, metrics recorder, host-stats recorder, and ultra-debug request dumper,
//! composed outermost-first as **Metrics → Auth/Router → Stats → UltraDebug → Debug →
//! Handler** (§4.7). Each reads its enable flag live off [`SharedConfig`] on every
//! request rather than snapshotting it at construction time, since the control API can
//! flip these flags at any moment (§9's "callback-style enabled toggles" redesign note).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::config::SharedConfig;
use crate::headers::sanitize_uri;
use crate::host_stats::HostStats;
use crate::metrics::Metrics;
use crate::server::Peer;

/// `method sanitized-url status duration`, logged only for plain-HTTP, non-`CONNECT`
/// requests once `debugLogs` is enabled.
pub async fn debug_middleware(
	State(cfg): State<SharedConfig>,
	ConnectInfo(peer): ConnectInfo<Peer>,
	req: Request,
	next: Next,
) -> Response {
	let enabled = cfg.snapshot().await.debug_logs;
	let applies = enabled && !peer.is_tls && req.method() != Method::CONNECT;
	let method = req.method().clone();
	let url = sanitize_uri(req.uri());
	let start = Instant::now();

	let resp = next.run(req).await;

	if applies {
		debug!(%method, %url, status = %resp.status(), elapsed = ?start.elapsed(), "proxy request");
	}
	resp
}

/// Dumps the full request (headers + a body-preserving read) and the final status, once
/// `ultraDebug` is enabled, for plain-HTTP non-`CONNECT` requests.
pub async fn ultra_debug_middleware(
	State(cfg): State<SharedConfig>,
	ConnectInfo(peer): ConnectInfo<Peer>,
	req: Request,
	next: Next,
) -> Response {
	let enabled = cfg.snapshot().await.ultra_debug;
	let applies = enabled && !peer.is_tls && req.method() != Method::CONNECT;

	let req = if applies {
		let (parts, body) = req.into_parts();
		let bytes = match axum::body::to_bytes(body, usize::MAX).await {
			Ok(b) => b,
			Err(e) => {
				debug!(error = %e, "ultra debug: failed to buffer request body");
				return axum::http::StatusCode::BAD_REQUEST.into_response();
			},
		};
		debug!(headers = ?parts.headers, body = %String::from_utf8_lossy(&bytes), "ultra debug request dump");
		Request::from_parts(parts, Body::from(bytes))
	} else {
		req
	};

	let resp = next.run(req).await;
	if applies {
		debug!(status = %resp.status(), "ultra debug response status");
	}
	resp
}

/// Determines the host a request should be attributed to for [`HostStats`]: the
/// authority of an absolute-URI (forward mode, including `CONNECT`'s `host:port`
/// request-target) or the configured reverse-proxy target host. Trailing `:port` is
/// stripped either way.
#[derive(Clone)]
pub enum HostSource {
	Authority,
	Fixed(Arc<str>),
}

impl HostSource {
	fn host_for(&self, req: &Request) -> String {
		let raw = match self {
			HostSource::Authority => req
				.uri()
				.authority()
				.map(|a| a.host().to_string())
				.or_else(|| {
					req
						.headers()
						.get(axum::http::header::HOST)
						.and_then(|v| v.to_str().ok())
						.map(|s| s.to_string())
				})
				.unwrap_or_default(),
			HostSource::Fixed(host) => host.to_string(),
		};
		raw.rsplit_once(':').map(|(host, _)| host.to_string()).unwrap_or(raw)
	}
}

/// Records one hit against [`HostStats`] per request, when `statsEnabled`. Applies to
/// every method, including `CONNECT` (§4.7), unlike debug/ultra-debug.
pub async fn stats_middleware(
	State((cfg, stats, source)): State<(SharedConfig, Arc<HostStats>, HostSource)>,
	req: Request,
	next: Next,
) -> Response {
	if cfg.snapshot().await.stats_enabled {
		let host = source.host_for(&req);
		stats.record(&host);
	}
	next.run(req).await
}

/// Always-on: records `(method, status)` and a duration observation per completed
/// request.
pub async fn metrics_middleware(
	State(metrics): State<Arc<Metrics>>,
	req: Request,
	next: Next,
) -> Response {
	let method = req.method().to_string();
	let start = Instant::now();
	let resp = next.run(req).await;
	metrics.record_request(&method, resp.status(), start.elapsed());
	resp
}

#[cfg(test)]
mod tests {
	use super::*;
	use http::Request as HttpRequest;

	#[test]
	fn host_source_authority_strips_port() {
		let req = HttpRequest::builder()
			.uri("http://example.com:8080/path")
			.body(Body::empty())
			.unwrap();
		assert_eq!(HostSource::Authority.host_for(&req), "example.com");
	}

	#[test]
	fn host_source_fixed_ignores_request_uri() {
		let req = HttpRequest::builder().uri("/path").body(Body::empty()).unwrap();
		assert_eq!(HostSource::Fixed("backend.local".into()).host_for(&req), "backend.local");
	}

	#[test]
	fn host_source_authority_falls_back_to_host_header() {
		let req = HttpRequest::builder()
			.uri("example.com:443")
			.header(axum::http::header::HOST, "example.com:443")
			.body(Body::empty())
			.unwrap();
		assert_eq!(HostSource::Authority.host_for(&req), "example.com");
	}
}
