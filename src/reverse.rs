//! Single-host reverse proxy: rewrites every inbound request onto the configured
//! `target_url` and relays it, streaming the response back without buffering the whole
//! body. Grounded in the original `httputil.NewSingleHostReverseProxy` director
//! (`examples/original_source/internal/proxy/proxy.go`) translated onto the teacher's
//! `hyper_util::client::legacy::Client` outbound-transport idiom.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use http::Uri;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::config::SharedConfig;
use crate::error::{ProxyError, UpstreamError};
use crate::headers::{compose_outbound, sanitize_uri, strip_hop_by_hop};

pub type OutboundClient = Client<HttpConnector, Body>;

pub fn build_outbound_client() -> OutboundClient {
	Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Everything the reverse-proxy handler needs beyond the shared [`SharedConfig`].
#[derive(Clone)]
pub struct ReverseProxy {
	pub client: OutboundClient,
	pub target: Uri,
}

impl ReverseProxy {
	pub fn new(client: OutboundClient, target_url: &str) -> Result<Self, ProxyError> {
		let target: Uri = target_url
			.parse()
			.map_err(|e| ProxyError::ConfigFatal(format!("unparseable target url {target_url}: {e}")))?;
		if target.scheme().is_none() || target.host().is_none() {
			return Err(ProxyError::ConfigFatal(format!(
				"target url {target_url} is missing scheme or host"
			)));
		}
		Ok(ReverseProxy { client, target })
	}

	pub fn target_host(&self) -> &str {
		self.target.host().unwrap_or_default()
	}

	/// Rewrites `req_uri`'s scheme/host onto the target and joins `target.path` +
	/// `req_uri.path` with exactly one slash; the query string is preserved verbatim.
	fn rewrite_uri(&self, req_uri: &Uri) -> Result<Uri, ProxyError> {
		let target_path = self.target.path().trim_end_matches('/');
		let req_path = req_uri.path();
		let joined = if req_path.starts_with('/') {
			format!("{target_path}{req_path}")
		} else {
			format!("{target_path}/{req_path}")
		};
		let mut out = format!(
			"{}://{}{}",
			self.target.scheme_str().unwrap_or("http"),
			self.target.authority().map(|a| a.as_str()).unwrap_or(""),
			joined
		);
		if let Some(query) = req_uri.query() {
			out.push('?');
			out.push_str(query);
		}
		out
			.parse()
			.map_err(|e| ProxyError::ConfigFatal(format!("rewritten uri invalid: {e}")))
	}
}

pub async fn handle(
	State((proxy, cfg)): State<(Arc<ReverseProxy>, SharedConfig)>,
	ConnectInfo(peer): ConnectInfo<crate::server::Peer>,
	mut req: Request,
) -> Response {
	debug!(method = %req.method(), url = %sanitize_uri(req.uri()), "reverse proxy request");

	if cfg.snapshot().await.ultra_debug {
		debug!(request = ?req, "ultra debug request dump");
	}

	let new_uri = match proxy.rewrite_uri(req.uri()) {
		Ok(uri) => uri,
		Err(err) => return err.into_response(),
	};

	*req.uri_mut() = new_uri;
	if let Some(host) = proxy.target.host() {
		if let Ok(value) = http::HeaderValue::from_str(host) {
			req.headers_mut().insert(http::header::HOST, value);
		}
	}

	let pending_upgrade = strip_hop_by_hop(&mut req);
	let client_addr = peer.addr.to_string();
	compose_outbound(req.headers_mut(), &client_addr, &client_addr, &cfg).await;

	if let Some(pending) = pending_upgrade {
		return crate::upgrade::relay(req, pending).await;
	}

	match proxy.client.request(req).await {
		Ok(resp) => resp.map(Body::new),
		Err(err) => {
			ProxyError::UpstreamUnreachable(UpstreamError::Request(err)).into_response()
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rewrite_uri_joins_paths_with_single_slash() {
		let proxy = ReverseProxy {
			client: build_outbound_client(),
			target: "http://backend.local/base".parse().unwrap(),
		};
		let rewritten = proxy.rewrite_uri(&"/path?x=1".parse().unwrap()).unwrap();
		assert_eq!(rewritten.to_string(), "http://backend.local/base/path?x=1");
	}

	#[test]
	fn rewrite_uri_preserves_query_and_strips_double_slash() {
		let proxy = ReverseProxy {
			client: build_outbound_client(),
			target: "http://backend.local/".parse().unwrap(),
		};
		let rewritten = proxy.rewrite_uri(&"/".parse().unwrap()).unwrap();
		assert_eq!(rewritten.to_string(), "http://backend.local/");
	}

	#[test]
	fn new_rejects_target_without_host() {
		let result = ReverseProxy::new(build_outbound_client(), "/just/a/path");
		assert!(result.is_err());
	}
}
