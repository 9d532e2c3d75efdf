//! Absolute-URI relay (non-`CONNECT`) and the `CONNECT` tunnel state machine.
//!
//! Grounded in `examples/original_source/internal/proxy/forward.go` for the state
//! sequence (dial → hijack → `200 Connection Established` → bidirectional copy) and in
//! `examples/other_examples/a94a759f_manaflow-ai-manaflow__...-proxy-server.rs.rs`'s
//! `handle_connect` for the idiomatic axum/hyper translation of that sequence: axum has
//! no pre-response raw-socket hijack (Go's `http.Hijacker`), so `HIJACKING` is expressed
//! as `hyper::upgrade::on` and `ESTABLISHED` as a normal `200 OK` response whose body is
//! empty, which is the sanctioned hand-off mechanism for axum/hyper servers. See
//! `DESIGN.md` for why the literal `"Connection Established"` reason phrase is not
//! reproduced byte-for-byte.


use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use http::{StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncWriteExt, copy_bidirectional};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::config::SharedConfig;
use crate::error::{ProxyError, UpstreamError};
use crate::headers::{compose_outbound, sanitize_uri, strip_hop_by_hop};
use crate::reverse::OutboundClient;

#[derive(Clone)]
pub struct ForwardProxy {
	pub client: OutboundClient,
}

impl ForwardProxy {
	pub fn new(client: OutboundClient) -> Self {
		ForwardProxy { client }
	}
}

/// Entry point the router installs for every method on a forward-mode deployment.
/// Dispatches to the tunnel state machine for `CONNECT`, otherwise to the absolute-URI
/// relay.
pub async fn handle(
	state: State<(ForwardProxy, SharedConfig)>,
	addr: ConnectInfo<crate::server::Peer>,
	req: Request,
) -> Response {
	if req.method() == http::Method::CONNECT {
		handle_connect(req).await
	} else {
		handle_relay(state, addr, req).await
	}
}

/// Rejects requests whose URL lacks a scheme or host (relative-form request lines,
/// which a forward proxy never receives legitimately — only a reverse-proxy-shaped
/// client would send one) with `400`, then relays via the shared outbound transport.
async fn handle_relay(
	State((proxy, cfg)): State<(ForwardProxy, SharedConfig)>,
	ConnectInfo(peer): ConnectInfo<crate::server::Peer>,
	mut req: Request,
) -> Response {
	if req.uri().scheme().is_none() || req.uri().host().is_none() {
		return ProxyError::ClientInput(format!("absolute-URI required, got {}", req.uri())).into_response();
	}

	debug!(method = %req.method(), url = %sanitize_uri(req.uri()), "forward proxy request");

	let pending_upgrade = strip_hop_by_hop(&mut req);
	let client_addr = peer.addr.to_string();
	compose_outbound(req.headers_mut(), &client_addr, &client_addr, &cfg).await;

	if let Some(pending) = pending_upgrade {
		return crate::upgrade::relay(req, pending).await;
	}

	match proxy.client.request(req).await {
		Ok(resp) => resp.map(Body::new),
		Err(err) => ProxyError::UpstreamUnreachable(UpstreamError::Request(err)).into_response(),
	}
}

/// `host:port` parsed from a `CONNECT` request's request-target, per RFC 7231 §4.3.6.
fn connect_target(uri: &Uri) -> Option<(String, u16)> {
	let authority = uri.authority()?;
	let host = authority.host().to_string();
	let port = authority.port_u16()?;
	Some((host, port))
}

/// `INIT` → `DIALING` → `HIJACKING` → `ESTABLISHED` → `TUNNELING`, per §4.6.
async fn handle_connect(mut req: Request) -> Response {
	let Some((host, port)) = connect_target(req.uri()) else {
		return ProxyError::ClientInput(format!("invalid CONNECT target {}", req.uri())).into_response();
	};

	// DIALING
	let upstream = match TcpStream::connect((host.as_str(), port)).await {
		Ok(stream) => stream,
		Err(e) => {
			return ProxyError::UpstreamUnreachable(UpstreamError::Dial(e)).into_response();
		},
	};

	// HIJACKING: axum/hyper expose hand-off as an upgrade future rather than a
	// synchronous socket take-over; a missing extension means the connection the
	// request arrived on does not support it.
	if req.extensions().get::<hyper::upgrade::OnUpgrade>().is_none() {
		return ProxyError::HijackUnsupported.into_response();
	}

	tokio::spawn(async move {
		// ESTABLISHED: once this handler returns a bare 200, hyper writes the response
		// line and hands the socket to `on_upgrade`.
		let upgraded = match hyper::upgrade::on(&mut req).await {
			Ok(upgraded) => upgraded,
			Err(e) => {
				error!(error = %e, "CONNECT upgrade failed");
				return;
			},
		};

		// TUNNELING: two independent half-duplex copies; each direction half-closes
		// its own write side on EOF, and the pair releases once both are done.
		let mut client_io = TokioIo::new(upgraded);
		let mut upstream_io = upstream;
		if let Err(e) = copy_bidirectional(&mut client_io, &mut upstream_io).await {
			warn!(error = %e, "CONNECT tunnel closed with error");
		}
		let _ = upstream_io.shutdown().await;
	});

	Response::builder()
		.status(StatusCode::OK)
		.body(Body::empty())
		.expect("static response is well-formed")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn connect_target_parses_host_and_port() {
		let uri: Uri = "example.com:443".parse().unwrap();
		assert_eq!(connect_target(&uri), Some(("example.com".to_string(), 443)));
	}

	#[test]
	fn connect_target_rejects_missing_port() {
		let uri: Uri = "example.com".parse().unwrap();
		assert_eq!(connect_target(&uri), None);
	}
}
