//! Generic HTTP `Upgrade` tunnelling (e.g. a WebSocket handshake), the non-`CONNECT`
//! sibling of [`crate::forward`]'s tunnel state machine: the request still looks like an
//! ordinary HTTP/1.1 request, but a `101 Switching Protocols` response means the socket
//! stops being HTTP from that point on.
//!
//! The teacher's own `hop_by_hop_headers`/`handle_upgrade` pair
//! (`crates/agentgateway/src/proxy/httpproxy.rs`) relays upgrades through its pooled
//! outbound client, but that client is backed by an in-tree fork of `hyper-util`
//! (`crates/hyper-util-fork`) purpose-built to carry an `OnUpgrade` extension through the
//! pool. Forking a whole HTTP client crate to get one extension through is disproportionate
//! here, so this dials a dedicated, unpooled connection per upgrade request instead,
//! following the pattern in hyper's own canonical client example
//! (`examples/hyperium-hyper/examples/upgrades.rs`: `hyper::client::conn::http1::handshake`
//! plus `Connection::with_upgrades`) — the same trade the `CONNECT` tunnel in
//! `crate::forward` already makes by dialing its own `TcpStream` rather than going through
//! the shared outbound client.

use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::{StatusCode, Uri, header};
use hyper::client::conn::http1;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tracing::{error, warn};

use crate::error::{ProxyError, UpstreamError};
use crate::headers::PendingUpgrade;

/// `host:port` to dial for `uri`, defaulting the port from the scheme when the rewritten
/// request carries none. `uri` is expected to already be in absolute-form (reverse mode
/// rewrites onto the target, forward mode's request-target already is one).
fn target_authority(uri: &Uri) -> Option<(String, u16)> {
	let authority = uri.authority()?;
	let host = authority.host().to_string();
	let port = authority
		.port_u16()
		.unwrap_or(if uri.scheme_str() == Some("https") { 443 } else { 80 });
	Some((host, port))
}

/// Dials `req`'s target directly and relays it over a one-off connection kept alive with
/// [`http1::Builder::with_upgrades`] enabled, so that if the upstream answers `101` the
/// response's [`OnUpgrade`] future actually resolves. Falls back to returning whatever
/// ordinary response the upstream sent (including a non-101 status, meaning it declined
/// the upgrade) with no special handling.
pub async fn relay(req: Request, pending: PendingUpgrade) -> Response {
	let Some((host, port)) = target_authority(req.uri()) else {
		return ProxyError::ClientInput(format!("upgrade request missing host:port: {}", req.uri())).into_response();
	};

	let stream = match TcpStream::connect((host.as_str(), port)).await {
		Ok(stream) => stream,
		Err(e) => return ProxyError::UpstreamUnreachable(UpstreamError::Dial(e)).into_response(),
	};

	let (mut sender, conn) = match http1::handshake(TokioIo::new(stream)).await {
		Ok(pair) => pair,
		Err(e) => return ProxyError::UpstreamUnreachable(UpstreamError::Handshake(e)).into_response(),
	};
	tokio::spawn(async move {
		if let Err(e) = conn.with_upgrades().await {
			warn!(error = %e, "upgrade-dedicated connection ended with an error");
		}
	});

	let mut resp = match sender.send_request(req).await {
		Ok(resp) => resp,
		Err(e) => return ProxyError::UpstreamUnreachable(UpstreamError::Handshake(e)).into_response(),
	};

	let upstream_agreed = resp.status() == StatusCode::SWITCHING_PROTOCOLS
		&& resp.headers().get(header::UPGRADE).is_some_and(|v| v == &pending.upgrade_type);

	if upstream_agreed {
		if let Some(upstream_on_upgrade) = resp.extensions_mut().remove::<OnUpgrade>() {
			tokio::spawn(async move { tunnel(pending, upstream_on_upgrade).await });
		}
	}

	resp.map(Body::new)
}

/// Waits for both halves of the handshake to actually switch, then copies bytes until
/// either side closes. Mirrors `crate::forward::handle_connect`'s `TUNNELING` stage.
async fn tunnel(pending: PendingUpgrade, upstream_on_upgrade: OnUpgrade) {
	let client_upgraded = match pending.on_upgrade.await {
		Ok(upgraded) => upgraded,
		Err(e) => {
			error!(error = %e, "client side of upgrade tunnel failed");
			return;
		},
	};
	let upstream_upgraded = match upstream_on_upgrade.await {
		Ok(upgraded) => upgraded,
		Err(e) => {
			error!(error = %e, "upstream side of upgrade tunnel failed");
			return;
		},
	};

	let mut client_io = TokioIo::new(client_upgraded);
	let mut upstream_io = TokioIo::new(upstream_upgraded);
	if let Err(e) = copy_bidirectional(&mut client_io, &mut upstream_io).await {
		warn!(error = %e, "upgrade tunnel closed with error");
	}
}
