use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::error;

/// The taxonomy of errors the proxy core can surface to a client.
///
/// Background tasks (tunnel copy loops, fan-out publishers) never produce one of these;
/// they log and terminate themselves instead of propagating.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("bad request: {0}")]
	ClientInput(String),

	#[error("authentication required")]
	AuthRequired,

	#[error("not found")]
	NotFound,

	#[error("upstream unreachable: {0}")]
	UpstreamUnreachable(#[from] UpstreamError),

	#[error("connection hijack unsupported")]
	HijackUnsupported,

	#[error("fatal configuration error: {0}")]
	ConfigFatal(String),
}

/// Transport-level failure talking to an upstream. Kept distinct from [`ProxyError`] so
/// call sites that only ever produce this can use `?` without naming the full taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
	#[error("dial failed: {0}")]
	Dial(#[source] std::io::Error),
	#[error("request failed: {0}")]
	Request(#[source] hyper_util::client::legacy::Error),
	#[error("upgrade handshake failed: {0}")]
	Handshake(#[source] hyper::Error),
}

impl IntoResponse for ProxyError {
	fn into_response(self) -> Response {
		match self {
			ProxyError::ClientInput(msg) => {
				(StatusCode::BAD_REQUEST, msg).into_response()
			},
			ProxyError::AuthRequired => {
				let mut resp = (StatusCode::UNAUTHORIZED, "authentication required").into_response();
				resp.headers_mut().insert(
					header::WWW_AUTHENTICATE,
					HeaderValue::from_static("Basic realm=\"proxy\""),
				);
				resp
			},
			ProxyError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
			ProxyError::UpstreamUnreachable(err) => {
				error!(error = %err, "upstream unreachable");
				(StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
			},
			ProxyError::HijackUnsupported => {
				error!("server does not support connection hijack");
				(StatusCode::INTERNAL_SERVER_ERROR, "hijack unsupported").into_response()
			},
			ProxyError::ConfigFatal(msg) => {
				error!(error = %msg, "fatal configuration error");
				(StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
			},
		}
	}
}

/// Store open/load/save failures. Always non-fatal: logged, the proxy keeps running off
/// its in-memory [`crate::config::Config`].
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("crypto error: {0}")]
	Crypto(String),
}
