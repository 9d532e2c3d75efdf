//! End-to-end reverse-mode scenarios: header injection onto the upstream request and
//! verbatim body relay back to the client, and the `502` an unreachable upstream produces.

mod common;

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use http::StatusCode;

use proxyd::config::{Config, Mode};

use common::{TestProxy, http_client, read_body, spawn_backend};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Option<HeaderMap>>>);

async fn capture_and_echo(State(captured): State<Captured>, headers: HeaderMap) -> &'static str {
	*captured.0.lock().unwrap() = Some(headers);
	"hello from backend"
}

#[tokio::test]
async fn reverse_proxy_injects_configured_headers_and_forwards_body() {
	let captured = Captured::default();
	let backend_router = Router::new().route("/", get(capture_and_echo)).with_state(captured.clone());
	let backend_addr = spawn_backend(backend_router).await;

	let mut cfg = Config { mode: Mode::Reverse, target_url: format!("http://{backend_addr}"), ..Config::default() };
	cfg.headers.insert("X-Injected".into(), "from-proxy".into());

	let proxy = TestProxy::start(cfg).await;
	let client = http_client();

	let req = http::Request::builder()
		.uri(format!("{}/", proxy.base_url()))
		.body(axum::body::Body::empty())
		.unwrap();
	let resp = client.request(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	assert_eq!(read_body(resp).await, "hello from backend");

	let headers = captured.0.lock().unwrap().take().expect("backend observed a request");
	assert_eq!(headers.get("x-injected").unwrap(), "from-proxy");
	assert!(headers.get("x-forwarded-for").is_some());
}

#[tokio::test]
async fn reverse_proxy_returns_bad_gateway_when_upstream_is_down() {
	// Bind then drop to obtain an ephemeral port nothing is listening on.
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let dead_addr = listener.local_addr().unwrap();
	drop(listener);

	let cfg = Config { mode: Mode::Reverse, target_url: format!("http://{dead_addr}"), ..Config::default() };
	let proxy = TestProxy::start(cfg).await;
	let client = http_client();

	let req = http::Request::builder()
		.uri(format!("{}/", proxy.base_url()))
		.body(axum::body::Body::empty())
		.unwrap();
	let resp = client.request(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}
