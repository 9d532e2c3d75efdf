//! Shared black-box test harness: spins up a real proxy instance bound to a loopback
//! ephemeral port and a handful of minimal fake-upstream servers, so integration tests
//! exercise the actual HTTP surface (real sockets, real `hyper` client) rather than
//! calling handlers in-process. Deliberately `wiremock`-free — fake upstreams are just
//! `axum::Router`s bound via `tokio::net::TcpListener::bind("127.0.0.1:0")`, the same
//! pattern the proxy's own listener uses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::response::Response;
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

use proxyd::api::ApiState;
use proxyd::config::{Config, Mode, SharedConfig};
use proxyd::conn_tracker::ConnTracker;
use proxyd::error::StoreError;
use proxyd::forward::ForwardProxy;
use proxyd::host_stats::HostStats;
use proxyd::metrics::{App as MetricsApp, Metrics};
use proxyd::reverse::{self, ReverseProxy};
use proxyd::router::{self, ActiveProxy, RouterDeps};
use proxyd::server::{Peer, TrackedListener};
use proxyd::store::{ConfigStore, StoredConfig};

pub type TestHttpClient = Client<HttpConnector, axum::body::Body>;

/// A [`ConfigStore`] that never persists, for harnesses that don't exercise `/api`.
pub struct NullStore;

#[async_trait::async_trait]
impl ConfigStore for NullStore {
	async fn load(&self) -> Result<Option<StoredConfig>, StoreError> {
		Ok(None)
	}
	async fn save(&self, _cfg: &StoredConfig) -> Result<(), StoreError> {
		Ok(())
	}
}

pub fn http_client() -> TestHttpClient {
	Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// A running proxy instance bound to a loopback ephemeral port, wired through
/// [`TrackedListener`] (so `ConnectInfo<Peer>` extraction works exactly as it does in
/// `main.rs`) with its own fresh [`ConnTracker`]/[`HostStats`]/[`Metrics`].
pub struct TestProxy {
	pub addr: SocketAddr,
	pub cfg: SharedConfig,
	pub stats: Arc<HostStats>,
	pub conn_tracker: Arc<ConnTracker>,
}

impl TestProxy {
	pub async fn start(cfg: Config) -> Self {
		let shared_cfg = SharedConfig::new(cfg.clone());
		let stats = Arc::new(HostStats::new());

		let mut registry = Registry::default();
		let metrics = Metrics::new(&mut registry);
		let conn_tracker = Arc::new(ConnTracker::new(metrics.active_clients.clone()));
		let metrics_app = MetricsApp::new(Arc::new(registry));

		let outbound = reverse::build_outbound_client();
		let active_proxy = match cfg.mode {
			Mode::Forward => ActiveProxy::Forward(ForwardProxy::new(outbound)),
			Mode::Reverse => {
				let proxy = ReverseProxy::new(outbound, &cfg.target_url).expect("valid target url in test fixture");
				ActiveProxy::Reverse(Arc::new(proxy))
			},
		};

		let deps = RouterDeps {
			cfg: shared_cfg.clone(),
			stats: stats.clone(),
			metrics: metrics.clone(),
			api_state: ApiState { cfg: shared_cfg.clone(), stats: stats.clone(), store: Arc::new(NullStore) },
		};

		let app = router::build(active_proxy, deps, metrics_app).into_make_service_with_connect_info::<Peer>();

		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
		let addr = listener.local_addr().unwrap();
		let tracked = TrackedListener::new(listener, conn_tracker.clone());
		tokio::spawn(async move {
			axum::serve(tracked, app).await.ok();
		});

		TestProxy { addr, cfg: shared_cfg, stats, conn_tracker }
	}

	pub fn base_url(&self) -> String {
		format!("http://{}", self.addr)
	}
}

/// Spawns a minimal `axum` backend bound to an ephemeral loopback port for the proxy to
/// relay requests to.
pub async fn spawn_backend(router: Router) -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, router).await.ok();
	});
	addr
}

pub async fn read_body(resp: Response) -> String {
	let bytes = resp.into_body().collect().await.expect("read response body").to_bytes();
	String::from_utf8_lossy(&bytes).into_owned()
}
