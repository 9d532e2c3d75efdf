//! CLI entry point: parses flags/env (§6), builds the process-wide [`proxyd::Config`],
//! attempts to load persisted settings from the [`proxyd::store::FileStore`] collaborator,
//! wires up [`proxyd::conn_tracker::ConnTracker`]/[`proxyd::host_stats::HostStats`]/
//! [`proxyd::metrics::Metrics`], builds the active proxy (forward or reverse) and its
//! router, then spawns the plain-HTTP acceptor and, if configured, a TLS acceptor, into a
//! `JoinSet` that drains on `Ctrl+C`. Grounded in the teacher's own `src/main.rs`
//! CLI/bootstrap shape (`clap::Parser`, `tracing_subscriber::fmt()`) and in
//! `src/inbound.rs`'s per-listener `axum::serve(...).with_graceful_shutdown(...)` +
//! `tokio_util::sync::CancellationToken` wiring for shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use proxyd::config::{Config, LogLevel, Mode, SharedConfig};
use proxyd::conn_tracker::ConnTracker;
use proxyd::forward::ForwardProxy;
use proxyd::host_stats::HostStats;
use proxyd::metrics::{App as MetricsApp, Metrics};
use proxyd::reverse::{self, ReverseProxy};
use proxyd::router::{self, ActiveProxy, RouterDeps};
use proxyd::server::{TrackedListener, TrackedTlsListener, load_tls_acceptor, request_timeout_middleware};
use proxyd::store::{ConfigStore, FileStore};

/// §4.9's `ReadTimeout=5s` + `WriteTimeout=10s`, collapsed into one request-level deadline
/// per [`request_timeout_middleware`]'s doc comment. `IdleTimeout=30s` is a distinct
/// per-connection concern enforced directly on the socket by `TrackedIo`, not here.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// One CLI flag per §6 row, `env` giving "env overrides compiled default" for free and
/// clap's own precedence giving "flag overrides env" without any hand-rolled merge logic.
#[derive(Parser, Debug)]
#[command(version, about = "Dual-mode HTTP proxy server", long_about = None)]
struct Args {
	/// `forward` or `reverse`
	#[arg(long = "mode", env = "PROXY_MODE", default_value = "forward")]
	mode: String,

	/// Upstream target for reverse mode
	#[arg(long = "target", env = "PROXY_TARGET", default_value = "http://localhost:9000")]
	target: String,

	/// Plain-HTTP listen address
	#[arg(long = "http", env = "PROXY_HTTP_ADDR", default_value = ":8080")]
	http: String,

	/// TLS listen address (optional)
	#[arg(long = "https", env = "PROXY_HTTPS_ADDR", default_value = "")]
	https: String,

	/// TLS certificate file
	#[arg(long = "cert", env = "PROXY_CERT_FILE", default_value = "")]
	cert: String,

	/// TLS key file
	#[arg(long = "key", env = "PROXY_KEY_FILE", default_value = "")]
	key: String,

	/// Require basic auth
	#[arg(long = "auth", env = "PROXY_AUTH_ENABLED", default_value_t = false)]
	auth: bool,

	/// Basic auth username
	#[arg(long = "auth-user", env = "PROXY_AUTH_USER", default_value = "")]
	auth_user: String,

	/// Basic auth password
	#[arg(long = "auth-pass", env = "PROXY_AUTH_PASS", default_value = "")]
	auth_pass: String,

	/// Key used to encrypt credential fields at rest
	#[arg(long = "secret", env = "PROXY_SECRET_KEY", default_value = "")]
	secret: String,

	/// Enable per-host request counters
	#[arg(long = "stats", env = "PROXY_STATS_ENABLED", default_value_t = false)]
	stats: bool,

	/// Log level: DEBUG, INFO, WARN, ERROR, FATAL
	#[arg(long = "log-level", env = "PROXY_LOG_LEVEL", default_value = "INFO")]
	log_level: String,

	/// Global header to inject, `Name=Value`; repeatable
	#[arg(long = "header", value_parser = parse_header_kv)]
	header: Vec<(String, String)>,

	/// Path to the config store file
	#[arg(long = "db", env = "PROXY_DB_PATH", default_value = "config.db")]
	db: String,
}

fn parse_header_kv(s: &str) -> Result<(String, String), String> {
	s.split_once('=')
		.map(|(k, v)| (k.to_string(), v.to_string()))
		.ok_or_else(|| format!("expected Name=Value, got {s}"))
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let log_level = LogLevel::parse(&args.log_level);

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(log_level.as_tracing_level().into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let mode = match args.mode.as_str() {
		"forward" => Mode::Forward,
		"reverse" => Mode::Reverse,
		other => anyhow::bail!("invalid -mode {other:?}: expected \"forward\" or \"reverse\""),
	};

	let mut cfg = Config {
		mode,
		target_url: args.target.clone(),
		http_addr: args.http.clone(),
		https_addr: args.https.clone(),
		cert_path: args.cert.clone(),
		key_path: args.key.clone(),
		auth_enabled: args.auth,
		username: args.auth_user.clone(),
		password: args.auth_pass.clone(),
		secret_key: args.secret.clone(),
		log_level,
		stats_enabled: args.stats,
		debug_logs: false,
		ultra_debug: false,
		headers: args.header.into_iter().collect(),
		client_headers: Default::default(),
	};

	let store: Arc<dyn ConfigStore> = Arc::new(FileStore::new(args.db.clone(), args.secret.clone()));
	match store.load().await {
		Ok(Some(stored)) => {
			info!(path = %args.db, "loaded persisted configuration, overlaying over CLI/env bootstrap");
			stored.apply_to(&mut cfg);
		},
		Ok(None) => info!(path = %args.db, "no persisted configuration found, using CLI/env bootstrap"),
		Err(e) => warn!(error = %e, path = %args.db, "failed to load persisted configuration, continuing with CLI/env bootstrap"),
	}

	let shared_cfg = SharedConfig::new(cfg);
	// Shared by the proxy's stats-recording middleware and the control API's stats reads,
	// so a write one of them makes is visible to the other.
	let stats = Arc::new(HostStats::new());

	let mut registry = Registry::default();
	let metrics = Metrics::new(&mut registry);
	let conn_tracker = Arc::new(ConnTracker::new(metrics.active_clients.clone()));
	let metrics_app = MetricsApp::new(Arc::new(registry));

	let outbound_client = reverse::build_outbound_client();
	let snapshot = shared_cfg.snapshot().await;

	let active_proxy = match snapshot.mode {
		Mode::Forward => ActiveProxy::Forward(ForwardProxy::new(outbound_client)),
		Mode::Reverse => {
			let proxy = ReverseProxy::new(outbound_client, &snapshot.target_url)
				.context("building reverse proxy from -target")?;
			ActiveProxy::Reverse(Arc::new(proxy))
		},
	};

	let deps = RouterDeps {
		cfg: shared_cfg.clone(),
		stats: stats.clone(),
		metrics: metrics.clone(),
		api_state: proxyd::api::ApiState { cfg: shared_cfg.clone(), stats, store: store.clone() },
	};

	let app = router::build(active_proxy, deps, metrics_app)
		.layer(axum::middleware::from_fn(move |req, next| {
			request_timeout_middleware(req, next, REQUEST_TIMEOUT)
		}))
		.into_make_service_with_connect_info::<proxyd::server::Peer>();

	let shutdown = CancellationToken::new();
	let mut tasks = JoinSet::new();

	let http_addr = parse_listen_addr(&snapshot.http_addr).context("invalid -http listen address")?;
	let http_listener = tokio::net::TcpListener::bind(http_addr)
		.await
		.with_context(|| format!("binding plain-HTTP listener on {http_addr}"))?;
	info!(addr = %http_addr, "plain-HTTP listener bound");

	{
		let app = app.clone();
		let tracker = conn_tracker.clone();
		let token = shutdown.clone();
		tasks.spawn(async move {
			let listener = TrackedListener::new(http_listener, tracker);
			axum::serve(listener, app)
				.with_graceful_shutdown(async move { token.cancelled().await })
				.await
				.map_err(|e| anyhow::anyhow!("plain-HTTP acceptor failed: {e}"))
		});
	}

	if !snapshot.https_addr.is_empty() && !snapshot.cert_path.is_empty() && !snapshot.key_path.is_empty() {
		let acceptor = load_tls_acceptor(&snapshot.cert_path, &snapshot.key_path)
			.context("loading TLS certificate/key material")?;
		let https_addr = parse_listen_addr(&snapshot.https_addr).context("invalid -https listen address")?;
		let https_listener = tokio::net::TcpListener::bind(https_addr)
			.await
			.with_context(|| format!("binding TLS listener on {https_addr}"))?;
		info!(addr = %https_addr, "TLS listener bound");

		let app = app.clone();
		let tracker = conn_tracker.clone();
		let token = shutdown.clone();
		tasks.spawn(async move {
			let listener = TrackedTlsListener::new(https_listener, acceptor, tracker);
			axum::serve(listener, app)
				.with_graceful_shutdown(async move { token.cancelled().await })
				.await
				.map_err(|e| anyhow::anyhow!("TLS acceptor failed: {e}"))
		});
	} else if !snapshot.https_addr.is_empty() {
		anyhow::bail!("-https given but -cert/-key are required to serve TLS");
	}

	let shutdown_for_signal = shutdown.clone();
	tasks.spawn(async move {
		if let Err(e) = tokio::signal::ctrl_c().await {
			error!(error = %e, "failed to install Ctrl+C handler");
		}
		info!("received shutdown signal, draining listeners");
		shutdown_for_signal.cancel();
		Ok(())
	});

	let mut exit_status = Ok(());
	while let Some(result) = tasks.join_next().await {
		match result {
			Ok(Ok(())) => {},
			Ok(Err(e)) => {
				error!(error = %e, "acceptor terminated with an error");
				exit_status = Err(e);
				shutdown.cancel();
			},
			Err(join_err) => {
				error!(error = %join_err, "acceptor task panicked");
				shutdown.cancel();
			},
		}
	}
	exit_status
}

/// Accepts both `:PORT` (matching the default-value shorthand in §6) and `host:port`.
fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
	let addr = if let Some(port) = addr.strip_prefix(':') { format!("0.0.0.0:{port}") } else { addr.to_string() };
	addr.parse().with_context(|| format!("unparseable listen address {addr:?}"))
}
