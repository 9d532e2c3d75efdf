use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
	Fatal,
}

impl LogLevel {
	/// Case-insensitive; unknown input maps to `INFO`.
	pub fn parse(s: &str) -> Self {
		match s.to_ascii_uppercase().as_str() {
			"DEBUG" => LogLevel::Debug,
			"WARN" | "WARNING" => LogLevel::Warn,
			"ERROR" => LogLevel::Error,
			"FATAL" => LogLevel::Fatal,
			_ => LogLevel::Info,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Debug => "DEBUG",
			LogLevel::Info => "INFO",
			LogLevel::Warn => "WARN",
			LogLevel::Error => "ERROR",
			LogLevel::Fatal => "FATAL",
		}
	}

	pub fn as_tracing_level(&self) -> tracing::Level {
		match self {
			LogLevel::Debug => tracing::Level::DEBUG,
			LogLevel::Info => tracing::Level::INFO,
			LogLevel::Warn => tracing::Level::WARN,
			LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	Forward,
	Reverse,
}

/// Process-wide settings, guarded by a reader-writer lock. Every getter returns a
/// defensive copy so callers can never mutate internal state except through the setters
/// below, and so no callee holds the lock beyond its own critical section.
#[derive(Clone, Debug)]
pub struct Config {
	pub mode: Mode,
	pub target_url: String,
	pub http_addr: String,
	pub https_addr: String,
	pub cert_path: String,
	pub key_path: String,
	pub auth_enabled: bool,
	pub username: String,
	pub password: String,
	pub secret_key: String,
	pub log_level: LogLevel,
	pub stats_enabled: bool,
	pub debug_logs: bool,
	pub ultra_debug: bool,
	pub headers: HashMap<String, String>,
	pub client_headers: HashMap<String, HashMap<String, String>>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			mode: Mode::Forward,
			target_url: "http://localhost:9000".to_string(),
			http_addr: ":8080".to_string(),
			https_addr: String::new(),
			cert_path: String::new(),
			key_path: String::new(),
			auth_enabled: false,
			username: String::new(),
			password: String::new(),
			secret_key: String::new(),
			log_level: LogLevel::Info,
			stats_enabled: false,
			debug_logs: false,
			ultra_debug: false,
			headers: HashMap::new(),
			client_headers: HashMap::new(),
		}
	}
}

/// Shared, lock-protected handle to [`Config`]. Cloning this is cheap (it's an `Arc`);
/// every subsystem that needs live settings holds one of these, never a private copy of
/// the settings themselves.
#[derive(Clone)]
pub struct SharedConfig(Arc<RwLock<Config>>);

impl SharedConfig {
	pub fn new(cfg: Config) -> Self {
		SharedConfig(Arc::new(RwLock::new(cfg)))
	}

	pub async fn snapshot(&self) -> Config {
		self.0.read().await.clone()
	}

	pub async fn get_headers(&self) -> HashMap<String, String> {
		self.0.read().await.headers.clone()
	}

	pub async fn get_client_headers(&self) -> HashMap<String, HashMap<String, String>> {
		self.0.read().await.client_headers.clone()
	}

	/// Global headers overlaid with `clientHeaders[client]`, if any; client entries win
	/// on key collision.
	pub async fn get_headers_for_client(&self, client: &str) -> HashMap<String, String> {
		let guard = self.0.read().await;
		let mut merged = guard.headers.clone();
		if let Some(overrides) = guard.client_headers.get(client) {
			for (k, v) in overrides {
				merged.insert(k.clone(), v.clone());
			}
		}
		merged
	}

	pub async fn set_header(&self, name: String, value: String) {
		self.0.write().await.headers.insert(name, value);
	}

	pub async fn delete_header(&self, name: &str) {
		self.0.write().await.headers.remove(name);
	}

	pub async fn set_client_header(&self, client: String, name: String, value: String) {
		let mut guard = self.0.write().await;
		guard.client_headers.entry(client).or_default().insert(name, value);
	}

	/// Deletes `name` from `client`'s overrides; removes the client's entry entirely once
	/// its last override is gone.
	pub async fn delete_client_header(&self, client: &str, name: &str) {
		let mut guard = self.0.write().await;
		if let Some(overrides) = guard.client_headers.get_mut(client) {
			overrides.remove(name);
			if overrides.is_empty() {
				guard.client_headers.remove(client);
			}
		}
	}

	/// Empty `user`/`pass` are preserved rather than overwritten, so a UI form that does
	/// not display the current credentials cannot clear them by submitting blanks.
	pub async fn set_auth(&self, enabled: bool, user: String, pass: String) {
		let mut guard = self.0.write().await;
		guard.auth_enabled = enabled;
		if !user.is_empty() {
			guard.username = user;
		}
		if !pass.is_empty() {
			guard.password = pass;
		}
	}

	pub async fn get_auth(&self) -> (bool, String, String) {
		let guard = self.0.read().await;
		(guard.auth_enabled, guard.username.clone(), guard.password.clone())
	}

	pub async fn set_log_level(&self, level: LogLevel) {
		self.0.write().await.log_level = level;
	}

	pub async fn get_log_level(&self) -> LogLevel {
		self.0.read().await.log_level
	}

	pub async fn set_stats_enabled(&self, enabled: bool) {
		self.0.write().await.stats_enabled = enabled;
	}

	pub async fn set_debug_logs(&self, enabled: bool) {
		self.0.write().await.debug_logs = enabled;
	}

	pub async fn set_ultra_debug(&self, enabled: bool) {
		self.0.write().await.ultra_debug = enabled;
	}
}
