//! The persistent-configuration collaborator the core spec treats as an external
//! dependency (§1, §6): a `ConfigStore` trait plus one concrete, file-backed
//! implementation. `username`/`password` are encrypted at rest with AES-256-GCM,
//! keyed off SHA-256 of the operator's configured secret, matching the persisted-state
//! contract in §6.
//!
//! A store failure is always a [`StoreError`] (`§7`'s `StoreWarning`): callers log it
//! and keep running off the in-memory [`crate::config::Config`], never treat it as fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::StoreError;

/// The subset of [`Config`] that survives a restart. Log level and the
/// stats/debug/ultra-debug toggles are runtime-only session state and are deliberately
/// not part of this record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredConfig {
	pub target_url: String,
	pub http_addr: String,
	pub https_addr: String,
	pub cert_path: String,
	pub key_path: String,
	pub auth_enabled: bool,
	pub username: String,
	pub password: String,
	pub headers: HashMap<String, String>,
	pub client_headers: HashMap<String, HashMap<String, String>>,
}

impl StoredConfig {
	pub fn from_config(cfg: &Config) -> Self {
		StoredConfig {
			target_url: cfg.target_url.clone(),
			http_addr: cfg.http_addr.clone(),
			https_addr: cfg.https_addr.clone(),
			cert_path: cfg.cert_path.clone(),
			key_path: cfg.key_path.clone(),
			auth_enabled: cfg.auth_enabled,
			username: cfg.username.clone(),
			password: cfg.password.clone(),
			headers: cfg.headers.clone(),
			client_headers: cfg.client_headers.clone(),
		}
	}

	pub fn apply_to(&self, cfg: &mut Config) {
		cfg.target_url = self.target_url.clone();
		cfg.http_addr = self.http_addr.clone();
		cfg.https_addr = self.https_addr.clone();
		cfg.cert_path = self.cert_path.clone();
		cfg.key_path = self.key_path.clone();
		cfg.auth_enabled = self.auth_enabled;
		cfg.username = self.username.clone();
		cfg.password = self.password.clone();
		cfg.headers = self.headers.clone();
		cfg.client_headers = self.client_headers.clone();
	}
}

/// On-disk envelope: credential fields are replaced by their encrypted form before
/// serialization so `config.db` never holds a plaintext secret.
#[derive(Serialize, Deserialize)]
struct Envelope {
	target_url: String,
	http_addr: String,
	https_addr: String,
	cert_path: String,
	key_path: String,
	auth_enabled: bool,
	username_enc: String,
	password_enc: String,
	headers: HashMap<String, String>,
	client_headers: HashMap<String, HashMap<String, String>>,
}

/// `load`/`save` over a `StoredConfig`. Out of scope for the proxy core itself (§1); the
/// core only depends on this trait, never on `FileStore` concretely.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
	async fn load(&self) -> Result<Option<StoredConfig>, StoreError>;
	async fn save(&self, cfg: &StoredConfig) -> Result<(), StoreError>;
}

/// Derives a 32-byte AES-256 key as SHA-256 of `secret`.
fn derive_key(secret: &str) -> Key<Aes256Gcm> {
	let digest = Sha256::digest(secret.as_bytes());
	*Key::<Aes256Gcm>::from_slice(&digest)
}

/// AES-256-GCM encrypt; prepends the 12-byte random nonce to the ciphertext and
/// base64-encodes the result. Empty plaintext is preserved as-is rather than encrypted,
/// so an unset credential round-trips as an empty string instead of ciphertext noise.
pub fn encrypt_field(secret: &str, plaintext: &str) -> Result<String, StoreError> {
	if plaintext.is_empty() {
		return Ok(String::new());
	}
	let cipher = Aes256Gcm::new(&derive_key(secret));
	let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
	let ciphertext = cipher
		.encrypt(&nonce, plaintext.as_bytes())
		.map_err(|e| StoreError::Crypto(e.to_string()))?;
	let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
	out.extend_from_slice(&nonce);
	out.extend_from_slice(&ciphertext);
	Ok(BASE64.encode(out))
}

/// Inverse of [`encrypt_field`].
pub fn decrypt_field(secret: &str, encoded: &str) -> Result<String, StoreError> {
	if encoded.is_empty() {
		return Ok(String::new());
	}
	let raw = BASE64
		.decode(encoded)
		.map_err(|e| StoreError::Crypto(e.to_string()))?;
	if raw.len() < 12 {
		return Err(StoreError::Crypto("ciphertext shorter than nonce".into()));
	}
	let (nonce, ciphertext) = raw.split_at(12);
	let cipher = Aes256Gcm::new(&derive_key(secret));
	let plaintext = cipher
		.decrypt(nonce.into(), ciphertext)
		.map_err(|e| StoreError::Crypto(e.to_string()))?;
	String::from_utf8(plaintext).map_err(|e| StoreError::Crypto(e.to_string()))
}

/// File-backed [`ConfigStore`]: `StoredConfig` as JSON, `username`/`password`
/// AES-256-GCM-encrypted in place before being written.
pub struct FileStore {
	path: PathBuf,
	secret_key: String,
}

impl FileStore {
	pub fn new(path: impl Into<PathBuf>, secret_key: impl Into<String>) -> Self {
		FileStore { path: path.into(), secret_key: secret_key.into() }
	}

	fn path(&self) -> &Path {
		&self.path
	}
}

#[async_trait::async_trait]
impl ConfigStore for FileStore {
	async fn load(&self) -> Result<Option<StoredConfig>, StoreError> {
		let bytes = match tokio::fs::read(self.path()).await {
			Ok(b) => b,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let envelope: Envelope = serde_json::from_slice(&bytes)?;
		let username = decrypt_field(&self.secret_key, &envelope.username_enc)?;
		let password = decrypt_field(&self.secret_key, &envelope.password_enc)?;
		Ok(Some(StoredConfig {
			target_url: envelope.target_url,
			http_addr: envelope.http_addr,
			https_addr: envelope.https_addr,
			cert_path: envelope.cert_path,
			key_path: envelope.key_path,
			auth_enabled: envelope.auth_enabled,
			username,
			password,
			headers: envelope.headers,
			client_headers: envelope.client_headers,
		}))
	}

	async fn save(&self, cfg: &StoredConfig) -> Result<(), StoreError> {
		let envelope = Envelope {
			target_url: cfg.target_url.clone(),
			http_addr: cfg.http_addr.clone(),
			https_addr: cfg.https_addr.clone(),
			cert_path: cfg.cert_path.clone(),
			key_path: cfg.key_path.clone(),
			auth_enabled: cfg.auth_enabled,
			username_enc: encrypt_field(&self.secret_key, &cfg.username)?,
			password_enc: encrypt_field(&self.secret_key, &cfg.password)?,
			headers: cfg.headers.clone(),
			client_headers: cfg.client_headers.clone(),
		};
		let bytes = serde_json::to_vec_pretty(&envelope)?;
		if let Some(parent) = self.path().parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}
		tokio::fs::write(self.path(), bytes).await?;
		Ok(())
	}
}
