// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode, routing::get};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MethodCodeLabels {
	pub method: String,
	pub code: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MethodLabels {
	pub method: String,
}

/// The proxy's metric instruments. Registered once at startup and shared (behind an
/// `Arc`) with every component that records against it, instead of reaching for a
/// process-global registry.
pub struct Metrics {
	pub requests_total: Family<MethodCodeLabels, Counter>,
	pub request_duration_seconds: Family<MethodLabels, Histogram>,
	pub active_clients: Gauge,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Arc<Self> {
		let requests_total = Family::<MethodCodeLabels, Counter>::default();
		let request_duration_seconds =
			Family::<MethodLabels, Histogram>::new_with_constructor(|| {
				Histogram::new(exponential_buckets(0.001, 2.0, 14))
			});
		let active_clients = Gauge::default();

		registry.register(
			"proxy_http_requests_total",
			"Total number of HTTP requests handled by the proxy",
			requests_total.clone(),
		);
		registry.register(
			"proxy_http_request_duration_seconds",
			"Duration of HTTP requests handled by the proxy",
			request_duration_seconds.clone(),
		);
		registry.register(
			"proxy_active_clients",
			"Number of currently active client connections",
			active_clients.clone(),
		);

		Arc::new(Metrics {
			requests_total,
			request_duration_seconds,
			active_clients,
		})
	}

	pub fn record_request(&self, method: &str, code: StatusCode, elapsed: Duration) {
		self
			.requests_total
			.get_or_create(&MethodCodeLabels {
				method: method.to_string(),
				code: code.as_u16(),
			})
			.inc();
		self
			.request_duration_seconds
			.get_or_create(&MethodLabels {
				method: method.to_string(),
			})
			.observe(elapsed.as_secs_f64());
	}
}

#[derive(Clone)]
pub struct App {
	registry: Arc<Registry>,
}

impl App {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/metrics", get(metrics_handler))
			.with_state(self.clone())
	}
}

async fn metrics_handler(State(app): State<App>) -> Result<String, StatusCode> {
	let mut buffer = String::new();
	prometheus_client::encoding::text::encode(&mut buffer, &app.registry)
		.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
	Ok(buffer)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn records_request_into_both_instruments() {
		let mut registry = Registry::default();
		let metrics = Metrics::new(&mut registry);
		metrics.record_request("GET", StatusCode::OK, Duration::from_millis(5));

		let mut buffer = String::new();
		prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
		assert!(buffer.contains("proxy_http_requests_total"));
		assert!(buffer.contains("proxy_http_request_duration_seconds"));
		assert!(buffer.contains("proxy_active_clients"));
	}
}
