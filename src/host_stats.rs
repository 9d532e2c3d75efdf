use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

/// One row of a [`HostStats`] snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Stat {
	pub host: String,
	pub count: u64,
}

const SUBSCRIBE_SNAPSHOT_SIZE: i64 = 10;

/// Opaque handle returned by [`HostStats::subscribe`]; pass it back to `unsubscribe` to
/// stop receiving updates. Removal-by-id keeps unsubscribe race-free against a concurrent
/// publish, which comparing `Sender`s directly would not give us for free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Inner {
	counts: HashMap<String, u64>,
	subscribers: Vec<(SubscriberId, mpsc::Sender<Vec<Stat>>)>,
	next_id: u64,
}

/// Per-host request counter with snapshot + subscription fan-out. Mirrors the original
/// `DomainStats`/`ClientTracker` pair: one mutex-guarded critical section covers both the
/// mutation and the publish so subscribers never observe a torn snapshot.
pub struct HostStats {
	inner: Mutex<Inner>,
}

impl Default for HostStats {
	fn default() -> Self {
		HostStats {
			inner: Mutex::new(Inner {
				counts: HashMap::new(),
				subscribers: Vec::new(),
				next_id: 0,
			}),
		}
	}
}

impl HostStats {
	pub fn new() -> Self {
		Self::default()
	}

	/// No-op on an empty host. Lowercases, increments, then publishes the new top-10
	/// snapshot to every subscriber without blocking on a slow one.
	pub fn record(&self, host: &str) {
		if host.is_empty() {
			return;
		}
		let host = host.to_ascii_lowercase();
		let mut guard = self.inner.lock().unwrap();
		*guard.counts.entry(host).or_insert(0) += 1;
		let snapshot = top_n(&guard.counts, SUBSCRIBE_SNAPSHOT_SIZE);
		guard
			.subscribers
			.retain(|(_, tx)| tx.try_send(snapshot.clone()).is_ok() || !tx.is_closed());
	}

	/// Snapshot ordered by count descending; `n <= 0` means "all".
	pub fn top(&self, n: i64) -> Vec<Stat> {
		let guard = self.inner.lock().unwrap();
		top_n(&guard.counts, n)
	}

	/// Capacity-1 channel; immediately enqueues the current top-10 snapshot.
	pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Vec<Stat>>) {
		let (tx, rx) = mpsc::channel(1);
		let mut guard = self.inner.lock().unwrap();
		let snapshot = top_n(&guard.counts, SUBSCRIBE_SNAPSHOT_SIZE);
		let _ = tx.try_send(snapshot);
		let id = SubscriberId(guard.next_id);
		guard.next_id += 1;
		guard.subscribers.push((id, tx));
		(id, rx)
	}

	/// Idempotent: unsubscribing an id that is already gone is a no-op.
	pub fn unsubscribe(&self, id: SubscriberId) {
		let mut guard = self.inner.lock().unwrap();
		guard.subscribers.retain(|(sub_id, _)| *sub_id != id);
	}
}

fn top_n(counts: &HashMap<String, u64>, n: i64) -> Vec<Stat> {
	let mut rows: Vec<Stat> = counts
		.iter()
		.map(|(host, count)| Stat {
			host: host.clone(),
			count: *count,
		})
		.collect();
	rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.host.cmp(&b.host)));
	if n > 0 {
		rows.truncate(n as usize);
	}
	rows
}
