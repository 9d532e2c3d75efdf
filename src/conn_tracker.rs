use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use prometheus_client::metrics::gauge::Gauge;
use tokio::sync::mpsc;

/// Connection lifecycle states a [`ConnTracker`] reacts to. `Active`/`Idle` are no-ops;
/// they exist so callers can forward every state a connection-state callback might see
/// without special-casing which ones matter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
	New,
	Hijacked,
	Closed,
	Active,
	Idle,
}

/// Opaque handle returned by [`ConnTracker::subscribe`]; pass it back to `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Inner {
	count: i64,
	addrs: HashMap<IpAddr, u32>,
	subscribers: Vec<(SubscriberId, mpsc::Sender<i64>)>,
	next_id: u64,
}

/// Active-connection counter and per-address multiset, with subscription fan-out. The
/// gauge is pushed to on every count-changing transition so `/metrics` always reflects
/// the latest value without a separate poll.
pub struct ConnTracker {
	inner: Mutex<Inner>,
	gauge: Gauge,
}

impl ConnTracker {
	pub fn new(gauge: Gauge) -> Self {
		ConnTracker {
			inner: Mutex::new(Inner {
				count: 0,
				addrs: HashMap::new(),
				subscribers: Vec::new(),
				next_id: 0,
			}),
			gauge,
		}
	}

	pub fn on_state(&self, addr: Option<IpAddr>, state: ConnState) {
		let mut guard = self.inner.lock().unwrap();
		let changed = match state {
			ConnState::New => {
				guard.count += 1;
				if let Some(ip) = addr {
					*guard.addrs.entry(ip).or_insert(0) += 1;
				}
				true
			},
			ConnState::Hijacked | ConnState::Closed => {
				guard.count = (guard.count - 1).max(0);
				if let Some(ip) = addr {
					if let Some(n) = guard.addrs.get_mut(&ip) {
						*n = n.saturating_sub(1);
						if *n == 0 {
							guard.addrs.remove(&ip);
						}
					}
				}
				true
			},
			ConnState::Active | ConnState::Idle => false,
		};
		if changed {
			let count = guard.count;
			guard
				.subscribers
				.retain(|(_, tx)| tx.try_send(count).is_ok() || !tx.is_closed());
			self.gauge.set(count);
		}
	}

	pub fn count(&self) -> i64 {
		self.inner.lock().unwrap().count
	}

	pub fn addrs(&self) -> HashMap<IpAddr, u32> {
		self.inner.lock().unwrap().addrs.clone()
	}

	/// Capacity-1 channel; immediately enqueues the current count.
	pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<i64>) {
		let (tx, rx) = mpsc::channel(1);
		let mut guard = self.inner.lock().unwrap();
		let _ = tx.try_send(guard.count);
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

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	fn addr() -> IpAddr {
		IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
	}

	#[test]
	fn count_is_sum_of_addrs_and_never_negative() {
		let tracker = ConnTracker::new(Gauge::default());
		tracker.on_state(Some(addr()), ConnState::Closed);
		assert_eq!(tracker.count(), 0);

		tracker.on_state(Some(addr()), ConnState::New);
		tracker.on_state(Some(addr()), ConnState::New);
		assert_eq!(tracker.count(), 2);
		assert_eq!(tracker.addrs().get(&addr()), Some(&2));

		tracker.on_state(Some(addr()), ConnState::Closed);
		assert_eq!(tracker.count(), 1);

		tracker.on_state(Some(addr()), ConnState::Hijacked);
		assert_eq!(tracker.count(), 0);
		assert!(tracker.addrs().get(&addr()).is_none());
	}

	#[test]
	fn active_and_idle_are_noops() {
		let tracker = ConnTracker::new(Gauge::default());
		tracker.on_state(Some(addr()), ConnState::New);
		tracker.on_state(Some(addr()), ConnState::Active);
		tracker.on_state(Some(addr()), ConnState::Idle);
		assert_eq!(tracker.count(), 1);
	}

	#[tokio::test]
	async fn subscriber_observes_new_then_closed() {
		let tracker = ConnTracker::new(Gauge::default());
		let (_id, mut rx) = tracker.subscribe();
		assert_eq!(rx.recv().await, Some(0));

		tracker.on_state(Some(addr()), ConnState::New);
		assert_eq!(rx.recv().await, Some(1));

		tracker.on_state(Some(addr()), ConnState::Closed);
		assert_eq!(rx.recv().await, Some(0));
	}

	#[tokio::test]
	async fn unsubscribe_is_idempotent_and_stops_delivery() {
		let tracker = ConnTracker::new(Gauge::default());
		let (id, mut rx) = tracker.subscribe();
		rx.recv().await.unwrap();

		tracker.unsubscribe(id);
		tracker.unsubscribe(id);
		tracker.on_state(Some(addr()), ConnState::New);
		assert!(rx.recv().await.is_none());
	}
}
