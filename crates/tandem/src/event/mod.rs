//! Fan-out event emitters.
//!
//! The broker's cross-cutting events (diagnostics, document lifecycle,
//! disposal) each carry an ordered subscriber list. Dispatch snapshots the
//! list first so a subscriber that (un)subscribes re-entrantly cannot skew
//! delivery for the event in flight.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::lifecycle::Disposable;

/// A subscriber callback for an [`Emitter`].
pub type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A multi-subscriber event source.
///
/// `subscribe` returns a [`Disposable`] whose release deregisters the
/// subscriber in O(#subscribers). Subscribers are invoked in registration
/// order; insertion order carries no semantic meaning.
pub struct Emitter<T> {
	inner: Arc<EmitterInner<T>>,
}

struct EmitterInner<T> {
	subscribers: Mutex<Vec<(u64, Subscriber<T>)>>,
	next_id: AtomicU64,
}

impl<T: 'static> Default for Emitter<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: 'static> Emitter<T> {
	/// Creates an emitter with no subscribers.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(EmitterInner {
				subscribers: Mutex::new(Vec::new()),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	/// Registers a subscriber; the returned disposable removes it.
	pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Disposable {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.subscribers.lock().push((id, Arc::new(f)));

		let weak: Weak<EmitterInner<T>> = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.subscribers.lock().retain(|(sid, _)| *sid != id);
			}
		})
	}

	/// Delivers `value` to every subscriber registered at call time.
	pub fn emit(&self, value: &T) {
		let snapshot: Vec<Subscriber<T>> = self.inner.subscribers.lock().iter().map(|(_, f)| Arc::clone(f)).collect();
		for subscriber in snapshot {
			subscriber(value);
		}
	}

	/// Number of live subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.inner.subscribers.lock().len()
	}
}

#[cfg(test)]
mod tests;
