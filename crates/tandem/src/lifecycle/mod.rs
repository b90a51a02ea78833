//! Scoped resource release, debouncing, and deadline primitives.
//!
//! Every subscription or timer opened by a [`crate::LanguageClient`] or a
//! [`crate::Binding`] is registered in a [`DisposableCollection`] so teardown
//! releases everything exactly once, in reverse registration order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::{Error, Result};

/// A resource release callback, run at most once.
///
/// Dropping an undisposed `Disposable` runs the callback, so a handle that
/// falls out of scope releases its resource.
pub struct Disposable(Option<Box<dyn FnOnce() + Send>>);

impl Disposable {
	/// Wraps a release callback.
	pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
		Self(Some(Box::new(f)))
	}

	/// A disposable that releases nothing.
	pub fn noop() -> Self {
		Self(None)
	}

	/// Runs the release callback now.
	pub fn dispose(mut self) {
		self.run();
	}

	/// Defuses the disposable without running the callback.
	pub fn forget(mut self) {
		self.0 = None;
	}

	fn run(&mut self) {
		if let Some(f) = self.0.take()
			&& std::panic::catch_unwind(AssertUnwindSafe(f)).is_err()
		{
			warn!("disposable callback panicked");
		}
	}
}

impl Drop for Disposable {
	fn drop(&mut self) {
		self.run();
	}
}

impl std::fmt::Debug for Disposable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Disposable").field(&self.0.is_some()).finish()
	}
}

/// A scoped holder of [`Disposable`]s.
///
/// Disposal drains the collection in reverse registration order. A panicking
/// entry does not stop the remaining entries from being released. Pushing
/// onto an already-disposed collection releases the new entry immediately.
#[derive(Default)]
pub struct DisposableCollection {
	state: Mutex<CollectionState>,
}

#[derive(Default)]
struct CollectionState {
	entries: Vec<Disposable>,
	disposed: bool,
}

impl DisposableCollection {
	/// Creates an empty collection.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a disposable with this collection's scope.
	pub fn push(&self, disposable: Disposable) {
		let mut state = self.state.lock();
		if state.disposed {
			drop(state);
			disposable.dispose();
		} else {
			state.entries.push(disposable);
		}
	}

	/// Registers a release callback with this collection's scope.
	pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
		self.push(Disposable::new(f));
	}

	/// Releases every registered entry, newest first.
	pub fn dispose(&self) {
		let entries = {
			let mut state = self.state.lock();
			state.disposed = true;
			std::mem::take(&mut state.entries)
		};
		for entry in entries.into_iter().rev() {
			entry.dispose();
		}
	}

	/// Whether the collection has been disposed.
	pub fn is_disposed(&self) -> bool {
		self.state.lock().disposed
	}
}

impl Drop for DisposableCollection {
	fn drop(&mut self) {
		self.dispose();
	}
}

/// Boxed future returned by debounce actions.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Trailing-edge debouncer with inline flush.
///
/// [`trigger`](Self::trigger) (re)arms the window; the action runs once the
/// window elapses with no further triggers. [`flush`](Self::flush) runs a
/// pending action inline before returning, so a caller that must observe
/// post-flush state can await it directly. [`clear`](Self::clear) discards a
/// pending action without running it.
#[derive(Clone)]
pub struct Debouncer {
	inner: Arc<DebounceInner>,
}

struct DebounceInner {
	window: Duration,
	action: Arc<dyn Fn() -> BoxFuture<()> + Send + Sync>,
	state: Mutex<DebounceState>,
}

#[derive(Default)]
struct DebounceState {
	/// Bumped on every trigger/flush/clear; a sleeping task only fires if the
	/// generation it captured is still current.
	generation: u64,
	armed: bool,
}

impl Debouncer {
	/// Creates a debouncer running `action` after `window` of quiescence.
	pub fn new(window: Duration, action: impl Fn() -> BoxFuture<()> + Send + Sync + 'static) -> Self {
		Self {
			inner: Arc::new(DebounceInner {
				window,
				action: Arc::new(action),
				state: Mutex::new(DebounceState::default()),
			}),
		}
	}

	/// (Re)arms the trailing window.
	pub fn trigger(&self) {
		let generation = {
			let mut state = self.inner.state.lock();
			state.generation += 1;
			state.armed = true;
			state.generation
		};

		let inner = Arc::clone(&self.inner);
		tokio::spawn(async move {
			tokio::time::sleep(inner.window).await;
			let fire = {
				let mut state = inner.state.lock();
				if state.generation == generation && state.armed {
					state.armed = false;
					true
				} else {
					false
				}
			};
			if fire {
				(inner.action)().await;
			}
		});
	}

	/// Runs the pending action inline, if one is armed.
	pub async fn flush(&self) {
		let fire = {
			let mut state = self.inner.state.lock();
			state.generation += 1;
			std::mem::take(&mut state.armed)
		};
		if fire {
			(self.inner.action)().await;
		}
	}

	/// Discards a pending action without running it.
	pub fn clear(&self) {
		let mut state = self.inner.state.lock();
		state.generation += 1;
		state.armed = false;
	}

	/// Whether an action is currently pending.
	pub fn is_armed(&self) -> bool {
		self.inner.state.lock().armed
	}
}

/// Awaits `future` under a wall-clock deadline.
///
/// The timer is dropped as soon as the future settles; on expiry the future
/// is abandoned and [`Error::Timeout`] is surfaced.
pub async fn deadline<T>(duration: Duration, future: impl Future<Output = T>) -> Result<T> {
	tokio::time::timeout(duration, future).await.map_err(|_| Error::Timeout(duration))
}

#[cfg(test)]
mod tests;
