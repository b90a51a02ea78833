//! Multi-subscriber request dispatch.
//!
//! Inbound server-to-client requests that fan out to every attached binding
//! (refresh requests, `workspace/applyEdit`) are modeled as a
//! [`MultiHandler`]: subscribers are invoked concurrently and their answers
//! combined by a merge policy.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{BoxFuture, Disposable};
use crate::{Error, Result};

/// An async subscriber for a fanned-out request.
pub type RequestSubscriber<P, R> = Arc<dyn Fn(P, CancellationToken) -> BoxFuture<Result<R>> + Send + Sync>;

/// Accepts multiple subscribers for one inbound RPC and merges their results.
pub struct MultiHandler<P, R> {
	inner: Arc<HandlerList<P, R>>,
}

struct HandlerList<P, R> {
	subscribers: Mutex<Vec<(u64, RequestSubscriber<P, R>)>>,
	next_id: AtomicU64,
}

impl<P: Clone + Send + 'static, R: Send + 'static> Default for MultiHandler<P, R> {
	fn default() -> Self {
		Self::new()
	}
}

impl<P: Clone + Send + 'static, R: Send + 'static> MultiHandler<P, R> {
	/// Creates a dispatcher with no subscribers.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(HandlerList {
				subscribers: Mutex::new(Vec::new()),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	/// Subscribes a handler; the returned disposable removes it.
	pub fn on_request(&self, handler: impl Fn(P, CancellationToken) -> BoxFuture<Result<R>> + Send + Sync + 'static) -> Disposable {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.subscribers.lock().push((id, Arc::new(handler)));

		let weak: Weak<HandlerList<P, R>> = Arc::downgrade(&self.inner);
		Disposable::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.subscribers.lock().retain(|(sid, _)| *sid != id);
			}
		})
	}

	/// Number of live subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.inner.subscribers.lock().len()
	}

	/// Invokes every subscriber concurrently and gathers the raw results.
	pub async fn invoke(&self, params: P, token: CancellationToken) -> Vec<Result<R>> {
		let snapshot: Vec<RequestSubscriber<P, R>> = self.inner.subscribers.lock().iter().map(|(_, f)| Arc::clone(f)).collect();
		join_all(snapshot.into_iter().map(|handler| handler(params.clone(), token.clone()))).await
	}
}

impl<P: Clone + Send + 'static> MultiHandler<P, ()> {
	/// Fan-out merge: succeed iff all subscribers succeeded.
	///
	/// On any failure the first error is returned. No subscribers is a
	/// vacuous success.
	pub async fn invoke_all_void(&self, params: P, token: CancellationToken) -> Result<()> {
		self.invoke(params, token).await.into_iter().collect()
	}
}

impl<P: Clone + Send + 'static, R: Send + 'static> MultiHandler<P, Option<R>> {
	/// Single-owner merge: exactly one subscriber must answer non-`None`.
	///
	/// Zero or multiple non-`None` answers yield `default`, or
	/// [`Error::HandlerCountMismatch`] when no default is provided. Handler
	/// errors take precedence over the count check.
	pub async fn invoke_single(&self, params: P, token: CancellationToken, default: Option<R>) -> Result<R> {
		let mut answers = Vec::new();
		for result in self.invoke(params, token).await {
			if let Some(answer) = result? {
				answers.push(answer);
			}
		}

		if answers.len() == 1 {
			return Ok(answers.remove(0));
		}
		default.ok_or(Error::HandlerCountMismatch(answers.len()))
	}
}
