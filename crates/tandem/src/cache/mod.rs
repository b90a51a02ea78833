//! Response cache for idempotent upstream requests.
//!
//! Read-only language-intelligence requests (hover, completion, ...) are
//! memoized by a fingerprint of `(method, params)` so concurrent identical
//! requests from different clients collapse to one upstream call. The whole
//! cache is flushed on any document mutation.
//!
//! Cancellation is per-caller. Tokens travel out of band, never through the
//! params, so the fingerprint is naturally token-free; and the collapsed
//! upstream call runs under its own token, so one caller cancelling only
//! releases that caller. The upstream call itself is aborted only once every
//! collapsed caller has walked away.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{ErrorCode, ResponseError};
use crate::lifecycle::BoxFuture;
use crate::{Error, Result};

/// Requests whose results depend only on document state, safe to memoize.
///
/// This is the forwarded request set minus `workspace/executeCommand`,
/// whose result depends on side effects. See [`crate::binding`] for the
/// forwarded set itself.
const CACHEABLE_METHODS: &[&str] = &[
	"textDocument/hover",
	"textDocument/references",
	"textDocument/signatureHelp",
	"textDocument/semanticTokens/full",
	"textDocument/semanticTokens/full/delta",
	"textDocument/semanticTokens/range",
	"textDocument/definition",
	"textDocument/documentHighlight",
	"workspace/symbol",
	"workspaceSymbol/resolve",
	"textDocument/formatting",
	"textDocument/rangeFormatting",
	"textDocument/onTypeFormatting",
	"textDocument/rename",
	"textDocument/prepareRename",
	"textDocument/completion",
	"completionItem/resolve",
	"textDocument/codeAction",
	"codeAction/resolve",
	"textDocument/codeLens",
	"codeLens/resolve",
	"textDocument/documentLink",
	"documentLink/resolve",
	"textDocument/foldingRange",
	"textDocument/documentColor",
	"textDocument/documentSymbol",
	"textDocument/diagnostic",
	"workspace/diagnostic",
];

type SharedResult = Arc<Result<JsonValue>>;

/// One pending-or-resolved response slot.
#[derive(Clone)]
struct CacheEntry {
	/// Distinguishes this slot from a successor under the same fingerprint.
	id: u64,
	rx: watch::Receiver<Option<SharedResult>>,
	/// Token the collapsed upstream call runs under. Independent of every
	/// caller's token; cancelled only when the last waiter abandons a still
	/// pending entry.
	upstream: CancellationToken,
	waiters: Arc<AtomicUsize>,
}

/// Fingerprint-keyed memo of pending or resolved upstream responses.
pub struct RequestCache {
	entries: Mutex<FxHashMap<u64, CacheEntry>>,
	next_entry_id: AtomicU64,
}

/// Factory for per-client caches, injectable for instrumentation.
pub type CacheFactory = Arc<dyn Fn() -> RequestCache + Send + Sync>;

impl Default for RequestCache {
	fn default() -> Self {
		Self::new()
	}
}

impl RequestCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(FxHashMap::default()),
			next_entry_id: AtomicU64::new(0),
		}
	}

	/// Whether `method` belongs to the cacheable set.
	pub fn is_cacheable(method: &str) -> bool {
		CACHEABLE_METHODS.contains(&method)
	}

	/// Stable hash of a request identity.
	pub fn fingerprint(method: &str, params: &JsonValue) -> u64 {
		let mut hasher = FxHasher::default();
		method.hash(&mut hasher);
		// Object keys serialize in sorted order, so the text is canonical
		// for a given value.
		params.to_string().hash(&mut hasher);
		hasher.finish()
	}

	/// Resolves a cacheable request through the cache.
	///
	/// On a miss, `issue` runs detached under the entry's own token, so no
	/// single caller can abandon the upstream call other callers have
	/// collapsed onto. `token` is the caller's: cancelling it releases only
	/// that caller's wait, with a request-cancelled error. Every caller that
	/// stays observes the same result, failures included.
	pub async fn fetch(
		&self,
		method: &str,
		params: &JsonValue,
		token: CancellationToken,
		issue: impl FnOnce(CancellationToken) -> BoxFuture<Result<JsonValue>> + Send + 'static,
	) -> Result<JsonValue> {
		let key = Self::fingerprint(method, params);

		let entry = {
			let mut entries = self.entries.lock();
			if let Some(entry) = entries.get(&key) {
				trace!(method, key, "request cache hit");
				entry.waiters.fetch_add(1, Ordering::SeqCst);
				entry.clone()
			} else {
				trace!(method, key, "request cache miss");
				let (tx, rx) = watch::channel(None);
				let entry = CacheEntry {
					id: self.next_entry_id.fetch_add(1, Ordering::Relaxed),
					rx,
					upstream: CancellationToken::new(),
					waiters: Arc::new(AtomicUsize::new(1)),
				};
				entries.insert(key, entry.clone());
				let fut = issue(entry.upstream.clone());
				tokio::spawn(async move {
					let result = fut.await;
					let _ = tx.send(Some(Arc::new(result)));
				});
				entry
			}
		};

		let mut rx = entry.rx.clone();
		tokio::select! {
			result = wait_for_result(&mut rx) => {
				entry.waiters.fetch_sub(1, Ordering::SeqCst);
				result
			}
			_ = token.cancelled() => {
				trace!(method, key, "caller cancelled collapsed request");
				self.abandon(key, &entry);
				Err(Error::Response(ResponseError::new(ErrorCode::REQUEST_CANCELLED, format!("{method} cancelled"))))
			}
		}
	}

	/// Releases one waiter; the last one to leave a still-pending entry
	/// cancels the upstream call and clears the slot so the next identical
	/// request starts fresh.
	fn abandon(&self, key: u64, entry: &CacheEntry) {
		let mut entries = self.entries.lock();
		if entry.waiters.fetch_sub(1, Ordering::SeqCst) == 1 && entry.rx.borrow().is_none() {
			entry.upstream.cancel();
			if entries.get(&key).is_some_and(|held| held.id == entry.id) {
				entries.remove(&key);
			}
		}
	}

	/// Drops every entry; the next identical request goes upstream again.
	pub fn clear(&self) {
		let mut entries = self.entries.lock();
		if !entries.is_empty() {
			trace!(count = entries.len(), "request cache flushed");
			entries.clear();
		}
	}

	/// Number of live entries.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Whether the cache holds no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

async fn wait_for_result(rx: &mut watch::Receiver<Option<SharedResult>>) -> Result<JsonValue> {
	loop {
		if let Some(result) = rx.borrow().as_ref() {
			return (**result).clone();
		}
		if rx.changed().await.is_err() {
			return Err(Error::Protocol("cached request abandoned".into()));
		}
	}
}

#[cfg(test)]
mod tests;
