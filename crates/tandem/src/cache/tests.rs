use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::*;

fn counted_issue(count: &Arc<AtomicUsize>, result: JsonValue) -> impl FnOnce(CancellationToken) -> BoxFuture<Result<JsonValue>> + Send + 'static {
	let count = count.clone();
	move |_upstream| {
		count.fetch_add(1, Ordering::SeqCst);
		Box::pin(async move { Ok(result) })
	}
}

#[tokio::test]
async fn identical_requests_collapse_to_one_upstream_call() {
	let cache = Arc::new(RequestCache::new());
	let upstream_calls = Arc::new(AtomicUsize::new(0));
	let params = json!({"textDocument": {"uri": "file:///m.json"}, "position": {"line": 1, "character": 2}});

	let first = cache
		.fetch("textDocument/hover", &params, CancellationToken::new(), counted_issue(&upstream_calls, json!({"contents": "docs"})))
		.await
		.unwrap();
	let second = cache
		.fetch("textDocument/hover", &params, CancellationToken::new(), counted_issue(&upstream_calls, json!({"contents": "stale"})))
		.await
		.unwrap();

	assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
	assert_eq!(first, second);
	assert_eq!(first, json!({"contents": "docs"}));
}

#[tokio::test]
async fn concurrent_requests_share_the_pending_handle() {
	let cache = Arc::new(RequestCache::new());
	let upstream_calls = Arc::new(AtomicUsize::new(0));
	let gate = Arc::new(tokio::sync::Notify::new());
	let params = json!({"position": [0, 0]});

	let issue = {
		let calls = upstream_calls.clone();
		let gate = gate.clone();
		move |_upstream: CancellationToken| -> BoxFuture<Result<JsonValue>> {
			calls.fetch_add(1, Ordering::SeqCst);
			Box::pin(async move {
				gate.notified().await;
				Ok(json!("shared"))
			})
		}
	};

	let a = tokio::spawn({
		let cache = cache.clone();
		let params = params.clone();
		async move { cache.fetch("textDocument/hover", &params, CancellationToken::new(), issue).await }
	});
	tokio::task::yield_now().await;

	let b = tokio::spawn({
		let cache = cache.clone();
		let params = params.clone();
		let calls = upstream_calls.clone();
		async move { cache.fetch("textDocument/hover", &params, CancellationToken::new(), counted_issue(&calls, json!("unused"))).await }
	});
	tokio::task::yield_now().await;

	gate.notify_waiters();
	let (a, b) = tokio::join!(a, b);
	assert_eq!(a.unwrap().unwrap(), json!("shared"));
	assert_eq!(b.unwrap().unwrap(), json!("shared"));
	assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn leader_cancellation_does_not_poison_other_callers() {
	let cache = Arc::new(RequestCache::new());
	let upstream_calls = Arc::new(AtomicUsize::new(0));
	let gate = Arc::new(tokio::sync::Notify::new());
	let params = json!({"position": [1, 2]});

	// The collapsed call must run under its own token, never the leader's.
	let seen_upstream = Arc::new(parking_lot::Mutex::new(None::<CancellationToken>));
	let issue = {
		let calls = upstream_calls.clone();
		let gate = gate.clone();
		let seen = seen_upstream.clone();
		move |upstream: CancellationToken| -> BoxFuture<Result<JsonValue>> {
			calls.fetch_add(1, Ordering::SeqCst);
			*seen.lock() = Some(upstream);
			Box::pin(async move {
				gate.notified().await;
				Ok(json!("survives"))
			})
		}
	};

	let leader_token = CancellationToken::new();
	let leader = tokio::spawn({
		let cache = cache.clone();
		let params = params.clone();
		let token = leader_token.clone();
		async move { cache.fetch("textDocument/hover", &params, token, issue).await }
	});
	tokio::task::yield_now().await;

	let waiter = tokio::spawn({
		let cache = cache.clone();
		let params = params.clone();
		let calls = upstream_calls.clone();
		async move { cache.fetch("textDocument/hover", &params, CancellationToken::new(), counted_issue(&calls, json!("unused"))).await }
	});
	tokio::task::yield_now().await;

	leader_token.cancel();
	let leader = leader.await.unwrap();
	let err = leader.unwrap_err();
	assert!(matches!(&err, Error::Response(response) if response.code == ErrorCode::REQUEST_CANCELLED));

	// The upstream call is still running for the remaining caller.
	assert!(!seen_upstream.lock().as_ref().unwrap().is_cancelled());

	gate.notify_waiters();
	assert_eq!(waiter.await.unwrap().unwrap(), json!("survives"));
	assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn last_caller_leaving_aborts_the_upstream_call() {
	let cache = Arc::new(RequestCache::new());
	let upstream_calls = Arc::new(AtomicUsize::new(0));
	let params = json!({});

	let seen_upstream = Arc::new(parking_lot::Mutex::new(None::<CancellationToken>));
	let issue = {
		let calls = upstream_calls.clone();
		let seen = seen_upstream.clone();
		move |upstream: CancellationToken| -> BoxFuture<Result<JsonValue>> {
			calls.fetch_add(1, Ordering::SeqCst);
			*seen.lock() = Some(upstream);
			Box::pin(async move { std::future::pending().await })
		}
	};

	let token = CancellationToken::new();
	let caller = tokio::spawn({
		let cache = cache.clone();
		let params = params.clone();
		let token = token.clone();
		async move { cache.fetch("textDocument/hover", &params, token, issue).await }
	});
	tokio::task::yield_now().await;

	token.cancel();
	assert!(caller.await.unwrap().is_err());

	// The slot is gone and the upstream call was told to stop.
	assert!(seen_upstream.lock().as_ref().unwrap().is_cancelled());
	assert!(cache.is_empty());

	// The next identical request goes upstream again.
	cache
		.fetch("textDocument/hover", &params, CancellationToken::new(), counted_issue(&upstream_calls, json!("fresh")))
		.await
		.unwrap();
	assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clear_forces_a_fresh_upstream_call() {
	let cache = RequestCache::new();
	let upstream_calls = Arc::new(AtomicUsize::new(0));
	let params = json!({"q": 1});

	cache
		.fetch("textDocument/definition", &params, CancellationToken::new(), counted_issue(&upstream_calls, json!(1)))
		.await
		.unwrap();
	cache.clear();
	let fresh = cache
		.fetch("textDocument/definition", &params, CancellationToken::new(), counted_issue(&upstream_calls, json!(2)))
		.await
		.unwrap();

	assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
	assert_eq!(fresh, json!(2));
}

#[tokio::test]
async fn failures_are_shared_until_cleared() {
	let cache = RequestCache::new();
	let upstream_calls = Arc::new(AtomicUsize::new(0));
	let params = json!({});

	let issue = {
		let calls = upstream_calls.clone();
		move |_upstream: CancellationToken| -> BoxFuture<Result<JsonValue>> {
			calls.fetch_add(1, Ordering::SeqCst);
			Box::pin(async { Err(Error::Transport("server hiccup".into())) })
		}
	};

	let first = cache.fetch("textDocument/hover", &params, CancellationToken::new(), issue).await;
	assert!(first.is_err());

	// Same failed handle, no second upstream call.
	let second = cache
		.fetch("textDocument/hover", &params, CancellationToken::new(), counted_issue(&upstream_calls, json!("never")))
		.await;
	assert!(second.is_err());
	assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn different_params_have_different_fingerprints() {
	let cache = RequestCache::new();
	let upstream_calls = Arc::new(AtomicUsize::new(0));

	cache
		.fetch("textDocument/hover", &json!({"line": 1}), CancellationToken::new(), counted_issue(&upstream_calls, json!(1)))
		.await
		.unwrap();
	cache
		.fetch("textDocument/hover", &json!({"line": 2}), CancellationToken::new(), counted_issue(&upstream_calls, json!(2)))
		.await
		.unwrap();

	assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn fingerprint_is_stable_across_key_order() {
	// serde_json sorts object keys, so semantically equal params hash equal.
	let a: JsonValue = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
	let b: JsonValue = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
	assert_eq!(RequestCache::fingerprint("m", &a), RequestCache::fingerprint("m", &b));
}

#[test]
fn cacheable_set_excludes_execute_command() {
	assert!(RequestCache::is_cacheable("textDocument/hover"));
	assert!(RequestCache::is_cacheable("textDocument/completion"));
	assert!(!RequestCache::is_cacheable("workspace/executeCommand"));
	assert!(!RequestCache::is_cacheable("textDocument/didChange"));
}
