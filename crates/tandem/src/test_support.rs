//! In-memory connection double shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::connection::{CloseHandler, FallbackNotificationHandler, FallbackRequestHandler, MessageConnection, NotificationHandler, RequestHandler};
use crate::error::ResponseError;
use crate::lifecycle::{BoxFuture, Disposable};
use crate::{Error, Result};

/// How a [`FakeConnection`] answers outbound requests (i.e. plays the peer).
pub type Responder = Arc<dyn Fn(String, JsonValue) -> BoxFuture<Result<JsonValue>> + Send + Sync>;

/// Scriptable [`MessageConnection`] double.
///
/// Outbound traffic is recorded and answered by an injectable responder;
/// inbound traffic is delivered through [`deliver_request`](Self::deliver_request)
/// and [`deliver_notification`](Self::deliver_notification).
pub struct FakeConnection {
	request_handlers: Arc<Mutex<HashMap<String, RequestHandler>>>,
	notification_handlers: Arc<Mutex<HashMap<String, NotificationHandler>>>,
	unhandled_request: Mutex<Option<FallbackRequestHandler>>,
	unhandled_notification: Mutex<Option<FallbackNotificationHandler>>,
	close_handlers: Mutex<Vec<CloseHandler>>,
	sent_requests: Mutex<Vec<(String, JsonValue)>>,
	sent_notifications: Mutex<Vec<(String, JsonValue)>>,
	responder: Mutex<Responder>,
	closed: AtomicBool,
	disposed: AtomicBool,
}

impl FakeConnection {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			request_handlers: Arc::new(Mutex::new(HashMap::new())),
			notification_handlers: Arc::new(Mutex::new(HashMap::new())),
			unhandled_request: Mutex::new(None),
			unhandled_notification: Mutex::new(None),
			close_handlers: Mutex::new(Vec::new()),
			sent_requests: Mutex::new(Vec::new()),
			sent_notifications: Mutex::new(Vec::new()),
			responder: Mutex::new(Arc::new(|_, _| Box::pin(async { Ok(JsonValue::Null) }))),
			closed: AtomicBool::new(false),
			disposed: AtomicBool::new(false),
		})
	}

	/// Replaces the peer script for outbound requests.
	pub fn set_responder(&self, responder: Responder) {
		*self.responder.lock() = responder;
	}

	/// Convenience: answer every outbound request by method.
	pub fn respond_with(&self, f: impl Fn(&str, &JsonValue) -> Result<JsonValue> + Send + Sync + 'static) {
		self.set_responder(Arc::new(move |method, params| {
			let result = f(&method, &params);
			Box::pin(async move { result })
		}));
	}

	/// Delivers an inbound request from the peer.
	pub async fn deliver_request(&self, method: &str, params: JsonValue) -> Result<JsonValue, ResponseError> {
		let handler = self.request_handlers.lock().get(method).cloned();
		if let Some(handler) = handler {
			return handler(params, CancellationToken::new()).await;
		}
		let fallback = self.unhandled_request.lock().clone();
		match fallback {
			Some(fallback) => fallback(method.to_string(), params, CancellationToken::new()).await,
			None => Err(ResponseError::method_not_found(method)),
		}
	}

	/// Delivers an inbound notification from the peer.
	pub fn deliver_notification(&self, method: &str, params: JsonValue) {
		let handler = self.notification_handlers.lock().get(method).cloned();
		if let Some(handler) = handler {
			handler(params);
			return;
		}
		let fallback = self.unhandled_notification.lock().clone();
		if let Some(fallback) = fallback {
			fallback(method.to_string(), params);
		}
	}

	/// Simulates the peer transport going away.
	pub fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let handlers = self.close_handlers.lock().clone();
		for handler in handlers {
			handler();
		}
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	/// Outbound requests recorded so far.
	pub fn requests(&self) -> Vec<(String, JsonValue)> {
		self.sent_requests.lock().clone()
	}

	/// Outbound notifications recorded so far.
	pub fn notifications(&self) -> Vec<(String, JsonValue)> {
		self.sent_notifications.lock().clone()
	}

	/// Outbound notifications with the given method.
	pub fn notifications_named(&self, method: &str) -> Vec<JsonValue> {
		self.sent_notifications.lock().iter().filter(|(m, _)| m == method).map(|(_, p)| p.clone()).collect()
	}

	/// Outbound requests with the given method.
	pub fn requests_named(&self, method: &str) -> Vec<JsonValue> {
		self.sent_requests.lock().iter().filter(|(m, _)| m == method).map(|(_, p)| p.clone()).collect()
	}

	/// Whether a request handler is registered for `method`.
	pub fn has_request_handler(&self, method: &str) -> bool {
		self.request_handlers.lock().contains_key(method)
	}
}

#[async_trait]
impl MessageConnection for FakeConnection {
	async fn send_request(&self, method: &str, params: JsonValue, _token: CancellationToken) -> Result<JsonValue> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ConnectionClosed);
		}
		self.sent_requests.lock().push((method.to_string(), params.clone()));
		let responder = self.responder.lock().clone();
		responder(method.to_string(), params).await
	}

	async fn send_notification(&self, method: &str, params: JsonValue) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ConnectionClosed);
		}
		self.sent_notifications.lock().push((method.to_string(), params));
		Ok(())
	}

	fn on_request(&self, method: &str, handler: RequestHandler) -> Disposable {
		let method = method.to_string();
		self.request_handlers.lock().insert(method.clone(), handler);
		let handlers = Arc::clone(&self.request_handlers);
		Disposable::new(move || {
			handlers.lock().remove(&method);
		})
	}

	fn on_notification(&self, method: &str, handler: NotificationHandler) -> Disposable {
		let method = method.to_string();
		self.notification_handlers.lock().insert(method.clone(), handler);
		let handlers = Arc::clone(&self.notification_handlers);
		Disposable::new(move || {
			handlers.lock().remove(&method);
		})
	}

	fn on_unhandled_request(&self, handler: FallbackRequestHandler) -> Disposable {
		*self.unhandled_request.lock() = Some(handler);
		Disposable::noop()
	}

	fn on_unhandled_notification(&self, handler: FallbackNotificationHandler) -> Disposable {
		*self.unhandled_notification.lock() = Some(handler);
		Disposable::noop()
	}

	fn on_close(&self, handler: CloseHandler) -> Disposable {
		self.close_handlers.lock().push(handler);
		Disposable::noop()
	}

	fn listen(&self) {}

	async fn dispose(&self) {
		self.disposed.store(true, Ordering::SeqCst);
		self.close();
	}
}
