//! Transport seam.
//!
//! The broker is transport-agnostic: stdio, sockets, pipes, and websockets
//! all reach it through [`MessageConnection`]. Implementations own JSON-RPC
//! framing and delivery; the broker only registers handlers and exchanges
//! `serde_json` payloads.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::ResponseError;
use crate::lifecycle::{BoxFuture, Disposable};

/// Handler for an inbound request on a connection.
pub type RequestHandler = Arc<dyn Fn(JsonValue, CancellationToken) -> BoxFuture<Result<JsonValue, ResponseError>> + Send + Sync>;

/// Handler for an inbound notification on a connection.
pub type NotificationHandler = Arc<dyn Fn(JsonValue) + Send + Sync>;

/// Fallback handler for requests no specific handler claims; receives the
/// method name.
pub type FallbackRequestHandler = Arc<dyn Fn(String, JsonValue, CancellationToken) -> BoxFuture<Result<JsonValue, ResponseError>> + Send + Sync>;

/// Fallback handler for notifications no specific handler claims.
pub type FallbackNotificationHandler = Arc<dyn Fn(String, JsonValue) + Send + Sync>;

/// Handler invoked when the peer transport goes away.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// A JSON-RPC peer connection.
///
/// One instance fronts the upstream server (the broker acts as client) and
/// one fronts each attached client (the broker acts as server). Handler
/// registration must be completed before [`listen`](Self::listen) releases
/// the message pump, or early traffic races the handler table.
#[async_trait]
pub trait MessageConnection: Send + Sync {
	/// Sends a request and awaits the response.
	///
	/// A response carrying an error object surfaces as
	/// [`crate::Error::Response`] with the peer's code, message, and data
	/// intact. `token` cancels the request on the wire when triggered.
	async fn send_request(&self, method: &str, params: JsonValue, token: CancellationToken) -> Result<JsonValue>;

	/// Sends a notification.
	async fn send_notification(&self, method: &str, params: JsonValue) -> Result<()>;

	/// Registers the handler for an inbound request method.
	fn on_request(&self, method: &str, handler: RequestHandler) -> Disposable;

	/// Registers the handler for an inbound notification method.
	fn on_notification(&self, method: &str, handler: NotificationHandler) -> Disposable;

	/// Registers the fallback for requests no specific handler claims.
	fn on_unhandled_request(&self, handler: FallbackRequestHandler) -> Disposable;

	/// Registers the fallback for notifications no specific handler claims.
	fn on_unhandled_notification(&self, handler: FallbackNotificationHandler) -> Disposable;

	/// Registers a close observer; fires once when the peer goes away.
	fn on_close(&self, handler: CloseHandler) -> Disposable;

	/// Starts pumping messages. Idempotent.
	fn listen(&self);

	/// Tears the connection down and releases the transport.
	async fn dispose(&self);
}

/// Shared handle to a connection.
pub type SharedConnection = Arc<dyn MessageConnection>;
