//! Error taxonomy for the broker core.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the broker.
///
/// Per-message forwarding failures are logged and swallowed by the callers;
/// these variants surface only from initialization paths, the transport seam,
/// and deadline races.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	/// The peer transport went away.
	#[error("connection closed")]
	ConnectionClosed,
	/// A deadline was exceeded (client handshake, diff budget, ...).
	#[error("timed out after {0:?}")]
	Timeout(std::time::Duration),
	/// The peer asked for a method the broker does not implement.
	#[error("method not found: {0}")]
	MethodNotFound(String),
	/// A single-handler merge saw zero or more than one answer.
	#[error("expected exactly one handler response, got {0}")]
	HandlerCountMismatch(usize),
	/// Sending over the transport failed.
	#[error("transport: {0}")]
	Transport(String),
	/// Malformed or unexpected payload.
	#[error("protocol: {0}")]
	Protocol(String),
	/// An error response from the peer, forwarded verbatim.
	#[error("{}: {} (code {})", .0.code.describe(), .0.message, .0.code.0)]
	Response(ResponseError),
}

impl From<ResponseError> for Error {
	fn from(err: ResponseError) -> Self {
		Self::Response(err)
	}
}

/// JSON-RPC error codes relevant to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
	/// Invalid method parameter(s).
	pub const INVALID_PARAMS: Self = Self(-32602);
	/// The method does not exist or is not available.
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	/// Internal JSON-RPC error.
	pub const INTERNAL_ERROR: Self = Self(-32603);
	/// The request was cancelled by the client.
	pub const REQUEST_CANCELLED: Self = Self(-32800);

	fn describe(self) -> &'static str {
		match self {
			Self::INVALID_PARAMS => "invalid params",
			Self::METHOD_NOT_FOUND => "method not found",
			Self::REQUEST_CANCELLED => "request cancelled",
			_ => "response error",
		}
	}
}

/// The error object of a JSON-RPC response.
///
/// Carried through unchanged so clients observe the same code, message, and
/// data the server produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
	/// Error code.
	pub code: ErrorCode,
	/// Short human-readable description.
	pub message: String,
	/// Optional structured payload.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// Creates a response error without data.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Creates a `MethodNotFound` response for the given method.
	pub fn method_not_found(method: &str) -> Self {
		Self::new(ErrorCode::METHOD_NOT_FOUND, format!("method '{method}' not supported"))
	}
}

impl std::fmt::Display for ResponseError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} (code {})", self.message, self.code.0)
	}
}
