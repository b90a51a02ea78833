//! Injected configuration for a [`crate::LanguageClient`] and its bindings.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheFactory;
use crate::diff::DEFAULT_DIFF_BUDGET;
use crate::error::ResponseError;
use crate::lifecycle::BoxFuture;
use crate::position::OffsetEncoding;

/// Resolves a configuration section for server-initiated
/// `workspace/configuration` requests. Scope URIs are ignored: the broker
/// holds one global view.
pub type ConfigurationResolver = Arc<dyn Fn(&str) -> JsonValue + Send + Sync>;

/// Delegate for client requests outside the forwarded set.
pub type UnknownRequestHandler = Arc<dyn Fn(String, JsonValue, CancellationToken) -> BoxFuture<Result<JsonValue, ResponseError>> + Send + Sync>;

/// Hook for server notifications no installed handler claims.
pub type NotificationHook = Arc<dyn Fn(&str, &JsonValue) + Send + Sync>;

/// Options for one upstream server connection and its bindings.
#[derive(Clone)]
pub struct LanguageClientOptions {
	/// Name reported to clients in `serverInfo`.
	pub server_name: String,
	/// Configuration sections pushed via `workspace/didChangeConfiguration`
	/// right after initialization.
	pub synchronize_configuration_sections: Vec<String>,
	/// Resolver for server-initiated configuration requests.
	pub get_configuration: Option<ConfigurationResolver>,
	/// Suppresses the will-save/did-save pathways entirely.
	pub disable_save_notifications: bool,
	/// Claim the did-change-watched-files client capability and accept file
	/// events programmatically via
	/// [`crate::LanguageClient::notify_file_changes`].
	pub intercept_did_change_watched_file: bool,
	/// Factory for the per-server response cache.
	pub create_cache: Option<CacheFactory>,
	/// Deadline for a client's `initialize`/`initialized` handshake.
	pub client_initialization_timeout: Duration,
	/// Delegate for client requests the broker does not forward itself.
	pub unknown_client_request_handler: Option<UnknownRequestHandler>,
	/// Vendor method prefix (e.g. `"rust-analyzer/"`) forwarded to the
	/// server when no unknown-request delegate is installed.
	pub vendor_request_prefix: Option<String>,
	/// Hook for unhandled server notifications; dropped when absent.
	pub unhandled_notification_handler: Option<NotificationHook>,
	/// Trailing debounce window for document changes.
	pub debounce_window: Duration,
	/// Time budget for incremental diffing before the full-text fallback.
	pub diff_budget: Duration,
	/// Position encoding used on both sides of the broker.
	pub position_encoding: OffsetEncoding,
}

impl Default for LanguageClientOptions {
	fn default() -> Self {
		Self {
			server_name: "tandem".into(),
			synchronize_configuration_sections: Vec::new(),
			get_configuration: None,
			disable_save_notifications: false,
			intercept_did_change_watched_file: false,
			create_cache: None,
			client_initialization_timeout: Duration::from_secs(10),
			unknown_client_request_handler: None,
			vendor_request_prefix: None,
			unhandled_notification_handler: None,
			debounce_window: Duration::from_millis(500),
			diff_budget: DEFAULT_DIFF_BUDGET,
			position_encoding: OffsetEncoding::default(),
		}
	}
}
