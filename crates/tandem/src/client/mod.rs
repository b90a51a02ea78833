//! The broker's authoritative view of one upstream language server.
//!
//! A [`LanguageClient`] owns the server connection, the shared document set,
//! the capability registry, the diagnostics cache, the response cache, and
//! every cross-cutting fan-out event. Bindings attach to it; it never knows
//! individual clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::notification::{DidChangeConfiguration, DidChangeWatchedFiles, Exit, Initialized, Notification};
use lsp_types::request::{Initialize, Request, Shutdown};
use lsp_types::{Diagnostic, FileEvent, InitializeParams, InitializeResult, PublishDiagnosticsParams, Uri};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value as JsonValue, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::RequestCache;
use crate::config::LanguageClientOptions;
use crate::connection::SharedConnection;
use crate::dispatch::MultiHandler;
use crate::document::Document;
use crate::event::Emitter;
use crate::lifecycle::{Debouncer, DisposableCollection};
use crate::registry::CapabilityRegistry;
use crate::uri::path_of;
use crate::{Error, Result};

mod handlers;
mod sync;

pub use sync::SyncHandle;

/// Lifecycle states of a [`LanguageClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	/// Created, not yet started.
	Idle,
	/// `initialize` handshake in flight.
	Starting,
	/// Initialized and serving.
	Ready,
	/// Torn down; terminal.
	Disposed,
}

/// Why a [`LanguageClient`] was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
	/// Disposal initiated on this side (explicit call or start failure).
	Local,
	/// The server transport went away.
	Remote,
}

/// Fan-out events a [`LanguageClient`] emits.
pub(crate) struct ClientEvents {
	pub on_dispose: Emitter<DisposeReason>,
	pub on_diagnostics: Emitter<PublishDiagnosticsParams>,
	pub on_document_open: Emitter<Document>,
	pub on_document_changed: Emitter<Document>,
	pub on_document_closed: Emitter<Document>,
	pub on_watched_files_changed: Emitter<()>,
}

/// Server-initiated requests fanned out to every binding.
pub(crate) struct RefreshDispatch {
	pub code_lens: MultiHandler<(), ()>,
	pub semantic_tokens: MultiHandler<(), ()>,
	pub diagnostics: MultiHandler<(), ()>,
	pub inlay_hint: MultiHandler<(), ()>,
	pub inline_value: MultiHandler<(), ()>,
	pub apply_edit: MultiHandler<lsp_types::ApplyWorkspaceEditParams, Option<lsp_types::ApplyWorkspaceEditResponse>>,
	pub show_document: MultiHandler<lsp_types::ShowDocumentParams, Option<lsp_types::ShowDocumentResult>>,
}

pub(crate) struct ClientInner {
	pub connection: SharedConnection,
	pub options: LanguageClientOptions,
	pub state: watch::Sender<ClientState>,
	pub registry: RwLock<Option<Arc<CapabilityRegistry>>>,
	/// Authoritative documents keyed by URI text; versions are the
	/// server-visible ones.
	pub documents: RwLock<HashMap<String, Document>>,
	/// Last published diagnostics per open URI.
	pub diagnostics: RwLock<HashMap<String, Vec<Diagnostic>>>,
	pub cache: RequestCache,
	/// The params of the first client's `initialize`, kept to answer
	/// `workspace/workspaceFolders`.
	pub initialize_params: Mutex<Option<InitializeParams>>,
	pub events: ClientEvents,
	pub refresh: RefreshDispatch,
	/// Attached document trackers, one per live binding.
	pub trackers: Mutex<Vec<(u64, Arc<dyn crate::document::DocumentTracker>)>>,
	pub sync_tx: mpsc::UnboundedSender<sync::SyncCommand>,
	pub debouncer: Mutex<Option<Debouncer>>,
	/// Scope for connection handler registrations and tracker plumbing.
	pub scope: DisposableCollection,
	pub next_tracker_id: std::sync::atomic::AtomicU64,
}

/// One shared upstream language server.
#[derive(Clone)]
pub struct LanguageClient {
	inner: Arc<ClientInner>,
}

impl LanguageClient {
	/// Creates a client over a server connection. The connection is not
	/// touched until [`start`](Self::start).
	///
	/// Spawns the synchronization worker, so this must run inside a Tokio
	/// runtime.
	pub fn new(connection: SharedConnection, options: LanguageClientOptions) -> Self {
		let (state, _) = watch::channel(ClientState::Idle);
		let (sync_tx, sync_rx) = mpsc::unbounded_channel();
		let cache = options.create_cache.as_ref().map(|factory| factory()).unwrap_or_default();

		let inner = Arc::new(ClientInner {
			connection,
			options,
			state,
			registry: RwLock::new(None),
			documents: RwLock::new(HashMap::new()),
			diagnostics: RwLock::new(HashMap::new()),
			cache,
			initialize_params: Mutex::new(None),
			events: ClientEvents {
				on_dispose: Emitter::new(),
				on_diagnostics: Emitter::new(),
				on_document_open: Emitter::new(),
				on_document_changed: Emitter::new(),
				on_document_closed: Emitter::new(),
				on_watched_files_changed: Emitter::new(),
			},
			refresh: RefreshDispatch {
				code_lens: MultiHandler::new(),
				semantic_tokens: MultiHandler::new(),
				diagnostics: MultiHandler::new(),
				inlay_hint: MultiHandler::new(),
				inline_value: MultiHandler::new(),
				apply_edit: MultiHandler::new(),
				show_document: MultiHandler::new(),
			},
			trackers: Mutex::new(Vec::new()),
			sync_tx,
			debouncer: Mutex::new(None),
			scope: DisposableCollection::new(),
			next_tracker_id: std::sync::atomic::AtomicU64::new(0),
		});

		let debounce_tx = inner.sync_tx.clone();
		let debouncer = Debouncer::new(inner.options.debounce_window, move || {
			let _ = debounce_tx.send(sync::SyncCommand::Flush(None));
			Box::pin(async {})
		});
		*inner.debouncer.lock() = Some(debouncer);

		sync::spawn_worker(Arc::clone(&inner), sync_rx);

		Self { inner }
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ClientState {
		*self.inner.state.borrow()
	}

	/// Whether the client reached `Ready` and has not been disposed.
	pub fn is_ready(&self) -> bool {
		self.state() == ClientState::Ready
	}

	/// The injected options.
	pub fn options(&self) -> &LanguageClientOptions {
		&self.inner.options
	}

	/// The capability registry, once started.
	pub fn registry(&self) -> Option<Arc<CapabilityRegistry>> {
		self.inner.registry.read().clone()
	}

	/// Starts the server handshake, once.
	///
	/// The first caller drives `initialize`/`initialized`; concurrent and
	/// later callers await the same outcome. A failed start disposes the
	/// client.
	pub async fn start(&self, params: InitializeParams) -> Result<()> {
		let mut claimed = false;
		self.inner.state.send_if_modified(|state| {
			if *state == ClientState::Idle {
				*state = ClientState::Starting;
				claimed = true;
				true
			} else {
				false
			}
		});

		if !claimed {
			return self.wait_until_ready().await;
		}

		match self.run_handshake(params).await {
			Ok(()) => {
				self.inner.state.send_if_modified(|state| {
					if *state == ClientState::Starting {
						*state = ClientState::Ready;
						true
					} else {
						false
					}
				});
				if self.state() == ClientState::Disposed {
					return Err(Error::ConnectionClosed);
				}
				Ok(())
			}
			Err(err) => {
				warn!(error = %err, "language server start failed");
				self.dispose_with(DisposeReason::Local).await;
				Err(err)
			}
		}
	}

	/// Awaits an in-flight or completed start.
	pub async fn wait_until_ready(&self) -> Result<()> {
		let mut state_rx = self.inner.state.subscribe();
		loop {
			match *state_rx.borrow_and_update() {
				ClientState::Ready => return Ok(()),
				ClientState::Disposed => return Err(Error::ConnectionClosed),
				ClientState::Idle | ClientState::Starting => {}
			}
			if state_rx.changed().await.is_err() {
				return Err(Error::ConnectionClosed);
			}
		}
	}

	async fn run_handshake(&self, mut params: InitializeParams) -> Result<()> {
		let inner = &self.inner;

		// When intercepting watched files, the broker owns that capability no
		// matter what the first client advertised.
		if inner.options.intercept_did_change_watched_file {
			let workspace = params.capabilities.workspace.get_or_insert_with(Default::default);
			workspace.did_change_watched_files = Some(lsp_types::DidChangeWatchedFilesClientCapabilities {
				dynamic_registration: Some(true),
				relative_pattern_support: Some(true),
			});
		}

		*inner.initialize_params.lock() = Some(params.clone());

		// Handlers must be live before the first request goes out; the
		// server may talk back mid-initialize.
		handlers::install(self, &inner.scope);
		let this = self.clone();
		inner.scope.push(inner.connection.on_close(Arc::new(move || {
			let this = this.clone();
			tokio::spawn(async move {
				this.dispose_with(DisposeReason::Remote).await;
			});
		})));
		inner.connection.listen();

		info!(server = inner.options.server_name.as_str(), "initializing language server");
		let result = inner
			.connection
			.send_request(Initialize::METHOD, to_json(&params)?, CancellationToken::new())
			.await?;
		let initialize_result: InitializeResult = from_json(Initialize::METHOD, result)?;

		*inner.registry.write() = Some(Arc::new(CapabilityRegistry::new(initialize_result.capabilities)));

		inner.connection.send_notification(Initialized::METHOD, json!({})).await?;

		self.push_configuration().await?;
		Ok(())
	}

	/// Pushes `workspace/didChangeConfiguration` for the configured sections.
	async fn push_configuration(&self) -> Result<()> {
		let inner = &self.inner;
		let sections = &inner.options.synchronize_configuration_sections;
		if sections.is_empty() {
			return Ok(());
		}
		let Some(resolve) = inner.options.get_configuration.as_ref() else {
			return Ok(());
		};

		let mut settings = serde_json::Map::new();
		for section in sections {
			settings.insert(section.clone(), resolve(section));
		}
		inner
			.connection
			.send_notification(DidChangeConfiguration::METHOD, json!({ "settings": JsonValue::Object(settings) }))
			.await
	}

	/// Disposes the client: `shutdown`, `exit`, then transport teardown.
	///
	/// Safe to call at any point of the lifecycle, including mid-start.
	pub async fn dispose(&self) {
		self.dispose_with(DisposeReason::Local).await;
	}

	pub(crate) async fn dispose_with(&self, reason: DisposeReason) {
		let previous = self.inner.state.send_replace(ClientState::Disposed);
		if previous == ClientState::Disposed {
			return;
		}

		debug!(?reason, "disposing language client");
		if let Some(debouncer) = self.inner.debouncer.lock().as_ref() {
			debouncer.clear();
		}
		let _ = self.inner.sync_tx.send(sync::SyncCommand::Stop);
		self.inner.scope.dispose();

		if reason == DisposeReason::Local && previous != ClientState::Idle {
			let shutdown = self.inner.connection.send_request(Shutdown::METHOD, JsonValue::Null, CancellationToken::new());
			if let Err(err) = crate::lifecycle::deadline(Duration::from_secs(5), shutdown).await.and_then(|r| r) {
				debug!(error = %err, "shutdown request failed");
			}
			let _ = self.inner.connection.send_notification(Exit::METHOD, JsonValue::Null).await;
		}
		self.inner.connection.dispose().await;

		self.inner.events.on_dispose.emit(&reason);
	}

	/// Forwards a request upstream, flushing pending document changes first
	/// so stale state never answers fresh questions. Cacheable methods go
	/// through the response cache.
	pub async fn request(&self, method: &str, params: JsonValue, token: CancellationToken) -> Result<JsonValue> {
		if self.state() == ClientState::Disposed {
			return Err(Error::ConnectionClosed);
		}
		self.flush_pending().await;

		if RequestCache::is_cacheable(method) {
			let connection = Arc::clone(&self.inner.connection);
			let method_owned = method.to_string();
			let params_clone = params.clone();
			// The collapsed call runs under the cache's token, not the
			// caller's; `token` only releases this caller's wait.
			self.inner
				.cache
				.fetch(method, &params, token, move |upstream_token| {
					Box::pin(async move { connection.send_request(&method_owned, params_clone, upstream_token).await })
				})
				.await
		} else {
			self.inner.connection.send_request(method, params, token).await
		}
	}

	/// Forces the debounced change pipeline through, inline.
	pub async fn flush_pending(&self) {
		if let Some(debouncer) = self.inner.debouncer.lock().as_ref() {
			debouncer.clear();
		}
		let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
		if self.inner.sync_tx.send(sync::SyncCommand::Flush(Some(ack_tx))).is_ok() {
			let _ = ack_rx.await;
		}
	}

	/// Forwards file-change events through the dynamically registered
	/// watchers. Events no watcher covers are dropped.
	pub async fn notify_file_changes(&self, events: Vec<FileEvent>) -> Result<()> {
		let Some(registry) = self.registry() else {
			return Err(Error::Protocol("client not started".into()));
		};

		let watched: Vec<FileEvent> = events
			.into_iter()
			.filter(|event| registry.is_path_watched(std::path::Path::new(&path_of(&event.uri)), event.typ))
			.collect();
		if watched.is_empty() {
			return Ok(());
		}

		self.inner
			.connection
			.send_notification(DidChangeWatchedFiles::METHOD, to_json(&lsp_types::DidChangeWatchedFilesParams { changes: watched })?)
			.await
	}

	/// Cached diagnostics for an open URI.
	pub fn diagnostics_for(&self, uri: &Uri) -> Option<Vec<Diagnostic>> {
		self.inner.diagnostics.read().get(uri.as_str()).cloned()
	}

	/// Whether the broker holds `uri` open on the server.
	pub fn is_document_open(&self, uri: &Uri) -> bool {
		self.inner.documents.read().contains_key(uri.as_str())
	}

	/// Snapshot of the authoritative document set.
	pub fn documents(&self) -> Vec<Document> {
		self.inner.documents.read().values().cloned().collect()
	}

	/// The authoritative (server-visible) copy of `uri`.
	pub fn document(&self, uri: &Uri) -> Option<Document> {
		self.inner.documents.read().get(uri.as_str()).cloned()
	}

	/// Event: the client was disposed, with its end cause.
	pub fn on_dispose(&self) -> &Emitter<DisposeReason> {
		&self.inner.events.on_dispose
	}

	/// Event: the server published diagnostics.
	pub fn on_diagnostics(&self) -> &Emitter<PublishDiagnosticsParams> {
		&self.inner.events.on_diagnostics
	}

	/// Event: a document joined the authoritative set.
	pub fn on_document_open(&self) -> &Emitter<Document> {
		&self.inner.events.on_document_open
	}

	/// Event: an authoritative document was flushed to the server.
	pub fn on_document_changed(&self) -> &Emitter<Document> {
		&self.inner.events.on_document_changed
	}

	/// Event: a document left the authoritative set.
	pub fn on_document_closed(&self) -> &Emitter<Document> {
		&self.inner.events.on_document_closed
	}

	/// Event: the set of watched-file registrations changed.
	pub fn on_watched_files_changed(&self) -> &Emitter<()> {
		&self.inner.events.on_watched_files_changed
	}

	/// Fan-out endpoint for `workspace/codeLens/refresh`.
	pub fn code_lens_refresh(&self) -> &MultiHandler<(), ()> {
		&self.inner.refresh.code_lens
	}

	/// Fan-out endpoint for `workspace/semanticTokens/refresh`.
	pub fn semantic_tokens_refresh(&self) -> &MultiHandler<(), ()> {
		&self.inner.refresh.semantic_tokens
	}

	/// Fan-out endpoint for `workspace/diagnostic/refresh`.
	pub fn diagnostics_refresh(&self) -> &MultiHandler<(), ()> {
		&self.inner.refresh.diagnostics
	}

	/// Fan-out endpoint for `workspace/inlayHint/refresh`.
	pub fn inlay_hint_refresh(&self) -> &MultiHandler<(), ()> {
		&self.inner.refresh.inlay_hint
	}

	/// Fan-out endpoint for `workspace/inlineValue/refresh`.
	pub fn inline_value_refresh(&self) -> &MultiHandler<(), ()> {
		&self.inner.refresh.inline_value
	}

	/// Fan-out endpoint for `workspace/applyEdit`; exactly one binding
	/// should claim each edit.
	pub fn apply_edit(&self) -> &MultiHandler<lsp_types::ApplyWorkspaceEditParams, Option<lsp_types::ApplyWorkspaceEditResponse>> {
		&self.inner.refresh.apply_edit
	}

	/// Fan-out endpoint for `window/showDocument`.
	pub fn show_document(&self) -> &MultiHandler<lsp_types::ShowDocumentParams, Option<lsp_types::ShowDocumentResult>> {
		&self.inner.refresh.show_document
	}

	/// The workspace folders from the stored initialize params.
	pub(crate) fn workspace_folders(&self) -> JsonValue {
		let params = self.inner.initialize_params.lock();
		match params.as_ref().and_then(|p| p.workspace_folders.as_ref()) {
			Some(folders) => to_json(folders).unwrap_or(JsonValue::Null),
			None => JsonValue::Null,
		}
	}

	pub(crate) fn inner(&self) -> &Arc<ClientInner> {
		&self.inner
	}
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue> {
	serde_json::to_value(value).map_err(|err| Error::Protocol(format!("serialize: {err}")))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(method: &str, value: JsonValue) -> Result<T> {
	serde_json::from_value(value).map_err(|err| Error::Protocol(format!("{method}: malformed payload: {err}")))
}
