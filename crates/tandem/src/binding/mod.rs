//! Per-client binding.
//!
//! A binding attaches one client to a shared [`LanguageClient`]: it runs the
//! LSP handshake against that client, mirrors the client's documents,
//! forwards a curated subset of traffic in both directions, and arbitrates
//! which side ended the relationship.

use std::sync::Arc;

use lsp_types::notification::{Initialized, Notification};
use lsp_types::request::{Initialize, RegisterCapability, Request, UnregisterCapability};
use lsp_types::{DocumentChangeOperation, DocumentChanges, InitializeParams, Registration, TextDocumentEdit, WorkspaceEdit};
use serde_json::{Value as JsonValue, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{LanguageClient, SyncHandle, to_json};
use crate::connection::SharedConnection;
use crate::document::DocumentTracker;
use crate::error::{ErrorCode, ResponseError};
use crate::lifecycle::{DisposableCollection, deadline};
use crate::tracker::MirroredDocuments;
use crate::{Error, Result};

mod forward;

/// Which side ended a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCause {
	/// The client transport closed.
	Client,
	/// The shared language client was disposed.
	Server,
}

/// Requests from clients the broker forwards upstream.
///
/// Everything here is answered from the shared server; the cacheable subset
/// (see [`crate::cache`]) additionally collapses identical concurrent calls.
pub(crate) const FORWARDED_REQUESTS: &[&str] = &[
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
	"workspace/executeCommand",
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

/// A live client attachment.
///
/// Await [`closed`](Self::closed) for the binding's lifetime; disposal
/// releases the client connection, the document mirror, and every
/// subscription on the shared client.
pub struct Binding {
	connection: SharedConnection,
	scope: DisposableCollection,
	_sync: SyncHandle,
	end_rx: mpsc::UnboundedReceiver<EndCause>,
}

impl std::fmt::Debug for Binding {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Binding").finish_non_exhaustive()
	}
}

impl Binding {
	/// Blocks until either side ends the attachment, then tears down.
	pub async fn closed(mut self) -> EndCause {
		let cause = self.end_rx.recv().await.unwrap_or(EndCause::Client);
		self.teardown().await;
		cause
	}

	/// Releases the binding eagerly.
	pub async fn dispose(mut self) {
		self.teardown().await;
	}

	async fn teardown(&mut self) {
		self.scope.dispose();
		self.connection.dispose().await;
	}
}

/// Attaches a client connection to a shared language client.
///
/// Runs the client-side `initialize`/`initialized` handshake (bounded by
/// `client_initialization_timeout`), starts the language client if this is
/// the first attachment, replays dynamic registrations, and installs the
/// forwarding rules. The returned [`Binding`] resolves with an [`EndCause`]
/// once either transport goes away.
pub async fn bind_language_client(connection: SharedConnection, client: &LanguageClient) -> Result<Binding> {
	let scope = DisposableCollection::new();
	match attach(&connection, client, &scope).await {
		Ok((sync, end_rx)) => Ok(Binding {
			connection,
			scope,
			_sync: sync,
			end_rx,
		}),
		Err(err) => {
			scope.dispose();
			connection.dispose().await;
			Err(err)
		}
	}
}

async fn attach(connection: &SharedConnection, client: &LanguageClient, scope: &DisposableCollection) -> Result<(SyncHandle, mpsc::UnboundedReceiver<EndCause>)> {
	let timeout = client.options().client_initialization_timeout;

	// Handshake plumbing must exist before the pump starts.
	let (init_tx, init_rx) = oneshot::channel::<(JsonValue, oneshot::Sender<Result<JsonValue, ResponseError>>)>();
	let init_tx = parking_lot::Mutex::new(Some(init_tx));
	scope.push(connection.on_request(
		Initialize::METHOD,
		Arc::new(move |params, _token| {
			let pending = init_tx.lock().take();
			Box::pin(async move {
				let Some(init_tx) = pending else {
					return Err(ResponseError::new(ErrorCode::INVALID_PARAMS, "initialize received twice"));
				};
				let (reply_tx, reply_rx) = oneshot::channel();
				if init_tx.send((params, reply_tx)).is_err() {
					return Err(ResponseError::new(ErrorCode::INTERNAL_ERROR, "binding gone"));
				}
				reply_rx.await.unwrap_or_else(|_| Err(ResponseError::new(ErrorCode::INTERNAL_ERROR, "binding gone")))
			})
		}),
	));

	let (initialized_tx, initialized_rx) = oneshot::channel::<()>();
	let initialized_tx = parking_lot::Mutex::new(Some(initialized_tx));
	scope.push(connection.on_notification(
		Initialized::METHOD,
		Arc::new(move |_params| {
			if let Some(tx) = initialized_tx.lock().take() {
				let _ = tx.send(());
			}
		}),
	));

	// End-cause arbitration: first event wins.
	let (end_tx, end_rx) = mpsc::unbounded_channel();
	let tx = end_tx.clone();
	scope.push(connection.on_close(Arc::new(move || {
		let _ = tx.send(EndCause::Client);
	})));
	let tx = end_tx.clone();
	scope.push(client.on_dispose().subscribe(move |_reason| {
		let _ = tx.send(EndCause::Server);
	}));

	connection.listen();

	// 1. Client initialize, bounded and sensitive to transport loss.
	let (raw_params, reply_tx) = wait_for_client(timeout, init_rx, connection, scope).await?;
	let init_params: InitializeParams = serde_json::from_value(raw_params.clone()).map_err(|err| Error::Protocol(format!("initialize params: {err}")))?;

	// 2. First binding starts the shared client; the rest await it.
	client.start(init_params).await?;

	// 3. Per-client mirror and forwarding rules, live before the client gets
	// its initialize response.
	let mirror = MirroredDocuments::new(client.options().position_encoding);
	mirror.listen(connection.as_ref(), scope);
	let caps = ClientCaps::from_raw(&raw_params);
	forward::install(connection, client, &mirror, &caps, scope);
	let sync = client.synchronize(Arc::clone(&mirror) as Arc<dyn DocumentTracker>);

	// 4. Answer initialize with the transformed capability set.
	let registry = client.registry().ok_or(Error::ConnectionClosed)?;
	let capabilities = registry.transform_for_client(client.options().disable_save_notifications);
	let response = json!({
		"capabilities": to_json(&capabilities)?,
		"serverInfo": {"name": client.options().server_name},
	});
	if reply_tx.send(Ok(response)).is_err() {
		return Err(Error::ConnectionClosed);
	}

	// 5. Client initialized, same deadline rules.
	wait_for_client(timeout, initialized_rx, connection, scope).await?;

	// 6. Replay currently-held registrations and keep forwarding new ones.
	replay_registrations(connection, registry.registrations_for_client()).await;
	wire_registration_forwarding(connection, &registry, scope);

	info!(server = client.options().server_name.as_str(), "client attached");
	Ok((sync, end_rx))
}

/// Awaits a handshake step, surfacing `Timeout` on deadline and
/// `ConnectionClosed` if the client transport dies mid-handshake.
async fn wait_for_client<T>(timeout: std::time::Duration, step: oneshot::Receiver<T>, connection: &SharedConnection, scope: &DisposableCollection) -> Result<T> {
	let (closed_tx, closed_rx) = oneshot::channel::<()>();
	let closed_tx = parking_lot::Mutex::new(Some(closed_tx));
	scope.push(connection.on_close(Arc::new(move || {
		if let Some(tx) = closed_tx.lock().take() {
			let _ = tx.send(());
		}
	})));

	deadline(timeout, async {
		tokio::select! {
			step = step => step.map_err(|_| Error::ConnectionClosed),
			_ = closed_rx => Err(Error::ConnectionClosed),
		}
	})
	.await?
}

/// Tells a fresh client about the dynamic registrations the server already
/// holds (minus the broker-owned text-sync methods).
async fn replay_registrations(connection: &SharedConnection, registrations: Vec<Registration>) {
	if registrations.is_empty() {
		return;
	}
	let params = match to_json(&lsp_types::RegistrationParams { registrations }) {
		Ok(params) => params,
		Err(err) => {
			warn!(error = %err, "failed to serialize registration replay");
			return;
		}
	};
	if let Err(err) = connection.send_request(RegisterCapability::METHOD, params, CancellationToken::new()).await {
		debug!(error = %err, "registration replay rejected by client");
	}
}

fn wire_registration_forwarding(connection: &SharedConnection, registry: &crate::registry::CapabilityRegistry, scope: &DisposableCollection) {
	const BROKER_OWNED: &[&str] = &["textDocument/didOpen", "textDocument/didClose", "textDocument/didChange", "workspace/didChangeWorkspaceFolders"];

	let conn = Arc::clone(connection);
	scope.push(registry.on_registration().subscribe(move |added: &Vec<Registration>| {
		let registrations: Vec<Registration> = added.iter().filter(|r| !BROKER_OWNED.contains(&r.method.as_str())).cloned().collect();
		if registrations.is_empty() {
			return;
		}
		let conn = Arc::clone(&conn);
		tokio::spawn(async move {
			replay_registrations(&conn, registrations).await;
		});
	}));

	let conn = Arc::clone(connection);
	scope.push(registry.on_unregistration().subscribe(move |removed: &Vec<Registration>| {
		let unregisterations: Vec<lsp_types::Unregistration> = removed
			.iter()
			.filter(|r| !BROKER_OWNED.contains(&r.method.as_str()))
			.map(|r| lsp_types::Unregistration {
				id: r.id.clone(),
				method: r.method.clone(),
			})
			.collect();
		if unregisterations.is_empty() {
			return;
		}
		let conn = Arc::clone(&conn);
		tokio::spawn(async move {
			let params = match to_json(&lsp_types::UnregistrationParams { unregisterations }) {
				Ok(params) => params,
				Err(err) => {
					warn!(error = %err, "failed to serialize unregistration forward");
					return;
				}
			};
			if let Err(err) = conn.send_request(UnregisterCapability::METHOD, params, CancellationToken::new()).await {
				debug!(error = %err, "unregistration forward rejected by client");
			}
		});
	}));
}

/// The refresh-support flags a client advertised at initialize.
///
/// Read from the raw params so absent branches simply gate the forward off.
pub(crate) struct ClientCaps {
	pub code_lens_refresh: bool,
	pub semantic_tokens_refresh: bool,
	pub diagnostics_refresh: bool,
	pub inlay_hint_refresh: bool,
	pub inline_value_refresh: bool,
}

impl ClientCaps {
	fn from_raw(params: &JsonValue) -> Self {
		let flag = |pointer: &str| params.pointer(pointer).and_then(JsonValue::as_bool).unwrap_or(false);
		Self {
			code_lens_refresh: flag("/capabilities/workspace/codeLens/refreshSupport"),
			semantic_tokens_refresh: flag("/capabilities/workspace/semanticTokens/refreshSupport"),
			diagnostics_refresh: flag("/capabilities/workspace/diagnostics/refreshSupport"),
			inlay_hint_refresh: flag("/capabilities/workspace/inlayHint/refreshSupport"),
			inline_value_refresh: flag("/capabilities/workspace/inlineValue/refreshSupport"),
		}
	}
}

/// Keeps only the parts of a workspace edit that touch documents open in
/// `tracker`, rewriting versions to the client's own.
///
/// Ownership (the `bool`) is decided by document membership alone. Resource
/// operations ride with the owning binding's edit and are stripped
/// everywhere else; a resource-only edit has no owner, so the single-owner
/// merge reports its default.
pub(crate) fn filter_workspace_edit(edit: &WorkspaceEdit, tracker: &dyn DocumentTracker) -> (WorkspaceEdit, bool) {
	let owns_changes = edit.changes.as_ref().is_some_and(|changes| changes.keys().any(|uri| tracker.get(uri).is_some()));
	let owns_document_changes = edit.document_changes.as_ref().is_some_and(|document_changes| match document_changes {
		DocumentChanges::Edits(edits) => edits.iter().any(|edit| tracker.get(&edit.text_document.uri).is_some()),
		DocumentChanges::Operations(operations) => operations.iter().any(|operation| match operation {
			DocumentChangeOperation::Edit(edit) => tracker.get(&edit.text_document.uri).is_some(),
			DocumentChangeOperation::Op(_) => false,
		}),
	});
	let owns = owns_changes || owns_document_changes;

	let changes = edit
		.changes
		.as_ref()
		.map(|changes| changes.iter().filter(|(uri, _)| tracker.get(uri).is_some()).map(|(uri, edits)| (uri.clone(), edits.clone())).collect());

	let document_changes = edit.document_changes.as_ref().map(|document_changes| match document_changes {
		DocumentChanges::Edits(edits) => DocumentChanges::Edits(edits.iter().filter_map(|edit| rewrite_document_edit(edit, tracker)).collect()),
		DocumentChanges::Operations(operations) => DocumentChanges::Operations(
			operations
				.iter()
				.filter_map(|operation| match operation {
					DocumentChangeOperation::Edit(edit) => rewrite_document_edit(edit, tracker).map(DocumentChangeOperation::Edit),
					DocumentChangeOperation::Op(op) if owns => Some(DocumentChangeOperation::Op(op.clone())),
					DocumentChangeOperation::Op(_) => None,
				})
				.collect(),
		),
	});

	(
		WorkspaceEdit {
			changes,
			document_changes,
			change_annotations: edit.change_annotations.clone(),
		},
		owns,
	)
}

fn rewrite_document_edit(edit: &TextDocumentEdit, tracker: &dyn DocumentTracker) -> Option<TextDocumentEdit> {
	let document = tracker.get(&edit.text_document.uri)?;
	let mut rewritten = edit.clone();
	// The client knows its own version, not the server's; versioned edits
	// must match what the client holds or it will refuse them.
	rewritten.text_document.version = Some(document.version);
	Some(rewritten)
}
