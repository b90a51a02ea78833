//! Document synchronization between attached trackers and the server.
//!
//! All mutations of the authoritative document set funnel through one worker
//! task, so per-document ordering (`didOpen → didChange* → didSave? →
//! didClose`) holds no matter how many bindings feed events in. Content
//! changes are debounced; a flush command (from the debouncer or from the
//! pre-request signal) drains the dirty set inline.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use lsp_types::notification::{DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Notification, WillSaveTextDocument};
use lsp_types::{
	DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams, TextDocumentIdentifier, TextDocumentItem,
	TextDocumentSyncKind, VersionedTextDocumentIdentifier, WillSaveTextDocumentParams,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{ClientInner, ClientState, LanguageClient, to_json};
use crate::diff;
use crate::document::{Document, DocumentTracker, WillSaveEvent};
use crate::lifecycle::Disposable;
use crate::Error;

/// Work items for the synchronization worker.
pub(crate) enum SyncCommand {
	Open(Document),
	Changed(Document),
	Closed(Document),
	Saved(Document),
	WillSave(WillSaveEvent),
	/// Drain the dirty set; ack when done (absent for debounce ticks).
	Flush(Option<oneshot::Sender<()>>),
	Stop,
}

/// Handle returned by [`LanguageClient::synchronize`].
///
/// Dropping it detaches the tracker and closes the documents only that
/// tracker still referenced.
pub struct SyncHandle {
	_detach: Disposable,
}

impl LanguageClient {
	/// Attaches a document tracker to the authoritative document set.
	///
	/// Every document the tracker currently holds is opened; subsequent
	/// tracker events keep the shared set reconciled. The returned handle
	/// detaches on drop.
	pub fn synchronize(&self, tracker: Arc<dyn DocumentTracker>) -> SyncHandle {
		let inner = self.inner();
		let id = inner.next_tracker_id.fetch_add(1, Ordering::Relaxed);
		inner.trackers.lock().push((id, Arc::clone(&tracker)));

		for document in tracker.all() {
			let _ = inner.sync_tx.send(SyncCommand::Open(document));
		}

		let subscriptions = [
			{
				let tx = inner.sync_tx.clone();
				tracker.on_did_open(Arc::new(move |document: &Document| {
					let _ = tx.send(SyncCommand::Open(document.clone()));
				}))
			},
			{
				let tx = inner.sync_tx.clone();
				let debouncer = inner.debouncer.lock().clone();
				tracker.on_did_change_content(Arc::new(move |document: &Document| {
					let _ = tx.send(SyncCommand::Changed(document.clone()));
					if let Some(debouncer) = debouncer.as_ref() {
						debouncer.trigger();
					}
				}))
			},
			{
				let tx = inner.sync_tx.clone();
				tracker.on_did_close(Arc::new(move |document: &Document| {
					let _ = tx.send(SyncCommand::Closed(document.clone()));
				}))
			},
			{
				let tx = inner.sync_tx.clone();
				tracker.on_did_save(Arc::new(move |document: &Document| {
					let _ = tx.send(SyncCommand::Saved(document.clone()));
				}))
			},
			{
				let tx = inner.sync_tx.clone();
				tracker.on_will_save(Arc::new(move |event: &WillSaveEvent| {
					let _ = tx.send(SyncCommand::WillSave(event.clone()));
				}))
			},
		];

		let inner_for_detach = Arc::clone(inner);
		let detach = Disposable::new(move || {
			drop(subscriptions);
			let open_here = tracker.all();
			inner_for_detach.trackers.lock().retain(|(tid, _)| *tid != id);
			// Close what only this tracker kept open.
			for document in open_here {
				let _ = inner_for_detach.sync_tx.send(SyncCommand::Closed(document));
			}
		});

		SyncHandle { _detach: detach }
	}
}

pub(crate) fn spawn_worker(inner: Arc<ClientInner>, mut rx: mpsc::UnboundedReceiver<SyncCommand>) {
	tokio::spawn(async move {
		let mut dirty: Vec<String> = Vec::new();
		while let Some(command) = rx.recv().await {
			if *inner.state.borrow() == ClientState::Disposed {
				break;
			}
			match command {
				SyncCommand::Open(document) => open_document(&inner, document).await,
				SyncCommand::Changed(document) => {
					let key = document.uri.as_str().to_string();
					if !dirty.contains(&key) {
						dirty.push(key);
					}
				}
				SyncCommand::Closed(document) => close_document(&inner, document, &mut dirty).await,
				SyncCommand::Saved(document) => {
					flush_dirty(&inner, &mut dirty).await;
					send_did_save(&inner, document).await;
				}
				SyncCommand::WillSave(event) => send_will_save(&inner, event).await,
				SyncCommand::Flush(ack) => {
					flush_dirty(&inner, &mut dirty).await;
					if let Some(ack) = ack {
						let _ = ack.send(());
					}
				}
				SyncCommand::Stop => break,
			}
		}
	});
}

/// Adds a document to the authoritative set and tells the server if it wants
/// open/close notifications for it.
async fn open_document(inner: &Arc<ClientInner>, document: Document) {
	let key = document.uri.as_str().to_string();
	if inner.documents.read().contains_key(&key) {
		return;
	}

	// Internal copy with its own version sequence, starting at 1.
	let copy = Document {
		uri: document.uri.clone(),
		language_id: document.language_id.clone(),
		version: 1,
		text: document.text.clone(),
	};
	inner.documents.write().insert(key, copy.clone());

	if wants_open_close(inner, &copy) {
		let params = DidOpenTextDocumentParams {
			text_document: TextDocumentItem {
				uri: copy.uri.clone(),
				language_id: copy.language_id.clone(),
				version: copy.version,
				text: copy.text_string(),
			},
		};
		send_notification(inner, DidOpenTextDocument::METHOD, &params).await;
	}

	inner.cache.clear();
	inner.events.on_document_open.emit(&copy);
	trace!(uri = copy.uri.as_str(), "document opened");
}

/// Removes a document once no attached tracker references it.
async fn close_document(inner: &Arc<ClientInner>, document: Document, dirty: &mut Vec<String>) {
	let key = document.uri.as_str().to_string();

	let still_referenced = {
		let trackers = inner.trackers.lock();
		trackers.iter().any(|(_, tracker)| tracker.get(&document.uri).is_some())
	};
	if still_referenced {
		return;
	}

	let Some(copy) = inner.documents.write().remove(&key) else {
		return;
	};
	dirty.retain(|entry| entry != &key);
	inner.diagnostics.write().remove(&key);

	if wants_open_close(inner, &copy) {
		let params = DidCloseTextDocumentParams {
			text_document: TextDocumentIdentifier { uri: copy.uri.clone() },
		};
		send_notification(inner, DidCloseTextDocument::METHOD, &params).await;
	}

	inner.cache.clear();
	inner.events.on_document_closed.emit(&copy);
	trace!(uri = copy.uri.as_str(), "document closed");
}

/// Flushes every dirty document whose tracker text diverged from the
/// authoritative copy.
async fn flush_dirty(inner: &Arc<ClientInner>, dirty: &mut Vec<String>) {
	for key in std::mem::take(dirty) {
		flush_one(inner, &key).await;
	}
}

async fn flush_one(inner: &Arc<ClientInner>, key: &str) {
	let Some(copy) = inner.documents.read().get(key).cloned() else {
		return;
	};

	// Latest client-side text wins; any tracker still holding the document
	// serves as the source.
	let latest = {
		let trackers = inner.trackers.lock();
		trackers.iter().find_map(|(_, tracker)| tracker.get(&copy.uri))
	};
	let Some(latest) = latest else {
		return;
	};

	let new_text = latest.text_string();
	let old_text = copy.text_string();
	if new_text == old_text {
		return;
	}

	let sync_kind = inner
		.registry
		.read()
		.as_ref()
		.map(|registry| registry.change_sync_kind(&copy.uri, &copy.language_id))
		.unwrap_or(TextDocumentSyncKind::NONE);

	let content_changes = if sync_kind == TextDocumentSyncKind::INCREMENTAL {
		match diff::compute_changes(&old_text, &new_text, inner.options.diff_budget, inner.options.position_encoding) {
			Ok(changes) if changes.is_empty() => return,
			Ok(changes) => Some(changes),
			Err(Error::Timeout(_)) => {
				debug!(uri = copy.uri.as_str(), "diff budget exceeded, sending full replacement");
				Some(vec![diff::full_replacement(new_text.clone())])
			}
			Err(err) => {
				warn!(uri = copy.uri.as_str(), error = %err, "diff failed, sending full replacement");
				Some(vec![diff::full_replacement(new_text.clone())])
			}
		}
	} else if sync_kind == TextDocumentSyncKind::FULL {
		Some(vec![diff::full_replacement(new_text.clone())])
	} else {
		None
	};

	let new_version = copy.version + 1;
	let updated = {
		let mut documents = inner.documents.write();
		let Some(stored) = documents.get_mut(key) else {
			return;
		};
		stored.text = ropey::Rope::from_str(&new_text);
		stored.version = new_version;
		stored.clone()
	};

	if let Some(content_changes) = content_changes {
		let params = DidChangeTextDocumentParams {
			text_document: VersionedTextDocumentIdentifier {
				uri: updated.uri.clone(),
				version: new_version,
			},
			content_changes,
		};
		send_notification(inner, DidChangeTextDocument::METHOD, &params).await;
	}

	inner.cache.clear();
	inner.events.on_document_changed.emit(&updated);
	trace!(uri = updated.uri.as_str(), version = new_version, "document flushed");
}

async fn send_did_save(inner: &Arc<ClientInner>, document: Document) {
	if inner.options.disable_save_notifications {
		return;
	}
	let include_text = {
		let registry = inner.registry.read();
		registry.as_ref().and_then(|r| r.save_include_text(&document.uri, &document.language_id))
	};
	let Some(include_text) = include_text else {
		return;
	};

	let text = include_text.then(|| {
		inner
			.documents
			.read()
			.get(document.uri.as_str())
			.map(|copy| copy.text_string())
			.unwrap_or_else(|| document.text_string())
	});
	let params = DidSaveTextDocumentParams {
		text_document: TextDocumentIdentifier { uri: document.uri.clone() },
		text,
	};
	send_notification(inner, DidSaveTextDocument::METHOD, &params).await;
}

async fn send_will_save(inner: &Arc<ClientInner>, event: WillSaveEvent) {
	if inner.options.disable_save_notifications {
		return;
	}
	let applies = {
		let registry = inner.registry.read();
		registry.as_ref().is_some_and(|r| r.will_save_applies(&event.document.uri, &event.document.language_id))
	};
	if !applies {
		return;
	}

	let params = WillSaveTextDocumentParams {
		text_document: TextDocumentIdentifier {
			uri: event.document.uri.clone(),
		},
		reason: event.reason,
	};
	send_notification(inner, WillSaveTextDocument::METHOD, &params).await;
}

fn wants_open_close(inner: &Arc<ClientInner>, document: &Document) -> bool {
	let registry = inner.registry.read();
	registry.as_ref().is_some_and(|r| r.open_close_applies(&document.uri, &document.language_id))
}

async fn send_notification<T: serde::Serialize>(inner: &Arc<ClientInner>, method: &str, params: &T) {
	let payload = match to_json(params) {
		Ok(payload) => payload,
		Err(err) => {
			warn!(method, error = %err, "failed to serialize notification");
			return;
		}
	};
	if let Err(err) = inner.connection.send_notification(method, payload).await {
		warn!(method, error = %err, "notification send failed");
	}
}

/// Replays `didOpen` for stored documents matched by a late dynamic
/// `textDocument/didOpen` registration.
pub(crate) async fn replay_did_open(inner: &Arc<ClientInner>, registrations: &[lsp_types::Registration]) {
	use crate::registry::selector::selector_matches;

	let open_registrations: Vec<&lsp_types::Registration> = registrations.iter().filter(|r| r.method == DidOpenTextDocument::METHOD).collect();
	if open_registrations.is_empty() {
		return;
	}

	let documents: Vec<Document> = inner.documents.read().values().cloned().collect();
	for document in documents {
		let matched = open_registrations.iter().any(|registration| {
			let selector = registration
				.register_options
				.as_ref()
				.and_then(|options| options.get("documentSelector").cloned())
				.unwrap_or(serde_json::Value::Null);
			selector_matches(&selector, &document.uri, &document.language_id)
		});
		if !matched {
			continue;
		}

		let params = DidOpenTextDocumentParams {
			text_document: TextDocumentItem {
				uri: document.uri.clone(),
				language_id: document.language_id.clone(),
				version: document.version,
				text: document.text_string(),
			},
		};
		send_notification(inner, DidOpenTextDocument::METHOD, &params).await;
	}
}
