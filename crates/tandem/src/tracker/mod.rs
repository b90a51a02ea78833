//! Client-connection-fed document mirror.
//!
//! [`MirroredDocuments`] is the [`DocumentTracker`] implementation a binding
//! installs over its client connection: it consumes the client's
//! `textDocument/*` synchronization notifications, keeps that client's open
//! set, and re-emits lifecycle events for the broker to reconcile.

use std::collections::HashMap;
use std::sync::Arc;

use lsp_types::notification::{
	DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Notification, WillSaveTextDocument,
};
use lsp_types::{DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams, TextDocumentContentChangeEvent, Uri, WillSaveTextDocumentParams};
use parking_lot::RwLock;
use ropey::Rope;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::connection::MessageConnection;
use crate::document::{Document, DocumentTracker, WillSaveEvent};
use crate::event::{Emitter, Subscriber};
use crate::lifecycle::{Disposable, DisposableCollection};
use crate::position::{OffsetEncoding, lsp_range_to_char_range};

/// Document mirror for one attached client.
pub struct MirroredDocuments {
	documents: RwLock<HashMap<String, Document>>,
	encoding: OffsetEncoding,
	on_did_open: Emitter<Document>,
	on_did_close: Emitter<Document>,
	on_did_change: Emitter<Document>,
	on_did_save: Emitter<Document>,
	on_will_save: Emitter<WillSaveEvent>,
}

impl MirroredDocuments {
	/// Creates an empty mirror.
	pub fn new(encoding: OffsetEncoding) -> Arc<Self> {
		Arc::new(Self {
			documents: RwLock::new(HashMap::new()),
			encoding,
			on_did_open: Emitter::new(),
			on_did_close: Emitter::new(),
			on_did_change: Emitter::new(),
			on_did_save: Emitter::new(),
			on_will_save: Emitter::new(),
		})
	}

	/// Installs the text-sync notification handlers on a client connection.
	///
	/// The registrations live in `scope`; disposing it detaches the mirror.
	pub fn listen(self: &Arc<Self>, connection: &dyn MessageConnection, scope: &DisposableCollection) {
		let this = Arc::clone(self);
		scope.push(connection.on_notification(
			DidOpenTextDocument::METHOD,
			Arc::new(move |params| this.handle_did_open(params)),
		));

		let this = Arc::clone(self);
		scope.push(connection.on_notification(
			DidChangeTextDocument::METHOD,
			Arc::new(move |params| this.handle_did_change(params)),
		));

		let this = Arc::clone(self);
		scope.push(connection.on_notification(
			DidCloseTextDocument::METHOD,
			Arc::new(move |params| this.handle_did_close(params)),
		));

		let this = Arc::clone(self);
		scope.push(connection.on_notification(
			DidSaveTextDocument::METHOD,
			Arc::new(move |params| this.handle_did_save(params)),
		));

		let this = Arc::clone(self);
		scope.push(connection.on_notification(
			WillSaveTextDocument::METHOD,
			Arc::new(move |params| this.handle_will_save(params)),
		));
	}

	fn handle_did_open(&self, params: JsonValue) {
		let Some(params) = parse::<DidOpenTextDocumentParams>(DidOpenTextDocument::METHOD, params) else {
			return;
		};
		let item = params.text_document;
		let document = Document {
			uri: item.uri.clone(),
			language_id: item.language_id,
			version: item.version,
			text: Rope::from_str(&item.text),
		};
		self.documents.write().insert(item.uri.as_str().to_string(), document.clone());
		self.on_did_open.emit(&document);
	}

	fn handle_did_change(&self, params: JsonValue) {
		let Some(params) = parse::<DidChangeTextDocumentParams>(DidChangeTextDocument::METHOD, params) else {
			return;
		};

		let updated = {
			let mut documents = self.documents.write();
			let Some(document) = documents.get_mut(params.text_document.uri.as_str()) else {
				warn!(uri = params.text_document.uri.as_str(), "didChange for untracked document");
				return;
			};
			for change in &params.content_changes {
				apply_change(&mut document.text, change, self.encoding);
			}
			document.version = params.text_document.version;
			document.clone()
		};

		self.on_did_change.emit(&updated);
	}

	fn handle_did_close(&self, params: JsonValue) {
		let Some(params) = parse::<DidCloseTextDocumentParams>(DidCloseTextDocument::METHOD, params) else {
			return;
		};
		let removed = self.documents.write().remove(params.text_document.uri.as_str());
		match removed {
			Some(document) => self.on_did_close.emit(&document),
			None => debug!(uri = params.text_document.uri.as_str(), "didClose for untracked document"),
		}
	}

	fn handle_did_save(&self, params: JsonValue) {
		let Some(params) = parse::<DidSaveTextDocumentParams>(DidSaveTextDocument::METHOD, params) else {
			return;
		};
		let document = self.get(&params.text_document.uri);
		match document {
			Some(document) => self.on_did_save.emit(&document),
			None => debug!(uri = params.text_document.uri.as_str(), "didSave for untracked document"),
		}
	}

	fn handle_will_save(&self, params: JsonValue) {
		let Some(params) = parse::<WillSaveTextDocumentParams>(WillSaveTextDocument::METHOD, params) else {
			return;
		};
		if let Some(document) = self.get(&params.text_document.uri) {
			self.on_will_save.emit(&WillSaveEvent {
				document,
				reason: params.reason,
			});
		}
	}
}

impl DocumentTracker for MirroredDocuments {
	fn all(&self) -> Vec<Document> {
		self.documents.read().values().cloned().collect()
	}

	fn get(&self, uri: &Uri) -> Option<Document> {
		self.documents.read().get(uri.as_str()).cloned()
	}

	fn on_did_open(&self, subscriber: Subscriber<Document>) -> Disposable {
		self.on_did_open.subscribe(move |doc| subscriber(doc))
	}

	fn on_did_close(&self, subscriber: Subscriber<Document>) -> Disposable {
		self.on_did_close.subscribe(move |doc| subscriber(doc))
	}

	fn on_did_change_content(&self, subscriber: Subscriber<Document>) -> Disposable {
		self.on_did_change.subscribe(move |doc| subscriber(doc))
	}

	fn on_did_save(&self, subscriber: Subscriber<Document>) -> Disposable {
		self.on_did_save.subscribe(move |doc| subscriber(doc))
	}

	fn on_will_save(&self, subscriber: Subscriber<WillSaveEvent>) -> Disposable {
		self.on_will_save.subscribe(move |event| subscriber(event))
	}
}

/// Applies one LSP content change to a rope.
fn apply_change(text: &mut Rope, change: &TextDocumentContentChangeEvent, encoding: OffsetEncoding) {
	match change.range {
		Some(range) => match lsp_range_to_char_range(text, range, encoding) {
			Some((start, end)) => {
				text.remove(start..end);
				text.insert(start, &change.text);
			}
			None => warn!(?range, "change range outside document, ignoring edit"),
		},
		None => *text = Rope::from_str(&change.text),
	}
}

fn parse<T: serde::de::DeserializeOwned>(method: &str, params: JsonValue) -> Option<T> {
	match serde_json::from_value(params) {
		Ok(parsed) => Some(parsed),
		Err(err) => {
			warn!(method, error = %err, "malformed notification params");
			None
		}
	}
}

#[cfg(test)]
mod tests;
