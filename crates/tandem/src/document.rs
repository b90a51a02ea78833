//! Document model and the per-client tracker seam.

use lsp_types::{TextDocumentSaveReason, Uri};
use ropey::Rope;

use crate::event::Subscriber;
use crate::lifecycle::Disposable;

/// A text document snapshot.
///
/// The broker-side copy held by a [`crate::LanguageClient`] carries the
/// authoritative server-visible version; tracker copies carry the attached
/// client's own version.
#[derive(Debug, Clone)]
pub struct Document {
	/// Document identity.
	pub uri: Uri,
	/// Language tag, e.g. `"rust"`.
	pub language_id: String,
	/// Version, starting at 1 and strictly increasing.
	pub version: i32,
	/// Document content.
	pub text: Rope,
}

impl Document {
	/// Creates a version-1 document.
	pub fn new(uri: Uri, language_id: impl Into<String>, text: impl AsRef<str>) -> Self {
		Self {
			uri,
			language_id: language_id.into(),
			version: 1,
			text: Rope::from_str(text.as_ref()),
		}
	}

	/// The content as an owned string.
	pub fn text_string(&self) -> String {
		self.text.to_string()
	}
}

/// A `willSave` observation from a client.
#[derive(Debug, Clone)]
pub struct WillSaveEvent {
	/// The document about to be saved.
	pub document: Document,
	/// Why the save is happening.
	pub reason: TextDocumentSaveReason,
}

/// One attached client's view of its open documents.
///
/// Implementations mirror the client's `textDocument/*` sync traffic; the
/// broker consumes the mirror through this trait when reconciling its
/// authoritative document set. Event subscribers are invoked after the
/// mirror reflects the event.
pub trait DocumentTracker: Send + Sync {
	/// Every document currently open in this client.
	fn all(&self) -> Vec<Document>;

	/// The client's copy of `uri`, if open.
	fn get(&self, uri: &Uri) -> Option<Document>;

	/// The client opened a document.
	fn on_did_open(&self, subscriber: Subscriber<Document>) -> Disposable;

	/// The client closed a document.
	fn on_did_close(&self, subscriber: Subscriber<Document>) -> Disposable;

	/// The client changed a document's content.
	fn on_did_change_content(&self, subscriber: Subscriber<Document>) -> Disposable;

	/// The client saved a document.
	fn on_did_save(&self, subscriber: Subscriber<Document>) -> Disposable;

	/// The client is about to save a document.
	fn on_will_save(&self, subscriber: Subscriber<WillSaveEvent>) -> Disposable;
}
