//! Server capability registry.
//!
//! Tracks the static capabilities returned by `initialize` plus the stream of
//! dynamic `client/registerCapability` / `client/unregisterCapability`
//! traffic, and answers the broker's capability questions: does a given
//! text-document notification apply to a document, is a path watched, and
//! what capability set should a freshly attached client be shown.

use lsp_types::notification::{DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Notification, WillSaveTextDocument};
use lsp_types::request::{Request, WillSaveWaitUntil};
use lsp_types::{
	FileChangeType, Registration, SaveOptions, ServerCapabilities, TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
	TextDocumentSyncSaveOptions, Unregistration, Uri,
};
use parking_lot::RwLock;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use crate::event::Emitter;

pub mod selector;

use selector::{glob_pattern_matches, selector_matches};

/// Registry of one server's static and dynamic capabilities.
pub struct CapabilityRegistry {
	capabilities: ServerCapabilities,
	registrations: RwLock<Vec<Registration>>,
	on_registration: Emitter<Vec<Registration>>,
	on_unregistration: Emitter<Vec<Registration>>,
}

impl CapabilityRegistry {
	/// Creates a registry from the `initialize` result.
	pub fn new(capabilities: ServerCapabilities) -> Self {
		Self {
			capabilities,
			registrations: RwLock::new(Vec::new()),
			on_registration: Emitter::new(),
			on_unregistration: Emitter::new(),
		}
	}

	/// The static capability set from `initialize`.
	pub fn capabilities(&self) -> &ServerCapabilities {
		&self.capabilities
	}

	/// Snapshot of the current dynamic registrations, in arrival order.
	pub fn registrations(&self) -> Vec<Registration> {
		self.registrations.read().clone()
	}

	/// Event: dynamic registrations were added (the genuinely-new subset).
	pub fn on_registration(&self) -> &Emitter<Vec<Registration>> {
		&self.on_registration
	}

	/// Event: dynamic registrations were removed (the subset actually held).
	pub fn on_unregistration(&self) -> &Emitter<Vec<Registration>> {
		&self.on_unregistration
	}

	/// Applies a `client/registerCapability` request.
	///
	/// Registrations whose id is already present are dropped silently: some
	/// servers re-send ids, and a duplicate must behave as a no-op. Returns
	/// the added subset, which is also emitted on [`Self::on_registration`].
	pub fn handle_registration(&self, registrations: Vec<Registration>) -> Vec<Registration> {
		let added = {
			let mut held = self.registrations.write();
			let mut added = Vec::new();
			for registration in registrations {
				if held.iter().any(|r| r.id == registration.id) {
					debug!(id = registration.id.as_str(), method = registration.method.as_str(), "dropping duplicate registration id");
					continue;
				}
				held.push(registration.clone());
				added.push(registration);
			}
			added
		};

		if !added.is_empty() {
			self.on_registration.emit(&added);
		}
		added
	}

	/// Applies a `client/unregisterCapability` request.
	///
	/// Unknown ids are ignored. Returns the removed subset, which is also
	/// emitted on [`Self::on_unregistration`].
	pub fn handle_unregistration(&self, unregistrations: Vec<Unregistration>) -> Vec<Registration> {
		let removed = {
			let mut held = self.registrations.write();
			let mut removed = Vec::new();
			for unregistration in unregistrations {
				if let Some(idx) = held.iter().position(|r| r.id == unregistration.id) {
					removed.push(held.remove(idx));
				} else {
					warn!(id = unregistration.id.as_str(), "unregistration for unknown id");
				}
			}
			removed
		};

		if !removed.is_empty() {
			self.on_unregistration.emit(&removed);
		}
		removed
	}

	/// Resolves whether a text-document notification applies to a document,
	/// returning the applicable registration options.
	///
	/// Resolution order: the static registration synthesized from
	/// `textDocumentSync`, then the first dynamic registration whose
	/// selector matches.
	pub fn text_document_notification_options(&self, method: &str, uri: &Uri, language_id: &str) -> Option<JsonValue> {
		if let Some(options) = self.static_notification_options(method) {
			return Some(options);
		}

		let held = self.registrations.read();
		held.iter().filter(|r| r.method == method).find_map(|r| {
			let options = r.register_options.clone().unwrap_or(JsonValue::Null);
			let selector = options.get("documentSelector").cloned().unwrap_or(JsonValue::Null);
			selector_matches(&selector, uri, language_id).then_some(options)
		})
	}

	/// The `didChange` sync kind the server wants for a document.
	pub fn change_sync_kind(&self, uri: &Uri, language_id: &str) -> TextDocumentSyncKind {
		self.text_document_notification_options(DidChangeTextDocument::METHOD, uri, language_id)
			.and_then(|options| options.get("syncKind").cloned())
			.and_then(|kind| serde_json::from_value(kind).ok())
			.unwrap_or(TextDocumentSyncKind::NONE)
	}

	/// Whether the server wants `didOpen`/`didClose` for a document.
	pub fn open_close_applies(&self, uri: &Uri, language_id: &str) -> bool {
		self.text_document_notification_options(DidOpenTextDocument::METHOD, uri, language_id).is_some()
	}

	/// Whether the server wants `didSave` for a document, and with what
	/// `includeText` setting.
	pub fn save_include_text(&self, uri: &Uri, language_id: &str) -> Option<bool> {
		let options = self.text_document_notification_options(DidSaveTextDocument::METHOD, uri, language_id)?;
		Some(options.get("includeText").and_then(JsonValue::as_bool).unwrap_or(false))
	}

	/// Whether the server wants `willSave` for a document.
	pub fn will_save_applies(&self, uri: &Uri, language_id: &str) -> bool {
		self.text_document_notification_options(WillSaveTextDocument::METHOD, uri, language_id).is_some()
	}

	/// Whether the server answers `willSaveWaitUntil` for a document.
	pub fn will_save_wait_until_applies(&self, uri: &Uri, language_id: &str) -> bool {
		self.text_document_notification_options(WillSaveWaitUntil::METHOD, uri, language_id).is_some()
	}

	/// Tests whether a file-system path is covered by a dynamically
	/// registered `workspace/didChangeWatchedFiles` watcher for the given
	/// change kind.
	pub fn is_path_watched(&self, path: &std::path::Path, change: FileChangeType) -> bool {
		let kind_bit = if change == FileChangeType::CREATED {
			0b001
		} else if change == FileChangeType::CHANGED {
			0b010
		} else if change == FileChangeType::DELETED {
			0b100
		} else {
			return false;
		};
		let path_text = path.to_string_lossy().replace('\\', "/");

		let held = self.registrations.read();
		held.iter()
			.filter(|r| r.method == "workspace/didChangeWatchedFiles")
			.filter_map(|r| r.register_options.as_ref()?.get("watchers")?.as_array().cloned())
			.flatten()
			.any(|watcher| {
				let kind = watcher.get("kind").and_then(JsonValue::as_u64).unwrap_or(0b111);
				if kind & kind_bit == 0 {
					return false;
				}
				watcher.get("globPattern").is_some_and(|pattern| glob_pattern_matches(pattern, &path_text))
			})
	}

	/// The registrations a newly attached client should be told about.
	///
	/// Text synchronization and workspace-folder registrations are omitted;
	/// the broker owns those flows itself.
	pub fn registrations_for_client(&self) -> Vec<Registration> {
		const BROKER_OWNED: &[&str] = &[
			DidOpenTextDocument::METHOD,
			DidCloseTextDocument::METHOD,
			DidChangeTextDocument::METHOD,
			"workspace/didChangeWorkspaceFolders",
		];
		self.registrations.read().iter().filter(|r| !BROKER_OWNED.contains(&r.method.as_str())).cloned().collect()
	}

	/// The capability set presented to attached clients.
	///
	/// The broker always syncs incrementally against the server no matter
	/// what clients send it, so clients are told to open/close and send
	/// incremental changes. Workspace-folder support is withdrawn because
	/// folder requests cannot be reconciled across N clients.
	pub fn transform_for_client(&self, suppress_save: bool) -> ServerCapabilities {
		let mut capabilities = self.capabilities.clone();
		let resolved = self.static_sync_options().unwrap_or_default();

		capabilities.text_document_sync = Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
			open_close: Some(true),
			change: Some(TextDocumentSyncKind::INCREMENTAL),
			will_save: Some(false),
			will_save_wait_until: if suppress_save { None } else { resolved.will_save_wait_until },
			save: if suppress_save { None } else { resolved.save },
		}));

		if let Some(workspace) = capabilities.workspace.as_mut()
			&& let Some(folders) = workspace.workspace_folders.as_mut()
		{
			folders.supported = Some(false);
		}

		capabilities
	}

	/// The server's `textDocumentSync` normalized to the options form.
	///
	/// A bare kind enum expands to `{openClose, change, save}`; kind `None`
	/// expands to an all-off object.
	fn static_sync_options(&self) -> Option<TextDocumentSyncOptions> {
		match self.capabilities.text_document_sync.as_ref()? {
			TextDocumentSyncCapability::Options(options) => Some(options.clone()),
			TextDocumentSyncCapability::Kind(kind) if *kind == TextDocumentSyncKind::NONE => Some(TextDocumentSyncOptions {
				open_close: Some(false),
				change: Some(TextDocumentSyncKind::NONE),
				..Default::default()
			}),
			TextDocumentSyncCapability::Kind(kind) => Some(TextDocumentSyncOptions {
				open_close: Some(true),
				change: Some(*kind),
				save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions { include_text: Some(false) })),
				..Default::default()
			}),
		}
	}

	/// Options for `method` from the synthesized static registration, if the
	/// static sync configuration affirmatively enables it.
	fn static_notification_options(&self, method: &str) -> Option<JsonValue> {
		let sync = self.static_sync_options()?;
		match method {
			DidOpenTextDocument::METHOD | DidCloseTextDocument::METHOD => (sync.open_close == Some(true)).then(|| json!({})),
			DidChangeTextDocument::METHOD => match sync.change {
				Some(kind) if kind != TextDocumentSyncKind::NONE => Some(json!({"syncKind": kind})),
				_ => None,
			},
			DidSaveTextDocument::METHOD => match sync.save {
				Some(TextDocumentSyncSaveOptions::Supported(true)) => Some(json!({"includeText": false})),
				Some(TextDocumentSyncSaveOptions::SaveOptions(options)) => Some(json!({"includeText": options.include_text.unwrap_or(false)})),
				_ => None,
			},
			WillSaveTextDocument::METHOD => (sync.will_save == Some(true)).then(|| json!({})),
			WillSaveWaitUntil::METHOD => (sync.will_save_wait_until == Some(true)).then(|| json!({})),
			_ => None,
		}
	}

}
