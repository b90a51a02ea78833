use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use super::*;
use crate::test_support::FakeConnection;

fn uri(s: &str) -> Uri {
	Uri::from_str(s).unwrap()
}

fn open_params(uri: &str, text: &str, version: i32) -> JsonValue {
	json!({
		"textDocument": {
			"uri": uri,
			"languageId": "json",
			"version": version,
			"text": text,
		}
	})
}

fn attach() -> (Arc<FakeConnection>, Arc<MirroredDocuments>, DisposableCollection) {
	let connection = FakeConnection::new();
	let mirror = MirroredDocuments::new(OffsetEncoding::Utf16);
	let scope = DisposableCollection::new();
	mirror.listen(connection.as_ref(), &scope);
	(connection, mirror, scope)
}

#[test]
fn did_open_populates_the_mirror() {
	let (connection, mirror, _scope) = attach();
	connection.deliver_notification("textDocument/didOpen", open_params("file:///m.json", "{}", 1));

	let document = mirror.get(&uri("file:///m.json")).unwrap();
	assert_eq!(document.language_id, "json");
	assert_eq!(document.version, 1);
	assert_eq!(document.text_string(), "{}");
	assert_eq!(mirror.all().len(), 1);
}

#[test]
fn incremental_change_updates_text_and_version() {
	let (connection, mirror, _scope) = attach();
	connection.deliver_notification("textDocument/didOpen", open_params("file:///m.json", "hello world", 1));

	connection.deliver_notification(
		"textDocument/didChange",
		json!({
			"textDocument": {"uri": "file:///m.json", "version": 2},
			"contentChanges": [{
				"range": {"start": {"line": 0, "character": 6}, "end": {"line": 0, "character": 11}},
				"text": "tandem",
			}]
		}),
	);

	let document = mirror.get(&uri("file:///m.json")).unwrap();
	assert_eq!(document.text_string(), "hello tandem");
	assert_eq!(document.version, 2);
}

#[test]
fn full_change_replaces_content() {
	let (connection, mirror, _scope) = attach();
	connection.deliver_notification("textDocument/didOpen", open_params("file:///m.json", "old", 1));
	connection.deliver_notification(
		"textDocument/didChange",
		json!({
			"textDocument": {"uri": "file:///m.json", "version": 2},
			"contentChanges": [{"text": "entirely new"}]
		}),
	);

	assert_eq!(mirror.get(&uri("file:///m.json")).unwrap().text_string(), "entirely new");
}

#[test]
fn did_close_removes_and_notifies() {
	let (connection, mirror, _scope) = attach();
	let closed = Arc::new(AtomicUsize::new(0));
	let c = closed.clone();
	let _sub = mirror.on_did_close(Arc::new(move |_| {
		c.fetch_add(1, Ordering::SeqCst);
	}));

	connection.deliver_notification("textDocument/didOpen", open_params("file:///m.json", "x", 1));
	connection.deliver_notification("textDocument/didClose", json!({"textDocument": {"uri": "file:///m.json"}}));

	assert!(mirror.get(&uri("file:///m.json")).is_none());
	assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn change_for_untracked_document_is_ignored() {
	let (connection, mirror, _scope) = attach();
	connection.deliver_notification(
		"textDocument/didChange",
		json!({
			"textDocument": {"uri": "file:///ghost.json", "version": 2},
			"contentChanges": [{"text": "boo"}]
		}),
	);
	assert!(mirror.all().is_empty());
}

#[test]
fn will_save_carries_reason() {
	let (connection, mirror, _scope) = attach();
	let seen = Arc::new(AtomicUsize::new(0));
	let s = seen.clone();
	let _sub = mirror.on_will_save(Arc::new(move |event: &WillSaveEvent| {
		assert_eq!(event.reason, lsp_types::TextDocumentSaveReason::MANUAL);
		s.fetch_add(1, Ordering::SeqCst);
	}));

	connection.deliver_notification("textDocument/didOpen", open_params("file:///m.json", "x", 1));
	connection.deliver_notification("textDocument/willSave", json!({"textDocument": {"uri": "file:///m.json"}, "reason": 1}));
	assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn detached_mirror_stops_listening() {
	let (connection, mirror, scope) = attach();
	scope.dispose();
	connection.deliver_notification("textDocument/didOpen", open_params("file:///m.json", "x", 1));
	assert!(mirror.all().is_empty());
}
