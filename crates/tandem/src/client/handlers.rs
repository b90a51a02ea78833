//! Inbound handlers installed on the server connection.
//!
//! One registration per server-initiated method the broker understands;
//! everything else lands in the fallbacks (MethodNotFound for requests, the
//! configured hook or a trace drop for notifications).

use std::sync::Arc;

use lsp_types::notification::{LogMessage, Notification, PublishDiagnostics, ShowMessage};
use lsp_types::request::{
	ApplyWorkspaceEdit, CodeLensRefresh, ExecuteCommand, InlayHintRefreshRequest, InlineValueRefreshRequest, RegisterCapability, Request, SemanticTokensRefresh,
	ShowDocument, ShowMessageRequest, UnregisterCapability, WorkDoneProgressCreate, WorkspaceConfiguration, WorkspaceDiagnosticRefresh, WorkspaceFoldersRequest,
};
use lsp_types::{
	ApplyWorkspaceEditParams, ApplyWorkspaceEditResponse, LogMessageParams, MessageType, PublishDiagnosticsParams, RegistrationParams, ShowDocumentParams,
	ShowDocumentResult, ShowMessageParams, UnregistrationParams,
};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, trace, warn};

use super::{LanguageClient, sync, to_json};
use crate::dispatch::MultiHandler;
use crate::error::{ErrorCode, ResponseError};
use crate::lifecycle::DisposableCollection;

/// Installs every inbound handler on the server connection.
pub(crate) fn install(client: &LanguageClient, scope: &DisposableCollection) {
	let connection = Arc::clone(&client.inner().connection);

	// client/registerCapability
	let this = client.clone();
	scope.push(connection.on_request(
		RegisterCapability::METHOD,
		Arc::new(move |params, _token| {
			let this = this.clone();
			Box::pin(async move {
				let params: RegistrationParams = parse(RegisterCapability::METHOD, params)?;
				let Some(registry) = this.registry() else {
					return Err(not_initialized());
				};
				let added = registry.handle_registration(params.registrations);
				sync::replay_did_open(this.inner(), &added).await;
				if added.iter().any(|r| r.method == "workspace/didChangeWatchedFiles") {
					this.inner().events.on_watched_files_changed.emit(&());
				}
				Ok(JsonValue::Null)
			})
		}),
	));

	// client/unregisterCapability
	let this = client.clone();
	scope.push(connection.on_request(
		UnregisterCapability::METHOD,
		Arc::new(move |params, _token| {
			let this = this.clone();
			Box::pin(async move {
				let params: UnregistrationParams = parse(UnregisterCapability::METHOD, params)?;
				let Some(registry) = this.registry() else {
					return Err(not_initialized());
				};
				let removed = registry.handle_unregistration(params.unregisterations);
				if removed.iter().any(|r| r.method == "workspace/didChangeWatchedFiles") {
					this.inner().events.on_watched_files_changed.emit(&());
				}
				Ok(JsonValue::Null)
			})
		}),
	));

	// workspace/configuration: answered from the injected resolver, scopes
	// collapsed by design.
	let this = client.clone();
	scope.push(connection.on_request(
		WorkspaceConfiguration::METHOD,
		Arc::new(move |params, _token| {
			let this = this.clone();
			Box::pin(async move {
				let items = params.get("items").and_then(JsonValue::as_array).cloned().unwrap_or_default();
				let resolve = this.options().get_configuration.clone();
				let results: Vec<JsonValue> = items
					.iter()
					.map(|item| match (&resolve, item.get("section").and_then(JsonValue::as_str)) {
						(Some(resolve), Some(section)) => resolve(section),
						_ => JsonValue::Null,
					})
					.collect();
				Ok(JsonValue::Array(results))
			})
		}),
	));

	refresh_endpoint(client, scope, CodeLensRefresh::METHOD, |c| c.code_lens_refresh());
	refresh_endpoint(client, scope, SemanticTokensRefresh::METHOD, |c| c.semantic_tokens_refresh());
	refresh_endpoint(client, scope, WorkspaceDiagnosticRefresh::METHOD, |c| c.diagnostics_refresh());
	refresh_endpoint(client, scope, InlayHintRefreshRequest::METHOD, |c| c.inlay_hint_refresh());
	refresh_endpoint(client, scope, InlineValueRefreshRequest::METHOD, |c| c.inline_value_refresh());

	// Server-initiated executeCommand makes no sense through a broker.
	scope.push(connection.on_request(
		ExecuteCommand::METHOD,
		Arc::new(move |params, _token| {
			Box::pin(async move {
				info!(?params, "ignoring server-initiated executeCommand");
				Ok(JsonValue::Null)
			})
		}),
	));

	// workspace/applyEdit: exactly one binding owns each edit.
	let this = client.clone();
	scope.push(connection.on_request(
		ApplyWorkspaceEdit::METHOD,
		Arc::new(move |params, token| {
			let this = this.clone();
			Box::pin(async move {
				let params: ApplyWorkspaceEditParams = parse(ApplyWorkspaceEdit::METHOD, params)?;
				let fallback = ApplyWorkspaceEditResponse {
					applied: false,
					failure_reason: None,
					failed_change: None,
				};
				let response = this.apply_edit().invoke_single(params, token, Some(fallback)).await.map_err(internal)?;
				to_json(&response).map_err(internal)
			})
		}),
	));

	// window/showDocument
	let this = client.clone();
	scope.push(connection.on_request(
		ShowDocument::METHOD,
		Arc::new(move |params, token| {
			let this = this.clone();
			Box::pin(async move {
				let params: ShowDocumentParams = parse(ShowDocument::METHOD, params)?;
				let fallback = ShowDocumentResult { success: false };
				let response = this.show_document().invoke_single(params, token, Some(fallback)).await.map_err(internal)?;
				to_json(&response).map_err(internal)
			})
		}),
	));

	// window/showMessageRequest: nobody can answer for N clients.
	scope.push(connection.on_request(
		ShowMessageRequest::METHOD,
		Arc::new(move |params, _token| {
			Box::pin(async move {
				warn!(?params, "showMessageRequest not routable, answering null");
				Ok(JsonValue::Null)
			})
		}),
	));

	// window/workDoneProgress/create: accepted, progress itself flows as
	// notifications.
	scope.push(connection.on_request(
		WorkDoneProgressCreate::METHOD,
		Arc::new(move |_params, _token| Box::pin(async move { Ok(JsonValue::Null) })),
	));

	// workspace/workspaceFolders: answered from the stored initialize params.
	let this = client.clone();
	scope.push(connection.on_request(
		WorkspaceFoldersRequest::METHOD,
		Arc::new(move |_params, _token| {
			let this = this.clone();
			Box::pin(async move { Ok(this.workspace_folders()) })
		}),
	));

	// Unknown requests get a clean MethodNotFound.
	scope.push(connection.on_unhandled_request(Arc::new(move |method, _params, _token| {
		Box::pin(async move { Err(ResponseError::method_not_found(&method)) })
	})));

	// textDocument/publishDiagnostics
	let this = client.clone();
	scope.push(connection.on_notification(
		PublishDiagnostics::METHOD,
		Arc::new(move |params| {
			let Some(params) = parse_notification::<PublishDiagnosticsParams>(PublishDiagnostics::METHOD, params) else {
				return;
			};
			let key = params.uri.as_str().to_string();
			if this.inner().documents.read().contains_key(&key) {
				this.inner().diagnostics.write().insert(key, params.diagnostics.clone());
			}
			this.inner().events.on_diagnostics.emit(&params);
		}),
	));

	// window/logMessage
	scope.push(connection.on_notification(
		LogMessage::METHOD,
		Arc::new(move |params| {
			if let Some(params) = parse_notification::<LogMessageParams>(LogMessage::METHOD, params) {
				log_server_message("server log", params.typ, &params.message);
			}
		}),
	));

	// window/showMessage
	scope.push(connection.on_notification(
		ShowMessage::METHOD,
		Arc::new(move |params| {
			if let Some(params) = parse_notification::<ShowMessageParams>(ShowMessage::METHOD, params) {
				log_server_message("server message", params.typ, &params.message);
			}
		}),
	));

	// Everything else (including $/progress) goes to the hook or is dropped.
	let hook = client.options().unhandled_notification_handler.clone();
	scope.push(connection.on_unhandled_notification(Arc::new(move |method, params| match &hook {
		Some(hook) => hook(&method, &params),
		None => trace!(method = method.as_str(), "dropping unhandled notification"),
	})));
}

fn refresh_endpoint(client: &LanguageClient, scope: &DisposableCollection, method: &'static str, select: fn(&LanguageClient) -> &MultiHandler<(), ()>) {
	let this = client.clone();
	scope.push(client.inner().connection.on_request(
		method,
		Arc::new(move |_params, token| {
			let this = this.clone();
			Box::pin(async move {
				select(&this).invoke_all_void((), token).await.map_err(internal)?;
				Ok(JsonValue::Null)
			})
		}),
	));
}

fn log_server_message(context: &str, typ: MessageType, message: &str) {
	if typ == MessageType::ERROR {
		error!("{context}: {message}");
	} else if typ == MessageType::WARNING {
		warn!("{context}: {message}");
	} else if typ == MessageType::INFO {
		info!("{context}: {message}");
	} else {
		debug!("{context}: {message}");
	}
}

fn parse<T: serde::de::DeserializeOwned>(method: &str, params: JsonValue) -> Result<T, ResponseError> {
	serde_json::from_value(params).map_err(|err| ResponseError::new(ErrorCode::INVALID_PARAMS, format!("{method}: {err}")))
}

fn parse_notification<T: serde::de::DeserializeOwned>(method: &str, params: JsonValue) -> Option<T> {
	match serde_json::from_value(params) {
		Ok(parsed) => Some(parsed),
		Err(err) => {
			warn!(method, error = %err, "malformed notification params");
			None
		}
	}
}

fn not_initialized() -> ResponseError {
	ResponseError::new(ErrorCode::INTERNAL_ERROR, "server not initialized")
}

fn internal(err: impl std::fmt::Display) -> ResponseError {
	ResponseError::new(ErrorCode::INTERNAL_ERROR, err.to_string())
}
