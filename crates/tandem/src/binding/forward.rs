//! Per-client forwarding rules.
//!
//! Installed on every binding: client requests in the forwarded set go
//! upstream (through the flush-then-cache pipeline), server fan-outs come
//! back gated on what this client opened and advertised.

use std::sync::Arc;

use lsp_types::notification::{DidChangeConfiguration, Notification, PublishDiagnostics};
use lsp_types::request::{ApplyWorkspaceEdit, CodeLensRefresh, InlayHintRefreshRequest, InlineValueRefreshRequest, Request, SemanticTokensRefresh, ShowDocument, WillSaveWaitUntil, WorkspaceDiagnosticRefresh};
use lsp_types::{ApplyWorkspaceEditParams, ApplyWorkspaceEditResponse, PublishDiagnosticsParams, ShowDocumentResult, WillSaveTextDocumentParams};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{ClientCaps, FORWARDED_REQUESTS, filter_workspace_edit};
use crate::client::{LanguageClient, to_json};
use crate::connection::SharedConnection;
use crate::dispatch::MultiHandler;
use crate::document::DocumentTracker;
use crate::error::{ErrorCode, ResponseError};
use crate::lifecycle::DisposableCollection;
use crate::Error;
use crate::tracker::MirroredDocuments;

pub(crate) fn install(connection: &SharedConnection, client: &LanguageClient, mirror: &Arc<MirroredDocuments>, caps: &ClientCaps, scope: &DisposableCollection) {
	// Ordered pump for server→client notifications, so diagnostics arrive in
	// the order the server published them.
	let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(&'static str, JsonValue)>();
	{
		let conn = Arc::clone(connection);
		tokio::spawn(async move {
			while let Some((method, params)) = out_rx.recv().await {
				if let Err(err) = conn.send_notification(method, params).await {
					debug!(method, error = %err, "client notification failed, stopping pump");
					break;
				}
			}
		});
	}

	// Client → server: the forwarded request set.
	for &method in FORWARDED_REQUESTS {
		let upstream = client.clone();
		scope.push(connection.on_request(
			method,
			Arc::new(move |params, token| {
				let upstream = upstream.clone();
				Box::pin(async move { upstream.request(method, params, token).await.map_err(to_response_error) })
			}),
		));
	}

	// willSaveWaitUntil is a request, so it cannot ride the tracker path.
	{
		let upstream = client.clone();
		let mirror = Arc::clone(mirror);
		scope.push(connection.on_request(
			WillSaveWaitUntil::METHOD,
			Arc::new(move |params, token| {
				let upstream = upstream.clone();
				let mirror = Arc::clone(&mirror);
				Box::pin(async move {
					if upstream.options().disable_save_notifications {
						return Ok(JsonValue::Null);
					}
					let parsed: WillSaveTextDocumentParams =
						serde_json::from_value(params.clone()).map_err(|err| ResponseError::new(ErrorCode::INVALID_PARAMS, err.to_string()))?;
					let applies = mirror.get(&parsed.text_document.uri).is_some_and(|document| {
						upstream
							.registry()
							.is_some_and(|registry| registry.will_save_wait_until_applies(&document.uri, &document.language_id))
					});
					if !applies {
						return Ok(JsonValue::Null);
					}
					upstream.request(WillSaveWaitUntil::METHOD, params, token).await.map_err(to_response_error)
				})
			}),
		));
	}

	// Client configuration pushes cannot be reconciled across N clients.
	scope.push(connection.on_notification(
		DidChangeConfiguration::METHOD,
		Arc::new(move |_params| {
			debug!("swallowing client didChangeConfiguration");
		}),
	));

	// Requests outside the forwarded set: delegate, vendor-forward, or
	// refuse.
	{
		let upstream = client.clone();
		let delegate = client.options().unknown_client_request_handler.clone();
		let vendor_prefix = client.options().vendor_request_prefix.clone();
		scope.push(connection.on_unhandled_request(Arc::new(move |method, params, token| {
			let upstream = upstream.clone();
			let delegate = delegate.clone();
			let vendor_prefix = vendor_prefix.clone();
			Box::pin(async move {
				if let Some(delegate) = delegate {
					return delegate(method, params, token).await;
				}
				if let Some(prefix) = vendor_prefix
					&& method.starts_with(prefix.as_str())
				{
					return upstream.request(&method, params, token).await.map_err(to_response_error);
				}
				Err(ResponseError::method_not_found(&method))
			})
		})));
	}

	scope.push(connection.on_unhandled_notification(Arc::new(move |method, _params| {
		trace!(method = method.as_str(), "dropping unhandled client notification");
	})));

	// Server → client: diagnostics, gated on this client's open set.
	{
		let mirror = Arc::clone(mirror);
		let out = out_tx.clone();
		scope.push(client.on_diagnostics().subscribe(move |params: &PublishDiagnosticsParams| {
			if mirror.get(&params.uri).is_none() {
				return;
			}
			match to_json(params) {
				Ok(payload) => {
					let _ = out.send((PublishDiagnostics::METHOD, payload));
				}
				Err(err) => warn!(error = %err, "failed to serialize diagnostics"),
			}
		}));
	}

	// Late joiners get the current squiggles the moment they open the file.
	{
		let upstream = client.clone();
		let out = out_tx.clone();
		scope.push(DocumentTracker::on_did_open(
			mirror.as_ref(),
			Arc::new(move |document| {
				let Some(diagnostics) = upstream.diagnostics_for(&document.uri) else {
					return;
				};
				let params = PublishDiagnosticsParams {
					uri: document.uri.clone(),
					diagnostics,
					version: None,
				};
				match to_json(&params) {
					Ok(payload) => {
						let _ = out.send((PublishDiagnostics::METHOD, payload));
					}
					Err(err) => warn!(error = %err, "failed to serialize cached diagnostics"),
				}
			}),
		));
	}

	// Server → client: refresh requests, gated on advertised support.
	refresh_forward(connection, client.code_lens_refresh(), CodeLensRefresh::METHOD, caps.code_lens_refresh, scope);
	refresh_forward(connection, client.semantic_tokens_refresh(), SemanticTokensRefresh::METHOD, caps.semantic_tokens_refresh, scope);
	refresh_forward(connection, client.diagnostics_refresh(), WorkspaceDiagnosticRefresh::METHOD, caps.diagnostics_refresh, scope);
	refresh_forward(connection, client.inlay_hint_refresh(), InlayHintRefreshRequest::METHOD, caps.inlay_hint_refresh, scope);
	refresh_forward(connection, client.inline_value_refresh(), InlineValueRefreshRequest::METHOD, caps.inline_value_refresh, scope);

	// Server → client: applyEdit, filtered to this client's documents with
	// versions rewritten to the client's own.
	{
		let conn = Arc::clone(connection);
		let mirror = Arc::clone(mirror);
		scope.push(client.apply_edit().on_request(move |params: ApplyWorkspaceEditParams, token| {
			let conn = Arc::clone(&conn);
			let mirror = Arc::clone(&mirror);
			Box::pin(async move {
				let (edit, owns) = filter_workspace_edit(&params.edit, mirror.as_ref() as &dyn DocumentTracker);
				let forwarded = ApplyWorkspaceEditParams { label: params.label.clone(), edit };
				let raw = conn.send_request(ApplyWorkspaceEdit::METHOD, to_json(&forwarded)?, token).await?;
				let response: ApplyWorkspaceEditResponse = serde_json::from_value(raw).map_err(|err| Error::Protocol(format!("applyEdit response: {err}")))?;
				// Only the binding whose documents the edit touched claims
				// ownership; the single-owner merge picks it out.
				Ok(owns.then_some(response))
			})
		}));
	}

	// Server → client: showDocument, forwarded as-is.
	{
		let conn = Arc::clone(connection);
		scope.push(client.show_document().on_request(move |params: lsp_types::ShowDocumentParams, token| {
			let conn = Arc::clone(&conn);
			Box::pin(async move {
				let raw = conn.send_request(ShowDocument::METHOD, to_json(&params)?, token).await?;
				let response: ShowDocumentResult = serde_json::from_value(raw).map_err(|err| Error::Protocol(format!("showDocument response: {err}")))?;
				Ok(Some(response))
			})
		}));
	}
}

fn refresh_forward(connection: &SharedConnection, endpoint: &MultiHandler<(), ()>, method: &'static str, supported: bool, scope: &DisposableCollection) {
	let conn = Arc::clone(connection);
	scope.push(endpoint.on_request(move |(), token| {
		let conn = Arc::clone(&conn);
		Box::pin(async move {
			if !supported {
				return Ok(());
			}
			conn.send_request(method, JsonValue::Null, token).await.map(|_| ())
		})
	}));
}

fn to_response_error(err: Error) -> ResponseError {
	match err {
		// Server errors reach clients verbatim.
		Error::Response(response) => response,
		Error::MethodNotFound(method) => ResponseError::method_not_found(&method),
		other => ResponseError::new(ErrorCode::INTERNAL_ERROR, other.to_string()),
	}
}
