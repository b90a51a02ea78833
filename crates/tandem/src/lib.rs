//! One language server, many clients.
//!
//! Tandem is the stateful core of an LSP multiplexer: a [`LanguageClient`]
//! owns the single upstream server connection and the authoritative view of
//! documents, capabilities, and diagnostics, while each attached editor gets
//! a [`Binding`] that speaks plain LSP and sees what looks like a dedicated
//! server.
//!
//! The transports on both sides are external; they plug in through
//! [`MessageConnection`]. A typical embedding:
//!
//! ```ignore
//! let client = LanguageClient::new(server_connection, options);
//! // per attaching editor:
//! let binding = bind_language_client(editor_connection, &client).await?;
//! match binding.closed().await {
//!     EndCause::Client => { /* editor went away, server keeps running */ }
//!     EndCause::Server => { /* server died, every binding ends */ }
//! }
//! ```
#![warn(missing_docs)]

pub mod binding;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod diff;
pub mod dispatch;
pub mod document;
mod error;
pub mod event;
pub mod lifecycle;
pub mod position;
pub mod registry;
pub mod tracker;
mod uri;

#[cfg(test)]
pub(crate) mod test_support;

pub use binding::{Binding, EndCause, bind_language_client};
pub use cache::{CacheFactory, RequestCache};
pub use client::{ClientState, DisposeReason, LanguageClient, SyncHandle};
pub use config::{ConfigurationResolver, LanguageClientOptions, NotificationHook, UnknownRequestHandler};
pub use connection::{MessageConnection, SharedConnection};
pub use diff::{DEFAULT_DIFF_BUDGET, compute_changes};
pub use dispatch::MultiHandler;
pub use document::{Document, DocumentTracker, WillSaveEvent};
pub use error::{Error, ErrorCode, ResponseError, Result};
pub use event::Emitter;
pub use lifecycle::{Debouncer, Disposable, DisposableCollection};
pub use position::OffsetEncoding;
pub use registry::CapabilityRegistry;
pub use tracker::MirroredDocuments;
