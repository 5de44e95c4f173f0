//! Remote file stores holding spreadsheet bytes.
//!
//! A [`RemoteStore`] downloads a document together with its revision tag and
//! commits new bytes only if the document is still at the revision the caller
//! read (optimistic concurrency).
//!
//! # Implementations
//!
//! - `GoogleDriveStore` - Google Drive v3 (feature `google-drive`)
//! - [`MemoryStore`] - in-process store for tests and local development

#[cfg(feature = "google-drive")]
mod google_drive;
mod memory;

#[cfg(feature = "google-drive")]
pub use google_drive::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE, GoogleDriveStore, XLSX_MIME_TYPE};
pub use memory::MemoryStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::document::{DocumentId, Revision};

/// Boxed future returned by store and token provider methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Document bytes and the revision they belong to.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Raw container bytes
    pub bytes: Vec<u8>,
    /// Revision the bytes were read at
    pub revision: Revision,
}

/// Metadata describing a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    /// Store identifier
    pub id: DocumentId,
    /// Display name
    pub name: String,
    /// MIME type, when the store reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Current head revision, when the store reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}

/// Failure reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document '{0}' not found")]
    NotFound(DocumentId),

    #[error("revision conflict: document is no longer at '{expected}'")]
    Conflict {
        expected: Revision,
        actual: Option<Revision>,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("store returned {status}: {message}")]
    Service { status: u16, message: String },
}

/// A remote store supporting conditional writes.
pub trait RemoteStore: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Download the current bytes and revision of a document.
    fn fetch<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<FetchedDocument, StoreError>>;

    /// Replace the document's bytes if it is still at `expected`.
    ///
    /// Returns the new revision, or [`StoreError::Conflict`] if another
    /// writer committed first.
    fn commit_if_revision<'a>(
        &'a self,
        id: &'a DocumentId,
        bytes: Vec<u8>,
        expected: &'a Revision,
    ) -> BoxFuture<'a, Result<Revision, StoreError>>;

    /// Look up a document's metadata without downloading it.
    fn describe<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<DocumentInfo, StoreError>>;

    /// List up to `page_size` documents visible to the store credentials.
    fn list(&self, page_size: usize) -> BoxFuture<'_, Result<Vec<DocumentInfo>, StoreError>>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<FetchedDocument, StoreError>> {
        (**self).fetch(id)
    }

    fn commit_if_revision<'a>(
        &'a self,
        id: &'a DocumentId,
        bytes: Vec<u8>,
        expected: &'a Revision,
    ) -> BoxFuture<'a, Result<Revision, StoreError>> {
        (**self).commit_if_revision(id, bytes, expected)
    }

    fn describe<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<DocumentInfo, StoreError>> {
        (**self).describe(id)
    }

    fn list(&self, page_size: usize) -> BoxFuture<'_, Result<Vec<DocumentInfo>, StoreError>> {
        (**self).list(page_size)
    }
}
