//! Error types for the update engine.

use serde::Serialize;
use thiserror::Error;

use crate::apply::ApplyError;
use crate::auth::AuthError;
use crate::document::{DecodeError, DocumentId, EncodeError, Revision};
use crate::store::StoreError;

/// Failure of one [`crate::engine::UpdateEngine::update`] call.
///
/// Every variant names the document. Variants raised inside an attempt also
/// carry its 1-based attempt number.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The store rejected or could not obtain credentials
    #[error("authentication failed for '{document_id}': {source}")]
    Auth {
        document_id: DocumentId,
        attempt: u32,
        #[source]
        source: AuthError,
    },

    /// The document does not exist in the store
    #[error("document '{document_id}' not found")]
    NotFound { document_id: DocumentId, attempt: u32 },

    /// The fetched bytes are not a readable spreadsheet
    #[error("failed to decode '{document_id}': {source}")]
    Decode {
        document_id: DocumentId,
        attempt: u32,
        #[source]
        source: DecodeError,
    },

    /// The updated document could not be serialized
    #[error("failed to encode '{document_id}': {source}")]
    Encode {
        document_id: DocumentId,
        attempt: u32,
        #[source]
        source: EncodeError,
    },

    /// The mutation batch does not fit the document
    #[error("cannot apply update to '{document_id}': {source}")]
    Apply {
        document_id: DocumentId,
        attempt: u32,
        #[source]
        source: ApplyError,
    },

    /// The document is not at the revision the caller pinned
    #[error("document '{document_id}' is no longer at revision '{expected}'")]
    RevisionConflict {
        document_id: DocumentId,
        attempt: u32,
        expected: Revision,
        actual: Option<Revision>,
    },

    /// Every attempt lost its commit to a concurrent writer
    #[error("gave up on '{document_id}' after {attempts} conflicting attempts")]
    RetryExhausted { document_id: DocumentId, attempts: u32 },

    /// Transport, timeout, or service failure talking to the store
    #[error("remote store failed for '{document_id}': {cause}")]
    RemoteStore {
        document_id: DocumentId,
        attempt: u32,
        cause: StoreError,
    },
}

/// Fieldless discriminant of [`UpdateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Decode,
    Encode,
    Apply,
    RevisionConflict,
    RetryExhausted,
    RemoteStore,
}

impl ErrorKind {
    /// Variant name as a static string.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "Auth",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Decode => "Decode",
            ErrorKind::Encode => "Encode",
            ErrorKind::Apply => "Apply",
            ErrorKind::RevisionConflict => "RevisionConflict",
            ErrorKind::RetryExhausted => "RetryExhausted",
            ErrorKind::RemoteStore => "RemoteStore",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UpdateError {
    /// Map a store failure raised during `attempt`.
    ///
    /// Conflicts are not mapped here; the engine decides between retrying and
    /// [`UpdateError::RevisionConflict`].
    pub(crate) fn from_store(document_id: &DocumentId, attempt: u32, err: StoreError) -> Self {
        let document_id = document_id.clone();
        match err {
            StoreError::NotFound(_) => UpdateError::NotFound { document_id, attempt },
            StoreError::Auth(source) => UpdateError::Auth {
                document_id,
                attempt,
                source,
            },
            cause => UpdateError::RemoteStore {
                document_id,
                attempt,
                cause,
            },
        }
    }

    /// Fieldless discriminant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::Auth { .. } => ErrorKind::Auth,
            UpdateError::NotFound { .. } => ErrorKind::NotFound,
            UpdateError::Decode { .. } => ErrorKind::Decode,
            UpdateError::Encode { .. } => ErrorKind::Encode,
            UpdateError::Apply { .. } => ErrorKind::Apply,
            UpdateError::RevisionConflict { .. } => ErrorKind::RevisionConflict,
            UpdateError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            UpdateError::RemoteStore { .. } => ErrorKind::RemoteStore,
        }
    }

    /// The document the update targeted.
    pub fn document_id(&self) -> &DocumentId {
        match self {
            UpdateError::Auth { document_id, .. }
            | UpdateError::NotFound { document_id, .. }
            | UpdateError::Decode { document_id, .. }
            | UpdateError::Encode { document_id, .. }
            | UpdateError::Apply { document_id, .. }
            | UpdateError::RevisionConflict { document_id, .. }
            | UpdateError::RetryExhausted { document_id, .. }
            | UpdateError::RemoteStore { document_id, .. } => document_id,
        }
    }

    /// Attempt the error was raised in. `RetryExhausted` reports the last one.
    pub fn attempt(&self) -> u32 {
        match self {
            UpdateError::Auth { attempt, .. }
            | UpdateError::NotFound { attempt, .. }
            | UpdateError::Decode { attempt, .. }
            | UpdateError::Encode { attempt, .. }
            | UpdateError::Apply { attempt, .. }
            | UpdateError::RevisionConflict { attempt, .. }
            | UpdateError::RemoteStore { attempt, .. } => *attempt,
            UpdateError::RetryExhausted { attempts, .. } => *attempts,
        }
    }

    /// Convert to the wire representation.
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

/// Serializable form of [`UpdateError`] for HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Document the update targeted
    pub document_id: DocumentId,
}

impl From<&UpdateError> for SerializableError {
    fn from(err: &UpdateError) -> Self {
        SerializableError {
            kind: err.kind(),
            message: err.to_string(),
            document_id: err.document_id().clone(),
        }
    }
}

impl From<UpdateError> for SerializableError {
    fn from(err: UpdateError) -> Self {
        SerializableError::from(&err)
    }
}
