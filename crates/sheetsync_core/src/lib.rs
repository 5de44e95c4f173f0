#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Cell mutations and the update applier
pub mod apply;

/// Bearer token providers for the remote store
pub mod auth;

/// Engine configuration (retry policy, timeouts)
pub mod config;

/// Document model (sheets, cells, container codec)
pub mod document;

/// Update engine (fetch, apply, conditional commit, retry)
pub mod engine;

/// Error (update error taxonomy)
pub mod error;

/// Per-document locks
pub mod lock;

/// Remote file stores
pub mod store;

pub use apply::{ApplyError, Mutation, apply};
pub use config::{EngineConfig, RetryPolicy};
pub use document::{Cell, CellCoord, Document, DocumentId, Revision, Sheet};
pub use engine::{UpdateEngine, UpdateOutcome, UpdateRequest, UpdateResult};
pub use error::{ErrorKind, SerializableError, UpdateError};
pub use lock::{DocumentLocks, LockToken};
pub use store::{DocumentInfo, FetchedDocument, MemoryStore, RemoteStore, StoreError};
