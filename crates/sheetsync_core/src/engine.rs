//! Update engine orchestrator.
//!
//! The UpdateEngine runs fetch → decode → apply → encode → conditional commit
//! for one document while holding that document's lock. A commit that loses to
//! a concurrent writer is retried from a fresh fetch, with the lock released
//! during the backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::apply::{Mutation, apply};
use crate::config::EngineConfig;
use crate::document::{Document, DocumentId, Revision};
use crate::error::UpdateError;
use crate::lock::DocumentLocks;
use crate::store::{RemoteStore, StoreError};

/// A batch of mutations for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Target document
    pub document_id: DocumentId,
    /// Mutations, applied in order
    #[serde(default)]
    pub mutations: Vec<Mutation>,
    /// Fail instead of retrying if the document is not at this revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<Revision>,
}

impl UpdateRequest {
    /// Create an unpinned request.
    pub fn new(document_id: impl Into<DocumentId>, mutations: Vec<Mutation>) -> Self {
        Self {
            document_id: document_id.into(),
            mutations,
            expected_revision: None,
        }
    }

    /// Pin the request to `revision`.
    pub fn with_expected_revision(mut self, revision: impl Into<Revision>) -> Self {
        self.expected_revision = Some(revision.into());
        self
    }
}

/// A committed update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    /// Revision produced by the commit
    pub revision: Revision,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Result of [`UpdateEngine::update`].
pub type UpdateResult = Result<UpdateOutcome, UpdateError>;

enum Attempt {
    Committed(Revision),
    Conflict {
        expected: Revision,
        actual: Option<Revision>,
    },
}

/// Applies update batches to documents in a [`RemoteStore`].
pub struct UpdateEngine<S: RemoteStore> {
    store: S,
    locks: DocumentLocks,
    config: EngineConfig,
}

impl<S: RemoteStore> UpdateEngine<S> {
    /// Create an engine with default settings and its own lock table.
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DocumentLocks::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a lock table with other engines in this process.
    pub fn with_locks(mut self, locks: DocumentLocks) -> Self {
        self.locks = locks;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The lock table.
    pub fn locks(&self) -> &DocumentLocks {
        &self.locks
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply `request` and commit it.
    ///
    /// Commit conflicts are retried from a fresh fetch unless the request pins
    /// a revision. Dropping the returned future releases the document lock and
    /// no commit is issued afterwards.
    pub async fn update(&self, request: UpdateRequest) -> UpdateResult {
        let id = &request.document_id;
        let budget = self.config.retry.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(&request, attempt).await? {
                Attempt::Committed(revision) => {
                    log::info!(
                        "[UpdateEngine] '{}' committed at {} (attempt {}/{})",
                        id,
                        revision,
                        attempt,
                        budget
                    );
                    return Ok(UpdateOutcome {
                        revision,
                        attempts: attempt,
                    });
                }
                Attempt::Conflict { expected, actual } => {
                    if request.expected_revision.is_some() {
                        return Err(UpdateError::RevisionConflict {
                            document_id: id.clone(),
                            attempt,
                            expected,
                            actual,
                        });
                    }
                    if attempt >= budget {
                        log::warn!(
                            "[UpdateEngine] '{}' still conflicting after {} attempts",
                            id,
                            attempt
                        );
                        return Err(UpdateError::RetryExhausted {
                            document_id: id.clone(),
                            attempts: attempt,
                        });
                    }

                    let delay = self.config.retry.backoff_for(attempt);
                    log::info!(
                        "[UpdateEngine] '{}' moved past {} during attempt {}, retrying in {:?}",
                        id,
                        expected,
                        attempt,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One locked fetch → apply → commit pass. The lock is released on return.
    async fn attempt(&self, request: &UpdateRequest, attempt: u32) -> Result<Attempt, UpdateError> {
        let id = &request.document_id;
        let _token = self.locks.acquire(id).await;

        let fetched = match tokio::time::timeout(self.config.fetch_timeout, self.store.fetch(id)).await {
            Ok(result) => result.map_err(|e| UpdateError::from_store(id, attempt, e))?,
            Err(_) => return Err(timed_out(id, attempt, "fetch", self.config.fetch_timeout)),
        };
        log::debug!(
            "[UpdateEngine] fetched '{}' from {} at {} ({} bytes)",
            id,
            self.store.name(),
            fetched.revision,
            fetched.bytes.len()
        );

        if let Some(expected) = &request.expected_revision
            && expected != &fetched.revision
        {
            return Err(UpdateError::RevisionConflict {
                document_id: id.clone(),
                attempt,
                expected: expected.clone(),
                actual: Some(fetched.revision),
            });
        }

        if request.mutations.is_empty() {
            return Ok(Attempt::Committed(fetched.revision));
        }

        let doc = Document::decode(&fetched.bytes, fetched.revision).map_err(|source| {
            UpdateError::Decode {
                document_id: id.clone(),
                attempt,
                source,
            }
        })?;
        let updated = apply(&doc, &request.mutations).map_err(|source| UpdateError::Apply {
            document_id: id.clone(),
            attempt,
            source,
        })?;
        let bytes = updated.encode().map_err(|source| UpdateError::Encode {
            document_id: id.clone(),
            attempt,
            source,
        })?;

        let commit = self.store.commit_if_revision(id, bytes, updated.revision());
        match tokio::time::timeout(self.config.commit_timeout, commit).await {
            Ok(Ok(revision)) => Ok(Attempt::Committed(revision)),
            Ok(Err(StoreError::Conflict { expected, actual })) => Ok(Attempt::Conflict { expected, actual }),
            Ok(Err(err)) => Err(UpdateError::from_store(id, attempt, err)),
            Err(_) => Err(timed_out(id, attempt, "commit", self.config.commit_timeout)),
        }
    }
}

fn timed_out(id: &DocumentId, attempt: u32, operation: &str, after: Duration) -> UpdateError {
    log::warn!("[UpdateEngine] {} of '{}' timed out after {:?}", operation, id, after);
    UpdateError::RemoteStore {
        document_id: id.clone(),
        attempt,
        cause: StoreError::Transport(format!("{} timed out after {:?}", operation, after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ApplyError;
    use crate::document::{Cell, CellCoord, Sheet};
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    fn seeded() -> (MemoryStore, DocumentId) {
        let store = MemoryStore::new();
        let id = DocumentId::new("Budget");
        let doc = Document::from_sheets(
            Revision::new("r0"),
            vec![Sheet::new("Jan").with_cell(CellCoord::new(0, 0), 100.0)],
        )
        .unwrap();
        store.insert_document(id.clone(), "Budget.xlsx", &doc).unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_update_commits_new_revision() {
        let (store, id) = seeded();
        let engine = UpdateEngine::new(store);

        let outcome = engine
            .update(UpdateRequest::new(
                id.clone(),
                vec![Mutation::set("Jan", CellCoord::new(0, 0), 150.0)],
            ))
            .await
            .unwrap();
        assert_eq!(outcome.revision, Revision::new("r2"));
        assert_eq!(outcome.attempts, 1);

        let stored = engine.store().snapshot(&id).unwrap();
        let doc = Document::decode(&stored.bytes, stored.revision).unwrap();
        assert_eq!(
            doc.sheet("Jan").unwrap().cell(CellCoord::new(0, 0)),
            &Cell::Number(150.0)
        );
        assert!(!engine.locks().is_locked(&id));
    }

    #[tokio::test]
    async fn test_pinned_revision_mismatch_fails_fast() {
        let (store, id) = seeded();
        let engine = UpdateEngine::new(store);

        let err = engine
            .update(
                UpdateRequest::new(id.clone(), vec![Mutation::set("Jan", CellCoord::new(0, 0), 1.0)])
                    .with_expected_revision("r0"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RevisionConflict);
        assert_eq!(err.attempt(), 1);
        assert_eq!(engine.store().commit_count(), 0);
        assert_eq!(engine.store().fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_sheet_is_not_committed() {
        let (store, id) = seeded();
        let engine = UpdateEngine::new(store);

        let err = engine
            .update(UpdateRequest::new(
                id.clone(),
                vec![Mutation::set("NoSuchSheet", CellCoord::new(0, 0), 1.0)],
            ))
            .await
            .unwrap_err();
        match err {
            UpdateError::Apply {
                source: ApplyError::UnknownSheet { sheet, .. },
                ..
            } => assert_eq!(sheet, "NoSuchSheet"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.store().commit_count(), 0);
        assert!(!engine.locks().is_locked(&id));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_commit() {
        let (store, id) = seeded();
        let engine = UpdateEngine::new(store);

        let outcome = engine.update(UpdateRequest::new(id, Vec::new())).await.unwrap();
        assert_eq!(outcome.revision, Revision::new("r1"));
        assert_eq!(engine.store().commit_count(), 0);
    }

    #[tokio::test]
    async fn test_garbage_bytes_fail_to_decode() {
        let store = MemoryStore::new();
        let id = DocumentId::new("notes.txt");
        store.insert(id.clone(), "notes.txt", b"plain text".to_vec());
        let engine = UpdateEngine::new(store);

        let err = engine
            .update(UpdateRequest::new(
                id,
                vec![Mutation::set("Sheet1", CellCoord::new(0, 0), "x")],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(engine.store().commit_count(), 0);
    }
}
