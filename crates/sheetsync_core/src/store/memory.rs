use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BoxFuture, DocumentInfo, FetchedDocument, RemoteStore, StoreError};
use crate::document::{Document, DocumentId, EncodeError, Revision};

struct StoredDocument {
    name: String,
    bytes: Vec<u8>,
    version: u64,
}

impl StoredDocument {
    fn revision(&self) -> Revision {
        Revision::new(format!("r{}", self.version))
    }
}

/// In-process store with numbered revisions (`r1`, `r2`, ...).
///
/// Commits are a true compare-and-swap. Fetch and commit calls are counted so
/// tests can assert how often the store was hit.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<DocumentId, StoredDocument>>,
    fetches: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<DocumentId, StoredDocument>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store raw bytes under `id`, bumping the revision if it already exists.
    pub fn insert(&self, id: DocumentId, name: impl Into<String>, bytes: Vec<u8>) -> Revision {
        let mut docs = self.docs();
        let version = docs.get(&id).map_or(1, |d| d.version + 1);
        let stored = StoredDocument {
            name: name.into(),
            bytes,
            version,
        };
        let revision = stored.revision();
        docs.insert(id, stored);
        revision
    }

    /// Encode `doc` and store it under `id`.
    pub fn insert_document(
        &self,
        id: DocumentId,
        name: impl Into<String>,
        doc: &Document,
    ) -> Result<Revision, EncodeError> {
        let bytes = doc.encode()?;
        Ok(self.insert(id, name, bytes))
    }

    /// Unconditionally replace the bytes, as an uncoordinated writer would.
    pub fn overwrite(&self, id: &DocumentId, bytes: Vec<u8>) -> Option<Revision> {
        let mut docs = self.docs();
        let stored = docs.get_mut(id)?;
        stored.bytes = bytes;
        stored.version += 1;
        Some(stored.revision())
    }

    /// Current bytes and revision, without counting as a fetch.
    pub fn snapshot(&self, id: &DocumentId) -> Option<FetchedDocument> {
        self.docs().get(id).map(|d| FetchedDocument {
            bytes: d.bytes.clone(),
            revision: d.revision(),
        })
    }

    /// Number of `fetch` calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `commit_if_revision` calls, including rejected ones.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<FetchedDocument, StoreError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.snapshot(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))
        })
    }

    fn commit_if_revision<'a>(
        &'a self,
        id: &'a DocumentId,
        bytes: Vec<u8>,
        expected: &'a Revision,
    ) -> BoxFuture<'a, Result<Revision, StoreError>> {
        Box::pin(async move {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let mut docs = self.docs();
            let stored = docs
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;

            let current = stored.revision();
            if &current != expected {
                return Err(StoreError::Conflict {
                    expected: expected.clone(),
                    actual: Some(current),
                });
            }

            stored.bytes = bytes;
            stored.version += 1;
            Ok(stored.revision())
        })
    }

    fn describe<'a>(&'a self, id: &'a DocumentId) -> BoxFuture<'a, Result<DocumentInfo, StoreError>> {
        Box::pin(async move {
            let docs = self.docs();
            let stored = docs
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            Ok(DocumentInfo {
                id: id.clone(),
                name: stored.name.clone(),
                mime_type: None,
                revision: Some(stored.revision()),
            })
        })
    }

    fn list(&self, page_size: usize) -> BoxFuture<'_, Result<Vec<DocumentInfo>, StoreError>> {
        Box::pin(async move {
            let docs = self.docs();
            let mut out: Vec<DocumentInfo> = docs
                .iter()
                .map(|(id, stored)| DocumentInfo {
                    id: id.clone(),
                    name: stored.name.clone(),
                    mime_type: None,
                    revision: Some(stored.revision()),
                })
                .collect();
            out.sort_by(|a, b| a.id.cmp(&b.id));
            out.truncate(page_size);
            Ok(out)
        })
    }
}
