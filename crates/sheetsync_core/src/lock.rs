//! Per-document mutual exclusion.
//!
//! Every document id maps to a fair async mutex. A [`LockToken`] holds the
//! mutex for one fetch → apply → commit attempt and releases it on drop, so
//! the lock cannot leak on error paths or when the owning future is
//! cancelled. Locks for different documents are independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::document::DocumentId;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Default)]
struct LockTable {
    slots: Mutex<HashMap<DocumentId, Slot>>,
}

impl LockTable {
    fn slots(&self) -> MutexGuard<'_, HashMap<DocumentId, Slot>> {
        // The table only holds Arcs; a panic while it was held cannot leave it inconsistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of per-document locks.
///
/// Cloning is cheap and clones share the same table.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    table: Arc<LockTable>,
}

impl DocumentLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `id` is free and take it.
    ///
    /// Waiters are admitted in the order they started waiting.
    pub async fn acquire(&self, id: &DocumentId) -> LockToken {
        let slot = {
            let mut slots = self.table.slots();
            slots.entry(id.clone()).or_default().clone()
        };

        let guard = slot.clone().lock_owned().await;
        log::debug!("[DocumentLocks] acquired {}", id);

        LockToken {
            id: id.clone(),
            slot,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Whether some attempt currently holds `id`.
    pub fn is_locked(&self, id: &DocumentId) -> bool {
        let slots = self.table.slots();
        slots.get(id).is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of documents with a holder or waiters.
    pub fn tracked(&self) -> usize {
        self.table.slots().len()
    }
}

/// Exclusive hold on one document. Dropping it releases the lock.
pub struct LockToken {
    id: DocumentId,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl LockToken {
    /// The locked document.
    pub fn document_id(&self) -> &DocumentId {
        &self.id
    }
}

impl std::fmt::Debug for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockToken").field("id", &self.id).finish()
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        // Release first so the next waiter can proceed.
        drop(self.guard.take());

        // Prune the entry when nobody else references it: one count for the
        // table and one for this token. Waiters hold their own clones.
        let mut slots = self.table.slots();
        if let Some(slot) = slots.get(&self.id)
            && Arc::ptr_eq(slot, &self.slot)
            && Arc::strong_count(&self.slot) == 2
        {
            slots.remove(&self.id);
        }
        log::debug!("[DocumentLocks] released {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let locks = DocumentLocks::new();
        let id = DocumentId::new("Budget");

        let token = locks.acquire(&id).await;
        assert!(locks.is_locked(&id));
        assert_eq!(token.document_id(), &id);

        drop(token);
        assert!(!locks.is_locked(&id));
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_same_document_waits() {
        let locks = DocumentLocks::new();
        let id = DocumentId::new("Budget");

        let token = locks.acquire(&id).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&id)).await;
        assert!(blocked.is_err());

        drop(token);
        let second = tokio::time::timeout(Duration::from_millis(500), locks.acquire(&id)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_documents_do_not_block() {
        let locks = DocumentLocks::new();
        let _a = locks.acquire(&DocumentId::new("A")).await;
        let b = tokio::time::timeout(Duration::from_millis(500), locks.acquire(&DocumentId::new("B"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_order() {
        let locks = DocumentLocks::new();
        let id = DocumentId::new("Budget");
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire(&id).await;
        let mut handles = Vec::new();
        for n in 0..4 {
            let locks = locks.clone();
            let id = id.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _token = locks.acquire(&id).await;
                order.lock().unwrap().push(n);
            }));
            // Let each waiter enqueue before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(locks.tracked(), 0);
    }
}
