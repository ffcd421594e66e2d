//! Per-collection re-entrancy guard for scope synchronization.
//!
//! # Invariants
//! - At most one token exists per `(record kind, scope key)` at a time.
//! - Dropping a token releases its collection, including on early return.
//! - A poisoned lock is recovered; the key set itself stays consistent.

use crate::model::scope::RecordKind;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

type CollectionKey = (RecordKind, String);

/// Shared set of collections with a sync in progress.
#[derive(Debug, Clone, Default)]
pub struct SyncGuard {
    running: Arc<Mutex<HashSet<CollectionKey>>>,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims one collection. Returns `None` when it is already claimed.
    pub fn try_acquire(&self, kind: RecordKind, scope: &str) -> Option<SyncToken> {
        let key = (kind, scope.to_string());
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(SyncToken {
            running: Arc::clone(&self.running),
            key,
        })
    }

    pub fn is_running(&self, kind: RecordKind, scope: &str) -> bool {
        self.lock().contains(&(kind, scope.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<CollectionKey>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// RAII claim on one collection.
#[derive(Debug)]
pub struct SyncToken {
    running: Arc<Mutex<HashSet<CollectionKey>>>,
    key: CollectionKey,
}

impl SyncToken {
    pub fn kind(&self) -> RecordKind {
        self.key.0
    }

    pub fn scope(&self) -> &str {
        &self.key.1
    }
}

impl Drop for SyncToken {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.key);
    }
}
