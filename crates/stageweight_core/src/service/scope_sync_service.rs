//! Master-to-scope synchronization service.
//!
//! # Responsibility
//! - Register scopes and resolve the master scope.
//! - Run load, reconcile, normalize, renumber and persist for one derived
//!   collection under the per-collection sync guard.
//!
//! # Invariants
//! - The master collection is read, never written, by this service.
//! - A second sync of the same collection while one runs is skipped, not
//!   queued.
//! - After a successful sync the derived key set equals the master key set
//!   and enabled root weights sum to `root_total`.

use crate::config::EngineConfig;
use crate::engine::normalize::normalize;
use crate::engine::renumber::{renumber, RenumberOptions};
use crate::engine::template_sync::{base_weights, sync};
use crate::model::node::{natural_key, WeightTree, WeightedNode};
use crate::model::scope::{RecordKind, Scope};
use crate::repo::template_store::{StoreError, TemplateStore};
use crate::service::sync_guard::SyncGuard;
use crate::service::ChangeSet;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Errors from scope synchronization.
#[derive(Debug)]
pub enum ScopeServiceError {
    /// Store failure while loading.
    Store(StoreError),
    /// No scope is registered as master.
    MasterScopeMissing,
    /// Requested scope is not registered.
    ScopeNotFound(String),
    /// The master scope is the source of truth and cannot be synced.
    CannotSyncMaster(String),
    /// A write failed. `reloaded` is the store state read back afterwards,
    /// `None` when the reload failed too.
    PersistFailed {
        source: StoreError,
        reloaded: Option<Vec<WeightedNode>>,
    },
    /// Some records vanished during the bulk update.
    PersistIncomplete {
        reloaded: Option<Vec<WeightedNode>>,
    },
}

impl Display for ScopeServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::MasterScopeMissing => write!(f, "no master scope is registered"),
            Self::ScopeNotFound(key) => write!(f, "scope not found: {key}"),
            Self::CannotSyncMaster(key) => write!(f, "scope `{key}` is the master scope"),
            Self::PersistFailed { source, .. } => write!(f, "failed to persist sync: {source}"),
            Self::PersistIncomplete { .. } => {
                write!(f, "sync persisted partially; some records no longer exist")
            }
        }
    }
}

impl Error for ScopeServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::PersistFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for ScopeServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Summary of one applied sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub kind: RecordKind,
    pub scope: String,
    /// Records added from master, disabled with zero weight.
    pub created: usize,
    /// Records whose stored fields were rewritten.
    pub updated: usize,
    /// Orphans and duplicate-key records removed.
    pub deleted: usize,
    /// Persisted collection after the sync, in master order.
    pub records: Vec<WeightedNode>,
}

/// Result of a sync trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Applied(SyncReport),
    /// Another sync of the same collection holds the guard.
    AlreadyRunning,
}

/// Scope registration and synchronization facade.
pub struct ScopeSyncService<S: TemplateStore> {
    store: S,
    config: EngineConfig,
    guard: SyncGuard,
}

impl<S: TemplateStore> ScopeSyncService<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::with_guard(store, config, SyncGuard::new())
    }

    /// Creates a service sharing `guard` with other service instances.
    pub fn with_guard(store: S, config: EngineConfig, guard: SyncGuard) -> Self {
        Self {
            store,
            config,
            guard,
        }
    }

    pub fn guard(&self) -> &SyncGuard {
        &self.guard
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers or renames one scope.
    pub fn register_scope(&self, scope: &Scope) -> Result<(), ScopeServiceError> {
        self.store.upsert_scope(scope)?;
        info!(
            "event=scope_register module=service status=ok scope={} is_master={}",
            scope.key, scope.is_master
        );
        Ok(())
    }

    /// Lists registered scopes, master first.
    pub fn list_scopes(&self) -> Result<Vec<Scope>, ScopeServiceError> {
        self.store.list_scopes().map_err(Into::into)
    }

    pub fn master_scope(&self) -> Result<Scope, ScopeServiceError> {
        self.list_scopes()?
            .into_iter()
            .find(|scope| scope.is_master)
            .ok_or(ScopeServiceError::MasterScopeMissing)
    }

    /// Reconciles one derived collection against master.
    ///
    /// Matched records keep their enabled flag; weights are re-normalized
    /// from master bases over the enabled set.
    pub fn sync_scope(
        &self,
        kind: RecordKind,
        scope: &str,
    ) -> Result<SyncOutcome, ScopeServiceError> {
        self.run(kind, scope, false)
    }

    /// Re-enables every master record in one derived collection and
    /// re-normalizes, restoring the master defaults.
    pub fn reset_scope(
        &self,
        kind: RecordKind,
        scope: &str,
    ) -> Result<SyncOutcome, ScopeServiceError> {
        self.run(kind, scope, true)
    }

    /// Syncs every derived scope, continuing past failures.
    pub fn sync_all(
        &self,
        kind: RecordKind,
    ) -> Result<Vec<(String, Result<SyncOutcome, ScopeServiceError>)>, ScopeServiceError> {
        let scopes = self.list_scopes()?;
        if !scopes.iter().any(|scope| scope.is_master) {
            return Err(ScopeServiceError::MasterScopeMissing);
        }
        Ok(scopes
            .into_iter()
            .filter(|scope| !scope.is_master)
            .map(|scope| {
                let outcome = self.sync_scope(kind, &scope.key);
                (scope.key, outcome)
            })
            .collect())
    }

    fn run(
        &self,
        kind: RecordKind,
        scope: &str,
        reset: bool,
    ) -> Result<SyncOutcome, ScopeServiceError> {
        let started_at = Instant::now();
        let scopes = self.list_scopes()?;
        let master = scopes
            .iter()
            .find(|candidate| candidate.is_master)
            .ok_or(ScopeServiceError::MasterScopeMissing)?;
        if master.key == scope {
            return Err(ScopeServiceError::CannotSyncMaster(scope.to_string()));
        }
        if !scopes.iter().any(|candidate| candidate.key == scope) {
            return Err(ScopeServiceError::ScopeNotFound(scope.to_string()));
        }

        let Some(_token) = self.guard.try_acquire(kind, scope) else {
            warn!(
                "event=scope_sync module=service status=skip kind={kind} scope={scope} reason=already_running"
            );
            return Ok(SyncOutcome::AlreadyRunning);
        };
        info!("event=scope_sync module=service status=start kind={kind} scope={scope} reset={reset}");

        let master_records = self.store.list(kind, &master.key)?;
        let stored = self.store.list(kind, scope)?;

        let plan = sync(&master_records, &stored, natural_key);
        let mut reconciled = plan.reconciled;
        if reset {
            for node in reconciled.iter_mut() {
                node.enabled = true;
            }
        }
        let normalized = normalize(
            &reconciled,
            &base_weights(&master_records),
            self.config.root_total,
        );
        let tree = renumber(
            &WeightTree::new(self.config.root_total, normalized),
            &RenumberOptions::active_only(),
        );

        let changes = ChangeSet::diff(&stored, &tree.nodes);
        match changes.apply(&self.store, kind, scope) {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    "event=scope_sync module=service status=error kind={kind} scope={scope} reason=records_missing duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                return Err(ScopeServiceError::PersistIncomplete {
                    reloaded: self.reload(kind, scope),
                });
            }
            Err(source) => {
                error!(
                    "event=scope_sync module=service status=error kind={kind} scope={scope} error={source} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                return Err(ScopeServiceError::PersistFailed {
                    source,
                    reloaded: self.reload(kind, scope),
                });
            }
        }

        let report = SyncReport {
            kind,
            scope: scope.to_string(),
            created: plan.created.len(),
            updated: changes.updated.len(),
            deleted: changes.deleted.len(),
            records: tree.nodes,
        };
        info!(
            "event=scope_sync module=service status=ok kind={kind} scope={scope} created={} updated={} deleted={} duration_ms={}",
            report.created,
            report.updated,
            report.deleted,
            started_at.elapsed().as_millis()
        );
        Ok(SyncOutcome::Applied(report))
    }

    fn reload(&self, kind: RecordKind, scope: &str) -> Option<Vec<WeightedNode>> {
        match self.store.list(kind, scope) {
            Ok(records) => Some(records),
            Err(err) => {
                error!(
                    "event=scope_reload module=service status=error kind={kind} scope={scope} error={err}"
                );
                None
            }
        }
    }
}
