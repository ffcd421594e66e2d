//! Core engine for stage/task weight allocation and template sync.
//! Every weight and structure invariant is enforced in this crate.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use engine::allocator::{rebalance, redistribute};
pub use engine::cascade::{cascade, rebalance_group, rescale_subtree};
pub use engine::normalize::normalize;
pub use engine::renumber::{renumber, RenumberOptions, INACTIVE_CODE};
pub use engine::template_sync::{base_weights, sync, SyncPlan};
pub use engine::{EngineError, EngineResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::node::{
    is_weight_valid, natural_key, NodeId, NodeValidationError, TreeInvariantViolation,
    WeightTree, WeightedNode, DEFAULT_ROOT_TOTAL, SAVE_TOLERANCE, WEIGHT_TOLERANCE,
};
pub use model::scope::{RecordKind, Scope};
pub use repo::template_store::{
    RecordPatch, SqliteTemplateStore, StoreError, StoreResult, TemplateStore,
};
pub use service::scope_sync_service::{
    ScopeServiceError, ScopeSyncService, SyncOutcome, SyncReport,
};
pub use service::stage_editor::{EditorError, SaveSummary, StageEditor};
pub use service::sync_guard::{SyncGuard, SyncToken};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
