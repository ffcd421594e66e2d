//! Weight allocation and template synchronization engine.
//!
//! # Responsibility
//! - Keep sibling weights summing to their group target after every edit.
//! - Reconcile derived scopes against the master collection.
//! - Recompute presentational codes after structural changes.
//!
//! # Invariants
//! - Every entry point is pure: snapshots in, snapshots out, no I/O.
//! - Disabled nodes always end up with weight `0`.

use crate::model::node::NodeId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod allocator;
pub mod cascade;
pub mod normalize;
pub mod renumber;
pub mod template_sync;

pub type EngineResult<T> = Result<T, EngineError>;

/// Caller misuse detected by engine entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Edited node is not part of the supplied snapshot.
    NodeNotFound(NodeId),
    /// Disabled nodes cannot receive weight.
    NodeDisabled(NodeId),
    /// Requested weight is NaN or infinite.
    InvalidWeight(f64),
    /// Group total is NaN, infinite or negative.
    InvalidTotal(f64),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node not found in snapshot: {id}"),
            Self::NodeDisabled(id) => write!(f, "node is disabled: {id}"),
            Self::InvalidWeight(value) => write!(f, "weight must be finite, got {value}"),
            Self::InvalidTotal(value) => {
                write!(f, "group total must be finite and >= 0, got {value}")
            }
        }
    }
}

impl Error for EngineError {}

pub(crate) fn ensure_total(total: f64) -> EngineResult<()> {
    if !total.is_finite() || total < 0.0 {
        return Err(EngineError::InvalidTotal(total));
    }
    Ok(())
}
