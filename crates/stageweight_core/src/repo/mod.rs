//! Persistence contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the template store contract used by services.
//! - Isolate SQLite query details from weight and sync orchestration.
//!
//! # Invariants
//! - Store writes enforce `WeightedNode::validate()` before persistence.
//! - Store APIs return semantic errors (`RecordNotFound`) in addition to DB
//!   transport errors.

pub mod template_store;
