//! Domain model for weighted stage/section/task configuration.
//!
//! # Responsibility
//! - Define the node record and the tree snapshot shared by engine, store
//!   and services.
//!
//! # Invariants
//! - Storage ids never double as cross-collection identity; `natural_key`
//!   does.

pub mod node;
pub mod scope;
