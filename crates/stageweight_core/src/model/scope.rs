//! Scope and record-kind descriptors.
//!
//! # Responsibility
//! - Name the collections a template store keeps apart.
//! - Identify the master scope that derived scopes track.
//!
//! # Invariants
//! - Scope keys follow the same shape as node natural keys.
//! - At most one registered scope is the master.

use crate::model::node::{validate_natural_key, NodeValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Record type held by a template store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Top-level construction project stage.
    Stage,
    /// Section inside one stage.
    Section,
    /// Hierarchical task.
    Task,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Stage, RecordKind::Section, RecordKind::Task];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Section => "section",
            Self::Task => "task",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stage" => Some(Self::Stage),
            "section" => Some(Self::Section),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered configuration scope (project type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub key: String,
    pub display_name: String,
    /// Master scopes define structure for every other scope.
    pub is_master: bool,
}

impl Scope {
    pub fn master(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            is_master: true,
        }
    }

    pub fn derived(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            is_master: false,
        }
    }

    pub fn validate(&self) -> Result<(), NodeValidationError> {
        validate_natural_key(&self.key)?;
        if self.display_name.trim().is_empty() {
            return Err(NodeValidationError::BlankName);
        }
        Ok(())
    }
}
