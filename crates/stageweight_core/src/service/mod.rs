//! Use-case services over the template store.
//!
//! # Responsibility
//! - Orchestrate load, engine passes and persistence into editing and
//!   synchronization flows.
//! - Keep CLI callers decoupled from storage details.
//!
//! # Invariants
//! - Engine passes run on in-memory snapshots; the store is touched only to
//!   load, persist or reload.
//! - A failed persist is always followed by a reload attempt.

pub mod scope_sync_service;
pub mod stage_editor;
pub mod sync_guard;

use crate::model::node::{NodeId, WeightedNode};
use crate::model::scope::RecordKind;
use crate::repo::template_store::{StoreResult, TemplateStore};
use std::collections::HashSet;

/// Writes to apply to one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ChangeSet {
    pub deleted: Vec<NodeId>,
    pub created: Vec<WeightedNode>,
    pub updated: Vec<WeightedNode>,
}

impl ChangeSet {
    /// Diffs a persisted snapshot against the desired one by id.
    pub fn diff(persisted: &[WeightedNode], desired: &[WeightedNode]) -> Self {
        let desired_ids: HashSet<NodeId> = desired.iter().map(|node| node.id).collect();
        let mut changes = Self {
            deleted: persisted
                .iter()
                .filter(|node| !desired_ids.contains(&node.id))
                .map(|node| node.id)
                .collect(),
            ..Self::default()
        };
        for node in desired {
            match persisted.iter().find(|stored| stored.id == node.id) {
                None => changes.created.push(node.clone()),
                Some(stored) if stored != node => changes.updated.push(node.clone()),
                Some(_) => {}
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.created.is_empty() && self.updated.is_empty()
    }

    /// Applies deletes, inserts and the bulk update in that order.
    ///
    /// Returns `Ok(false)` when the bulk update found missing records.
    pub fn apply<S: TemplateStore>(
        &self,
        store: &S,
        kind: RecordKind,
        scope: &str,
    ) -> StoreResult<bool> {
        for id in &self.deleted {
            store.delete(kind, *id, scope)?;
        }
        for node in &self.created {
            store.create(kind, scope, node)?;
        }
        if self.updated.is_empty() {
            return Ok(true);
        }
        store.bulk_update(kind, scope, &self.updated)
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeSet;
    use crate::model::node::WeightedNode;

    #[test]
    fn diff_splits_deleted_created_and_updated() {
        let kept = WeightedNode::new("KO", "Kick-off").with_weight(50.0);
        let changed = WeightedNode::new("SD", "Schematic design").with_weight(50.0);
        let removed = WeightedNode::new("XX", "Legacy");
        let persisted = vec![kept.clone(), changed.clone(), removed.clone()];

        let added = WeightedNode::new("DD", "Design development");
        let desired = vec![kept, changed.clone().with_weight(20.0), added.clone()];

        let changes = ChangeSet::diff(&persisted, &desired);
        assert_eq!(changes.deleted, vec![removed.id]);
        assert_eq!(changes.created, vec![added]);
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].id, changed.id);
        assert!(!changes.is_empty());
        assert!(ChangeSet::diff(&desired, &desired).is_empty());
    }
}
