//! Master-to-scope structural reconciliation.
//!
//! # Responsibility
//! - Match derived records to master records by natural key.
//! - Produce the create/update/delete plan and the reconciled collection.
//!
//! # Invariants
//! - After sync the derived key set equals the master key set.
//! - Matched derived records keep `enabled` and `weight`; only structural
//!   fields (name, category, position, code, parent) follow the master.
//! - New derived records start disabled with zero weight.
//! - Duplicate derived keys collapse to the first stored occurrence.

use crate::model::node::{NodeId, WeightedNode};
use log::warn;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use uuid::Uuid;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    /// Derived records to insert, already carrying derived-side ids.
    pub created: Vec<WeightedNode>,
    /// Existing derived records whose structural fields changed.
    pub updated: Vec<WeightedNode>,
    /// Orphans and duplicate-key records to remove.
    pub deleted: Vec<WeightedNode>,
    /// Full derived collection after reconciliation, in master order.
    pub reconciled: Vec<WeightedNode>,
}

impl SyncPlan {
    /// Whether the derived collection needs any store write.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Reconciles `derived` against `master` using `key_fn` as identity.
///
/// Parents are translated through the key: a derived record's parent is the
/// derived counterpart of its master record's parent.
pub fn sync<K, F>(master: &[WeightedNode], derived: &[WeightedNode], key_fn: F) -> SyncPlan
where
    K: Eq + Hash + Clone,
    F: Fn(&WeightedNode) -> K,
{
    let mut plan = SyncPlan::default();

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(derived.len());
    for node in derived {
        if seen.insert(key_fn(node)) {
            unique.push(node.clone());
        } else {
            warn!(
                "event=template_sync module=engine status=dedup natural_key={} dropped_id={}",
                node.natural_key, node.id
            );
            plan.deleted.push(node.clone());
        }
    }

    let mut derived_by_key: HashMap<K, WeightedNode> = unique
        .iter()
        .map(|node| (key_fn(node), node.clone()))
        .collect();
    let master_key_by_id: HashMap<NodeId, K> =
        master.iter().map(|node| (node.id, key_fn(node))).collect();
    let derived_id_by_key: HashMap<K, NodeId> = master
        .iter()
        .map(|node| {
            let key = key_fn(node);
            let id = derived_by_key
                .get(&key)
                .map_or_else(Uuid::new_v4, |existing| existing.id);
            (key, id)
        })
        .collect();

    let mut handled = HashSet::new();
    for source in master {
        let key = key_fn(source);
        if !handled.insert(key.clone()) {
            continue;
        }
        let parent_id = source
            .parent_id
            .and_then(|id| master_key_by_id.get(&id))
            .and_then(|parent_key| derived_id_by_key.get(parent_key))
            .copied();

        match derived_by_key.remove(&key) {
            Some(mut existing) => {
                if structure_differs(&existing, source, parent_id) {
                    existing.name = source.name.clone();
                    existing.category = source.category.clone();
                    existing.position = source.position;
                    existing.code = source.code.clone();
                    existing.parent_id = parent_id;
                    plan.updated.push(existing.clone());
                }
                plan.reconciled.push(existing);
            }
            None => {
                let created = WeightedNode {
                    id: derived_id_by_key.get(&key).copied().unwrap_or_else(Uuid::new_v4),
                    natural_key: source.natural_key.clone(),
                    parent_id,
                    name: source.name.clone(),
                    category: source.category.clone(),
                    position: source.position,
                    weight: 0.0,
                    enabled: false,
                    code: source.code.clone(),
                };
                plan.created.push(created.clone());
                plan.reconciled.push(created);
            }
        }
    }

    for node in unique {
        if derived_by_key.remove(&key_fn(&node)).is_some() {
            plan.deleted.push(node);
        }
    }
    plan
}

fn structure_differs(derived: &WeightedNode, master: &WeightedNode, parent_id: Option<NodeId>) -> bool {
    derived.name != master.name
        || derived.category != master.category
        || derived.position != master.position
        || derived.code != master.code
        || derived.parent_id != parent_id
}

/// Collects master weights keyed by natural key for normalization.
pub fn base_weights(master: &[WeightedNode]) -> HashMap<String, f64> {
    master
        .iter()
        .map(|node| (node.natural_key.clone(), node.weight))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{base_weights, sync};
    use crate::model::node::{natural_key, WeightedNode};
    use std::collections::BTreeSet;

    fn keys(nodes: &[WeightedNode]) -> BTreeSet<String> {
        nodes.iter().map(|node| node.natural_key.clone()).collect()
    }

    #[test]
    fn orphan_deleted_missing_created_matched_preserved() {
        let master = vec![
            WeightedNode::new("KO", "Kick-off").with_weight(20.0),
            WeightedNode::new("SD", "Schematic design").with_weight(30.0),
            WeightedNode::new("DD", "Design development").with_weight(50.0),
        ];
        let derived = vec![
            WeightedNode::new("KO", "Kick-off").with_weight(40.0),
            WeightedNode::new("SD", "Schematic design").with_weight(60.0).disabled(),
            WeightedNode::new("XX", "Legacy").with_weight(0.0),
        ];

        let plan = sync(&master, &derived, natural_key);

        assert_eq!(keys(&plan.reconciled), keys(&master));
        assert_eq!(plan.deleted.len(), 1);
        assert_eq!(plan.deleted[0].natural_key, "XX");
        assert_eq!(plan.created.len(), 1);
        assert_eq!(plan.created[0].natural_key, "DD");
        assert!(!plan.created[0].enabled);
        assert_eq!(plan.created[0].weight, 0.0);
        assert!(plan.updated.is_empty());

        let ko = &plan.reconciled[0];
        assert_eq!(ko.id, derived[0].id);
        assert!(ko.enabled);
        assert_eq!(ko.weight, 40.0);
        let sd = &plan.reconciled[1];
        assert!(!sd.enabled);
        assert_eq!(sd.weight, 60.0);
    }

    #[test]
    fn renamed_master_updates_structure_but_keeps_overrides() {
        let master = vec![WeightedNode::new("KO", "Kick-off meeting").with_category("design")];
        let derived = vec![WeightedNode::new("KO", "Kick-off").with_weight(100.0).disabled()];
        let plan = sync(&master, &derived, natural_key);

        assert_eq!(plan.updated.len(), 1);
        let updated = &plan.updated[0];
        assert_eq!(updated.id, derived[0].id);
        assert_eq!(updated.name, "Kick-off meeting");
        assert_eq!(updated.category.as_deref(), Some("design"));
        assert!(!updated.enabled);
        assert_eq!(updated.weight, 100.0);
    }

    #[test]
    fn duplicate_derived_keys_collapse_to_first() {
        let master = vec![WeightedNode::new("KO", "Kick-off")];
        let first = WeightedNode::new("KO", "Kick-off").with_weight(100.0);
        let second = WeightedNode::new("KO", "Kick-off").with_weight(5.0);
        let plan = sync(&master, &[first.clone(), second.clone()], natural_key);

        assert_eq!(plan.reconciled.len(), 1);
        assert_eq!(plan.reconciled[0].id, first.id);
        assert_eq!(plan.deleted.len(), 1);
        assert_eq!(plan.deleted[0].id, second.id);
    }

    #[test]
    fn parents_are_translated_to_derived_ids() {
        let stage = WeightedNode::new("ST", "Stage");
        let existing_child = WeightedNode::new("T1", "Task 1").with_parent(stage.id);
        let new_child = WeightedNode::new("T2", "Task 2").with_parent(stage.id);
        let master = vec![stage, existing_child, new_child];

        let derived_stage = WeightedNode::new("ST", "Stage");
        let derived_child = WeightedNode::new("T1", "Task 1").with_parent(derived_stage.id);
        let plan = sync(&master, &[derived_stage.clone(), derived_child], natural_key);

        assert!(plan.updated.is_empty());
        assert_eq!(plan.created.len(), 1);
        assert_eq!(plan.created[0].parent_id, Some(derived_stage.id));
    }

    #[test]
    fn new_parent_and_child_are_linked_within_created_set() {
        let stage = WeightedNode::new("ST", "Stage");
        let child = WeightedNode::new("T1", "Task 1").with_parent(stage.id);
        let plan = sync(&[stage, child], &[], natural_key);

        assert_eq!(plan.created.len(), 2);
        assert_eq!(plan.created[1].parent_id, Some(plan.created[0].id));
    }

    #[test]
    fn second_pass_is_a_noop() {
        let master = vec![
            WeightedNode::new("KO", "Kick-off"),
            WeightedNode::new("SD", "Schematic design"),
        ];
        let first = sync(&master, &[], natural_key);
        let second = sync(&master, &first.reconciled, natural_key);
        assert!(second.is_noop());
    }

    #[test]
    fn base_weights_are_keyed_by_natural_key() {
        let master = vec![WeightedNode::new("KO", "Kick-off").with_weight(5.0)];
        assert_eq!(base_weights(&master).get("KO"), Some(&5.0));
    }
}
