//! Top-down weight cascade through a node hierarchy.
//!
//! # Responsibility
//! - Apply one weight edit at any depth and resize every affected subtree.
//!
//! # Invariants
//! - After a cascade each sibling group sums to its parent's weight, or to
//!   `root_total` for roots.
//! - Children keep their relative proportions; a zero-weight or disabled
//!   parent forces its whole subtree to zero.

use crate::engine::allocator::{rebalance, redistribute};
use crate::engine::{EngineError, EngineResult};
use crate::model::node::{NodeId, WeightTree, WeightedNode};
use std::collections::{HashSet, VecDeque};

const CHANGE_EPSILON: f64 = 1e-12;

/// Edits one node's weight and cascades the result down the tree.
///
/// # Errors
/// - `NodeNotFound` when `edited_id` is not in `tree`, or its parent is missing.
/// - Any error raised by `redistribute`.
pub fn cascade(tree: &WeightTree, edited_id: NodeId, new_weight: f64) -> EngineResult<WeightTree> {
    let edited = tree
        .get(edited_id)
        .ok_or(EngineError::NodeNotFound(edited_id))?;
    let parent = edited.parent_id;
    let target = tree
        .target_total(parent)
        .ok_or(EngineError::NodeNotFound(parent.unwrap_or(edited_id)))?;

    let indices = tree.child_indices(parent);
    let group: Vec<WeightedNode> = indices.iter().map(|&index| tree.nodes[index].clone()).collect();
    let updated = redistribute(&group, edited_id, new_weight, target)?;

    let mut next = tree.clone();
    let mut queue = VecDeque::new();
    for (index, node) in indices.into_iter().zip(updated) {
        if node.id == edited_id || changed(&next.nodes[index], &node) {
            queue.push_back(node.id);
        }
        next.nodes[index] = node;
    }
    propagate(&mut next, queue)?;
    Ok(next)
}

/// Rebalances one sibling group to its target and cascades the changes.
///
/// Used after inserts, removals and enable/disable toggles, where no single
/// member was edited.
///
/// # Errors
/// - `NodeNotFound` when `parent` is given but not in `tree`.
pub fn rebalance_group(tree: &WeightTree, parent: Option<NodeId>) -> EngineResult<WeightTree> {
    let target = tree
        .target_total(parent)
        .ok_or(EngineError::NodeNotFound(parent.unwrap_or_default()))?;
    let indices = tree.child_indices(parent);
    let group: Vec<WeightedNode> = indices.iter().map(|&index| tree.nodes[index].clone()).collect();
    let updated = rebalance(&group, target)?;

    let mut next = tree.clone();
    let mut queue = VecDeque::new();
    for (index, node) in indices.into_iter().zip(updated) {
        queue.push_back(node.id);
        next.nodes[index] = node;
    }
    propagate(&mut next, queue)?;
    Ok(next)
}

/// Re-applies the top-down pass below `node_id` without touching its siblings.
///
/// # Errors
/// - `NodeNotFound` when `node_id` is not in `tree`.
pub fn rescale_subtree(tree: &WeightTree, node_id: NodeId) -> EngineResult<WeightTree> {
    if tree.get(node_id).is_none() {
        return Err(EngineError::NodeNotFound(node_id));
    }
    let mut next = tree.clone();
    propagate(&mut next, VecDeque::from([node_id]))?;
    Ok(next)
}

fn propagate(tree: &mut WeightTree, mut queue: VecDeque<NodeId>) -> EngineResult<()> {
    let groups = tree.group_index();
    // A malformed snapshot with a parent cycle must not loop forever.
    let mut visited = HashSet::new();
    while let Some(parent_id) = queue.pop_front() {
        if !visited.insert(parent_id) {
            continue;
        }
        let Some(indices) = groups.get(&Some(parent_id)) else {
            continue;
        };
        let target = tree.target_total(Some(parent_id)).unwrap_or(0.0);
        let group: Vec<WeightedNode> = indices.iter().map(|&index| tree.nodes[index].clone()).collect();
        let updated = rebalance(&group, target)?;
        for (&index, node) in indices.iter().zip(updated) {
            if changed(&tree.nodes[index], &node) {
                queue.push_back(node.id);
            }
            tree.nodes[index] = node;
        }
    }
    Ok(())
}

fn changed(before: &WeightedNode, after: &WeightedNode) -> bool {
    (before.weight - after.weight).abs() > CHANGE_EPSILON
}
