//! Sibling weight redistribution.
//!
//! # Responsibility
//! - Split a fixed total across one sibling group after a single edit.
//! - Rescale a whole group to a new total without an edited member.
//!
//! # Invariants
//! - Enabled results sum to `total` within `WEIGHT_TOLERANCE`.
//! - The last enabled sibling absorbs the rounding remainder and is never
//!   negative.
//! - Disabled siblings are pinned to `0` and never receive a share.

use crate::engine::{ensure_total, EngineError, EngineResult};
use crate::model::node::{NodeId, WeightedNode};

/// Applies one edit to a sibling group and redistributes the remainder.
///
/// `new_weight` is clamped to `[0, total]`. Other enabled siblings share
/// `total - new_weight` in proportion to their current weights, with an
/// equal split when they all carry zero. When the edited node has no enabled
/// siblings it takes the whole `total`.
///
/// # Errors
/// - `NodeNotFound` when `edited_id` is not in `siblings`.
/// - `NodeDisabled` when the edited node is disabled.
/// - `InvalidWeight` / `InvalidTotal` for non-finite input.
pub fn redistribute(
    siblings: &[WeightedNode],
    edited_id: NodeId,
    new_weight: f64,
    total: f64,
) -> EngineResult<Vec<WeightedNode>> {
    ensure_total(total)?;
    if !new_weight.is_finite() {
        return Err(EngineError::InvalidWeight(new_weight));
    }

    let edited_index = siblings
        .iter()
        .position(|node| node.id == edited_id)
        .ok_or(EngineError::NodeNotFound(edited_id))?;
    if !siblings[edited_index].enabled {
        return Err(EngineError::NodeDisabled(edited_id));
    }

    let mut result = siblings.to_vec();
    pin_disabled(&mut result);

    let others: Vec<usize> = result
        .iter()
        .enumerate()
        .filter(|(index, node)| *index != edited_index && node.enabled)
        .map(|(index, _)| index)
        .collect();

    if others.is_empty() {
        result[edited_index].weight = total;
        return Ok(result);
    }

    let clamped = new_weight.clamp(0.0, total);
    result[edited_index].weight = clamped;

    let previous: Vec<f64> = others.iter().map(|&index| result[index].weight).collect();
    let shares = split_proportionally(&previous, total - clamped);
    for (index, share) in others.into_iter().zip(shares) {
        result[index].weight = share;
    }
    Ok(result)
}

/// Rescales every enabled sibling so the group sums to `total`.
///
/// Proportions among enabled siblings are kept; a group that sums to zero is
/// split equally.
///
/// # Errors
/// - `InvalidTotal` for a negative or non-finite `total`.
pub fn rebalance(siblings: &[WeightedNode], total: f64) -> EngineResult<Vec<WeightedNode>> {
    ensure_total(total)?;
    let mut result = siblings.to_vec();
    pin_disabled(&mut result);

    let enabled: Vec<usize> = result
        .iter()
        .enumerate()
        .filter(|(_, node)| node.enabled)
        .map(|(index, _)| index)
        .collect();
    let previous: Vec<f64> = enabled.iter().map(|&index| result[index].weight).collect();
    let shares = split_proportionally(&previous, total);
    for (index, share) in enabled.into_iter().zip(shares) {
        result[index].weight = share;
    }
    Ok(result)
}

/// Splits `target` across `previous` weights with the last-item lock.
pub(crate) fn split_proportionally(previous: &[f64], target: f64) -> Vec<f64> {
    let count = previous.len();
    if count == 0 {
        return Vec::new();
    }

    let sum: f64 = previous.iter().map(|weight| weight.max(0.0)).sum();
    let mut shares = Vec::with_capacity(count);
    let mut assigned = 0.0;
    for (index, weight) in previous.iter().enumerate() {
        let share = if index + 1 == count {
            (target - assigned).max(0.0)
        } else if sum > 0.0 {
            (weight.max(0.0) / sum * target).max(0.0)
        } else {
            target / count as f64
        };
        assigned += share;
        shares.push(share);
    }
    shares
}

fn pin_disabled(nodes: &mut [WeightedNode]) {
    for node in nodes.iter_mut().filter(|node| !node.enabled) {
        node.weight = 0.0;
    }
}
