//! Hierarchical display code assignment.
//!
//! # Invariants
//! - Ordinals follow stored order within each sibling group; nothing is
//!   re-sorted by weight or name.
//! - In active-only mode disabled nodes and their subtrees get `"00"` and do
//!   not advance the counter.
//! - `position` is rewritten to the 0-based index within the sibling group.

use crate::model::node::{NodeId, WeightTree};

/// Code assigned to nodes excluded from active numbering.
pub const INACTIVE_CODE: &str = "00";

/// Numbering options for one renumbering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenumberOptions {
    /// Prefix for root codes, e.g. the owning stage's code for sections.
    pub prefix: Option<String>,
    /// Skip disabled nodes in the counter.
    pub active_only: bool,
}

impl RenumberOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active_only() -> Self {
        Self {
            prefix: None,
            active_only: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Recomputes `code` and `position` for every node of `tree`.
///
/// Nodes unreachable from the roots (dangling or cyclic parents) keep
/// `INACTIVE_CODE`.
pub fn renumber(tree: &WeightTree, options: &RenumberOptions) -> WeightTree {
    let mut next = tree.clone();
    for node in next.nodes.iter_mut() {
        node.code = INACTIVE_CODE.to_string();
    }

    let groups = next.group_index();
    let mut stack: Vec<(Option<NodeId>, Option<String>, bool)> =
        vec![(None, options.prefix.clone(), false)];
    while let Some((parent, parent_code, inactive)) = stack.pop() {
        let Some(indices) = groups.get(&parent) else {
            continue;
        };

        let mut ordinal = 0usize;
        let mut pending = Vec::with_capacity(indices.len());
        for (position, &index) in indices.iter().enumerate() {
            let node = &mut next.nodes[index];
            node.position = position as i64;
            let node_inactive = inactive || (options.active_only && !node.enabled);
            node.code = if node_inactive {
                INACTIVE_CODE.to_string()
            } else {
                ordinal += 1;
                join_code(parent_code.as_deref(), ordinal)
            };
            pending.push((Some(node.id), Some(node.code.clone()), node_inactive));
        }
        // Reverse so siblings are expanded in stored order (depth-first).
        stack.extend(pending.into_iter().rev());
    }
    next
}

fn join_code(parent_code: Option<&str>, ordinal: usize) -> String {
    match parent_code {
        Some(parent) if !parent.is_empty() => format!("{parent}-{ordinal:02}"),
        _ => format!("{ordinal:02}"),
    }
}
