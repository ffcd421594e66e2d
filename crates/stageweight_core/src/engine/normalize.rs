//! Scope weight normalization against master defaults.
//!
//! # Invariants
//! - The base of a node is the master weight for its natural key, never the
//!   derived collection's stored weight.
//! - Disabled nodes report `0`.
//! - Enabled roots sum to `root_total`; enabled children sum to their
//!   parent's normalized weight.

use crate::model::node::WeightedNode;
use std::collections::{HashMap, HashSet};

/// Recomputes weights as each node's share of the enabled master bases.
///
/// Within every sibling group `weight = base / enabled_sum * target`. A group
/// whose enabled bases are all zero is split equally. Keys missing from
/// `master_base_weights` count as base `0`. Nodes unreachable from the
/// roots end up with weight `0`.
pub fn normalize(
    nodes: &[WeightedNode],
    master_base_weights: &HashMap<String, f64>,
    root_total: f64,
) -> Vec<WeightedNode> {
    let mut result = nodes.to_vec();
    let mut groups: HashMap<_, Vec<usize>> = HashMap::new();
    for (index, node) in result.iter_mut().enumerate() {
        node.weight = 0.0;
        groups.entry(node.parent_id).or_default().push(index);
    }

    let mut pending = vec![(None, root_total)];
    let mut visited = HashSet::new();
    while let Some((parent, target)) = pending.pop() {
        if !visited.insert(parent) {
            continue;
        }
        let Some(indices) = groups.get(&parent) else {
            continue;
        };

        let enabled: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&index| result[index].enabled)
            .collect();
        let bases: Vec<f64> = enabled
            .iter()
            .map(|&index| base_of(&result[index], master_base_weights))
            .collect();
        let enabled_sum: f64 = bases.iter().sum();

        for (&index, base) in enabled.iter().zip(bases) {
            result[index].weight = if enabled_sum > 0.0 {
                base / enabled_sum * target
            } else {
                target / enabled.len() as f64
            };
        }
        for &index in indices {
            pending.push((Some(result[index].id), result[index].weight));
        }
    }
    result
}

fn base_of(node: &WeightedNode, bases: &HashMap<String, f64>) -> f64 {
    match bases.get(&node.natural_key) {
        Some(value) if value.is_finite() && *value > 0.0 => *value,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::normalize;
    use crate::model::node::WeightedNode;
    use std::collections::HashMap;

    fn bases(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn disabled_nodes_report_zero_and_enabled_fill_total() {
        let nodes = vec![
            WeightedNode::new("A", "A").with_weight(99.0),
            WeightedNode::new("B", "B").with_weight(1.0).disabled(),
            WeightedNode::new("C", "C"),
        ];
        let result = normalize(&nodes, &bases(&[("A", 10.0), ("B", 50.0), ("C", 30.0)]), 100.0);
        assert_eq!(result[0].weight, 25.0);
        assert_eq!(result[1].weight, 0.0);
        assert_eq!(result[2].weight, 75.0);
    }

    #[test]
    fn zero_bases_split_equally() {
        let nodes = vec![
            WeightedNode::new("A", "A"),
            WeightedNode::new("B", "B"),
            WeightedNode::new("C", "C"),
            WeightedNode::new("D", "D").disabled(),
        ];
        let result = normalize(&nodes, &HashMap::new(), 90.0);
        assert_eq!(result[0].weight, 30.0);
        assert_eq!(result[1].weight, 30.0);
        assert_eq!(result[2].weight, 30.0);
        assert_eq!(result[3].weight, 0.0);
    }

    #[test]
    fn children_share_parent_weight() {
        let a = WeightedNode::new("A", "A");
        let b = WeightedNode::new("B", "B");
        let a1 = WeightedNode::new("A1", "A1").with_parent(a.id);
        let a2 = WeightedNode::new("A2", "A2").with_parent(a.id);
        let b1 = WeightedNode::new("B1", "B1").with_parent(b.id);
        let nodes = vec![a, b.disabled(), a1, a2, b1];
        let result = normalize(
            &nodes,
            &bases(&[("A", 40.0), ("B", 60.0), ("A1", 1.0), ("A2", 3.0), ("B1", 1.0)]),
            100.0,
        );
        assert_eq!(result[0].weight, 100.0);
        assert_eq!(result[1].weight, 0.0);
        assert_eq!(result[2].weight, 25.0);
        assert_eq!(result[3].weight, 75.0);
        assert_eq!(result[4].weight, 0.0);
    }

    #[test]
    fn all_disabled_group_is_all_zero() {
        let nodes = vec![WeightedNode::new("A", "A").with_weight(3.0).disabled()];
        let result = normalize(&nodes, &bases(&[("A", 10.0)]), 100.0);
        assert_eq!(result[0].weight, 0.0);
    }
}
