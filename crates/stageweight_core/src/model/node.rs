//! Weighted node domain model.
//!
//! # Responsibility
//! - Define the record shared by stages, stage sections and tasks.
//! - Provide the immutable tree snapshot consumed by the weight engine.
//!
//! # Invariants
//! - `id` is collection-local; `natural_key` is the cross-collection identity.
//! - `weight` is finite and non-negative.
//! - Sibling weights sum to the group target (parent weight, or
//!   `root_total` for roots) within `WEIGHT_TOLERANCE`.
//! - `code` and `position` are written by the renumberer only.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Collection-local storage identifier.
pub type NodeId = Uuid;

/// Default fixed total for top-level sibling groups.
pub const DEFAULT_ROOT_TOTAL: f64 = 100.0;
/// Tolerance for the sibling sum invariant.
pub const WEIGHT_TOLERANCE: f64 = 0.01;
/// Tolerance used to gate the save action.
pub const SAVE_TOLERANCE: f64 = 0.1;

static NATURAL_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("natural key pattern must compile")
});

/// Validation failures for a single node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValidationError {
    /// Natural key is blank after trim.
    BlankNaturalKey,
    /// Natural key contains characters outside the allowed set.
    InvalidNaturalKey(String),
    /// Display name is blank after trim.
    BlankName,
    /// Weight is negative, NaN or infinite.
    InvalidWeight { natural_key: String, weight: f64 },
    /// Node names itself as parent.
    SelfParent(NodeId),
}

impl Display for NodeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankNaturalKey => write!(f, "natural key must not be blank"),
            Self::InvalidNaturalKey(key) => write!(f, "natural key is invalid: `{key}`"),
            Self::BlankName => write!(f, "name must not be blank"),
            Self::InvalidWeight {
                natural_key,
                weight,
            } => write!(f, "weight {weight} of `{natural_key}` must be finite and >= 0"),
            Self::SelfParent(id) => write!(f, "node {id} cannot be its own parent"),
        }
    }
}

impl Error for NodeValidationError {}

/// One configurable item: a stage, a stage section or a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedNode {
    /// Storage id, different in master and every derived scope.
    pub id: NodeId,
    /// Stable key used to match master and derived records.
    pub natural_key: String,
    /// Parent node in the same collection. `None` means root.
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub category: Option<String>,
    /// Order key within the sibling group.
    pub position: i64,
    pub weight: f64,
    pub enabled: bool,
    /// Presentational code such as `03-02`.
    pub code: String,
}

impl WeightedNode {
    /// Creates an enabled root node with zero weight and a fresh id.
    pub fn new(natural_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), natural_key, name)
    }

    /// Creates a node with a caller-provided id.
    pub fn with_id(id: NodeId, natural_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            natural_key: natural_key.into(),
            parent_id: None,
            name: name.into(),
            category: None,
            position: 0,
            weight: 0.0,
            enabled: true,
            code: String::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: NodeId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checks field-level invariants.
    ///
    /// # Errors
    /// - Returns the first violated rule.
    pub fn validate(&self) -> Result<(), NodeValidationError> {
        validate_natural_key(&self.natural_key)?;
        if self.name.trim().is_empty() {
            return Err(NodeValidationError::BlankName);
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(NodeValidationError::InvalidWeight {
                natural_key: self.natural_key.clone(),
                weight: self.weight,
            });
        }
        if self.parent_id == Some(self.id) {
            return Err(NodeValidationError::SelfParent(self.id));
        }
        Ok(())
    }
}

/// Validates one natural key against the allowed shape.
pub fn validate_natural_key(value: &str) -> Result<(), NodeValidationError> {
    if value.trim().is_empty() {
        return Err(NodeValidationError::BlankNaturalKey);
    }
    if !NATURAL_KEY_PATTERN.is_match(value) {
        return Err(NodeValidationError::InvalidNaturalKey(value.to_string()));
    }
    Ok(())
}

/// Key function used when matching master and derived collections.
pub fn natural_key(node: &WeightedNode) -> String {
    node.natural_key.clone()
}

/// Structural problem found by `WeightTree::check_invariants`.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeInvariantViolation {
    /// Node refers to a parent that is not in the snapshot.
    DanglingParent { node: NodeId, parent: NodeId },
    /// Parent chain loops back onto itself.
    Cycle(NodeId),
    /// Enabled sibling weights do not add up to the group target.
    SumMismatch {
        parent: Option<NodeId>,
        expected: f64,
        actual: f64,
    },
    /// Disabled node still carries weight.
    DisabledWithWeight(NodeId),
}

impl Display for TreeInvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingParent { node, parent } => {
                write!(f, "node {node} refers to missing parent {parent}")
            }
            Self::Cycle(id) => write!(f, "parent chain of node {id} forms a cycle"),
            Self::SumMismatch {
                parent,
                expected,
                actual,
            } => match parent {
                Some(parent) => write!(
                    f,
                    "children of {parent} sum to {actual}, expected {expected}"
                ),
                None => write!(f, "root weights sum to {actual}, expected {expected}"),
            },
            Self::DisabledWithWeight(id) => write!(f, "disabled node {id} carries weight"),
        }
    }
}

impl Error for TreeInvariantViolation {}

/// Immutable snapshot of one collection, in stored order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTree {
    /// Fixed total that root siblings must reach.
    pub root_total: f64,
    pub nodes: Vec<WeightedNode>,
}

impl WeightTree {
    pub fn new(root_total: f64, nodes: Vec<WeightedNode>) -> Self {
        Self { root_total, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&WeightedNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id == id)
    }

    pub fn find_by_key(&self, natural_key: &str) -> Option<&WeightedNode> {
        self.nodes
            .iter()
            .find(|node| node.natural_key == natural_key)
    }

    /// Returns indices of one sibling group in stored order.
    pub fn child_indices(&self, parent: Option<NodeId>) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent_id == parent)
            .map(|(index, _)| index)
            .collect()
    }

    /// Groups node indices by parent, each group in stored order.
    pub fn group_index(&self) -> HashMap<Option<NodeId>, Vec<usize>> {
        let mut groups: HashMap<Option<NodeId>, Vec<usize>> = HashMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            groups.entry(node.parent_id).or_default().push(index);
        }
        groups
    }

    /// Returns the total a sibling group must reach.
    ///
    /// Returns `None` when `parent` is not part of the snapshot.
    pub fn target_total(&self, parent: Option<NodeId>) -> Option<f64> {
        match parent {
            None => Some(self.root_total),
            Some(parent_id) => self.get(parent_id).map(|node| {
                if node.enabled {
                    node.weight
                } else {
                    0.0
                }
            }),
        }
    }

    /// Returns ids of every descendant of `id`, breadth-first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let groups = self.group_index();
        let mut result = Vec::new();
        let mut frontier = vec![id];
        let mut seen = HashSet::from([id]);
        while let Some(current) = frontier.pop() {
            if let Some(children) = groups.get(&Some(current)) {
                for &index in children {
                    let child = self.nodes[index].id;
                    if seen.insert(child) {
                        result.push(child);
                        frontier.push(child);
                    }
                }
            }
        }
        result
    }

    /// Sum of enabled root weights.
    pub fn root_sum(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|node| node.parent_id.is_none() && node.enabled)
            .map(|node| node.weight)
            .sum()
    }

    /// Whether root weights are close enough to `root_total` to allow saving.
    pub fn is_weight_valid(&self) -> bool {
        is_weight_valid(&self.nodes, self.root_total)
    }

    /// Verifies structure and the per-group sum invariant.
    ///
    /// Groups whose enabled members all carry zero weight and whose target
    /// is zero are accepted. An empty enabled group is accepted for any target.
    pub fn check_invariants(&self, tolerance: f64) -> Result<(), TreeInvariantViolation> {
        let ids: HashSet<NodeId> = self.nodes.iter().map(|node| node.id).collect();
        for node in &self.nodes {
            if let Some(parent) = node.parent_id {
                if !ids.contains(&parent) {
                    return Err(TreeInvariantViolation::DanglingParent {
                        node: node.id,
                        parent,
                    });
                }
            }
            if !node.enabled && node.weight != 0.0 {
                return Err(TreeInvariantViolation::DisabledWithWeight(node.id));
            }
        }
        if let Some(id) = self.first_cycle() {
            return Err(TreeInvariantViolation::Cycle(id));
        }

        for (parent, indices) in self.group_index() {
            let enabled: Vec<f64> = indices
                .iter()
                .filter(|&&index| self.nodes[index].enabled)
                .map(|&index| self.nodes[index].weight)
                .collect();
            if enabled.is_empty() {
                continue;
            }
            let expected = self.target_total(parent).unwrap_or(0.0);
            let actual: f64 = enabled.iter().sum();
            if (actual - expected).abs() > tolerance {
                return Err(TreeInvariantViolation::SumMismatch {
                    parent,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Returns a node whose parent chain loops, if any.
    pub fn first_cycle(&self) -> Option<NodeId> {
        let parents: HashMap<NodeId, Option<NodeId>> = self
            .nodes
            .iter()
            .map(|node| (node.id, node.parent_id))
            .collect();
        for node in &self.nodes {
            let mut visited = HashSet::new();
            let mut cursor = Some(node.id);
            while let Some(current) = cursor {
                if !visited.insert(current) {
                    return Some(node.id);
                }
                cursor = parents.get(&current).copied().flatten();
            }
        }
        None
    }
}

/// Save gate: `|sum(enabled root weights) - target| < SAVE_TOLERANCE`.
pub fn is_weight_valid(nodes: &[WeightedNode], target: f64) -> bool {
    let sum: f64 = nodes
        .iter()
        .filter(|node| node.parent_id.is_none() && node.enabled)
        .map(|node| node.weight)
        .sum();
    (sum - target).abs() < SAVE_TOLERANCE
}
