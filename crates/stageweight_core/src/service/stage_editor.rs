//! Editing session over one stored collection.
//!
//! # Responsibility
//! - Hold the working snapshot of one `(kind, scope)` collection.
//! - Route every edit through the weight engine so sibling sums hold.
//! - Persist the diff against the last loaded snapshot.
//!
//! # Invariants
//! - The working tree satisfies the sum invariant after every successful edit.
//! - A failed edit leaves the working tree unchanged.
//! - `save` refuses to write while enabled root weights miss `root_total`.
//! - After a failed save the session holds whatever the store reloaded.

use crate::config::EngineConfig;
use crate::engine::cascade::{cascade, rebalance_group};
use crate::engine::renumber::{renumber, RenumberOptions};
use crate::engine::EngineError;
use crate::model::node::{NodeId, NodeValidationError, WeightTree, WeightedNode};
use crate::model::scope::RecordKind;
use crate::repo::template_store::{StoreError, TemplateStore};
use crate::service::ChangeSet;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Errors from editing-session operations.
#[derive(Debug)]
pub enum EditorError {
    /// Store failure while loading.
    Store(StoreError),
    /// Engine rejected the edit.
    Engine(EngineError),
    /// New or renamed node failed validation.
    Validation(NodeValidationError),
    /// Target node is not part of the session.
    NodeNotFound(NodeId),
    /// Parent of a new node is not part of the session.
    ParentNotFound(NodeId),
    /// Natural key already used in this collection.
    DuplicateNaturalKey(String),
    /// Save refused because enabled root weights miss the target.
    WeightsInvalid { sum: f64, target: f64 },
    /// A write failed; `reloaded` tells whether the session was refreshed.
    PersistFailed { source: StoreError, reloaded: bool },
    /// Some records vanished during the bulk update.
    PersistIncomplete { reloaded: bool },
}

impl Display for EditorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Engine(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent node not found: {id}"),
            Self::DuplicateNaturalKey(key) => write!(f, "natural key already in use: {key}"),
            Self::WeightsInvalid { sum, target } => write!(
                f,
                "enabled root weights sum to {sum:.2}, expected {target:.2}"
            ),
            Self::PersistFailed { source, .. } => write!(f, "failed to save: {source}"),
            Self::PersistIncomplete { .. } => {
                write!(f, "save applied partially; some records no longer exist")
            }
        }
    }
}

impl Error for EditorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Engine(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::PersistFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for EditorError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<EngineError> for EditorError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::NodeNotFound(id) => Self::NodeNotFound(id),
            other => Self::Engine(other),
        }
    }
}

impl From<NodeValidationError> for EditorError {
    fn from(value: NodeValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Counts written by one successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// In-memory editing session for one collection.
pub struct StageEditor<S: TemplateStore> {
    store: S,
    kind: RecordKind,
    scope: String,
    config: EngineConfig,
    numbering: RenumberOptions,
    persisted: Vec<WeightedNode>,
    tree: WeightTree,
}

impl<S: TemplateStore> StageEditor<S> {
    /// Opens a session with the collection's stored state.
    pub fn load(
        store: S,
        kind: RecordKind,
        scope: impl Into<String>,
        config: EngineConfig,
    ) -> Result<Self, EditorError> {
        let scope = scope.into();
        let persisted = store.list(kind, &scope)?;
        info!(
            "event=editor_load module=service status=ok kind={kind} scope={scope} records={}",
            persisted.len()
        );
        Ok(Self {
            tree: WeightTree::new(config.root_total, persisted.clone()),
            store,
            kind,
            scope,
            config,
            numbering: RenumberOptions::active_only(),
            persisted,
        })
    }

    /// Replaces the numbering applied after structural edits.
    pub fn with_numbering(mut self, numbering: RenumberOptions) -> Self {
        self.numbering = numbering;
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn tree(&self) -> &WeightTree {
        &self.tree
    }

    pub fn find_by_key(&self, natural_key: &str) -> Option<&WeightedNode> {
        self.tree.find_by_key(natural_key)
    }

    /// Whether the working tree differs from the last loaded snapshot.
    pub fn is_dirty(&self) -> bool {
        self.tree.nodes != self.persisted
    }

    pub fn is_weight_valid(&self) -> bool {
        self.config.is_weight_valid(self.tree.root_sum())
    }

    /// Sets one node's weight and cascades the change through the tree.
    pub fn set_weight(&mut self, id: NodeId, weight: f64) -> Result<(), EditorError> {
        self.tree = cascade(&self.tree, id, weight)?;
        Ok(())
    }

    /// Inserts a node at the end of its sibling group.
    ///
    /// An enabled node receives `weight`, or an equal share of its group
    /// target when `None`; its siblings give up the difference
    /// proportionally. A disabled node is stored with weight `0`.
    pub fn add_node(
        &mut self,
        mut node: WeightedNode,
        weight: Option<f64>,
    ) -> Result<NodeId, EditorError> {
        node.weight = 0.0;
        node.validate()?;
        if self.tree.find_by_key(&node.natural_key).is_some() {
            return Err(EditorError::DuplicateNaturalKey(node.natural_key));
        }
        let parent = node.parent_id;
        let target = self
            .tree
            .target_total(parent)
            .ok_or_else(|| EditorError::ParentNotFound(parent.unwrap_or_default()))?;

        let id = node.id;
        let enabled = node.enabled;
        let mut next = self.tree.clone();
        next.nodes.push(node);
        if enabled {
            let active = next
                .child_indices(parent)
                .into_iter()
                .filter(|&index| next.nodes[index].enabled)
                .count();
            let share = weight.unwrap_or(target / active as f64);
            next = cascade(&next, id, share)?;
        }
        self.commit_structure(next);
        Ok(id)
    }

    /// Removes a node with its subtree and rebalances the remaining siblings.
    ///
    /// Returns the number of removed nodes.
    pub fn remove_node(&mut self, id: NodeId) -> Result<usize, EditorError> {
        let parent = self
            .tree
            .get(id)
            .ok_or(EditorError::NodeNotFound(id))?
            .parent_id;
        let mut doomed = self.tree.descendants(id);
        doomed.push(id);

        let mut next = self.tree.clone();
        next.nodes.retain(|node| !doomed.contains(&node.id));
        let next = rebalance_group(&next, parent)?;
        self.commit_structure(next);
        Ok(doomed.len())
    }

    /// Enables or disables one node.
    ///
    /// Enabling grants an equal share `target / active_count`; disabling zeroes
    /// the node and its subtree. Remaining enabled siblings are rescaled in
    /// both cases.
    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<(), EditorError> {
        let index = self.tree.index_of(id).ok_or(EditorError::NodeNotFound(id))?;
        if self.tree.nodes[index].enabled == enabled {
            return Ok(());
        }

        let parent = self.tree.nodes[index].parent_id;
        let mut next = self.tree.clone();
        next.nodes[index].enabled = enabled;
        next.nodes[index].weight = 0.0;
        let next = if enabled {
            let target = next.target_total(parent).unwrap_or(0.0);
            let active = next
                .child_indices(parent)
                .into_iter()
                .filter(|&sibling| next.nodes[sibling].enabled)
                .count();
            cascade(&next, id, target / active as f64)?
        } else {
            rebalance_group(&next, parent)?
        };
        self.commit_structure(next);
        Ok(())
    }

    /// Moves a node to `new_index` within its sibling group.
    ///
    /// Indices past the end place the node last. Weights are unchanged.
    pub fn move_node(&mut self, id: NodeId, new_index: usize) -> Result<(), EditorError> {
        let parent = self.tree.get(id).ok_or(EditorError::NodeNotFound(id))?.parent_id;
        let slots = self.tree.child_indices(parent);
        let mut members: Vec<WeightedNode> = slots
            .iter()
            .map(|&index| self.tree.nodes[index].clone())
            .collect();
        let from = members
            .iter()
            .position(|node| node.id == id)
            .ok_or(EditorError::NodeNotFound(id))?;
        let moved = members.remove(from);
        let to = new_index.min(members.len());
        members.insert(to, moved);

        let mut next = self.tree.clone();
        for (slot, node) in slots.into_iter().zip(members) {
            next.nodes[slot] = node;
        }
        self.commit_structure(next);
        Ok(())
    }

    pub fn rename_node(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), EditorError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(EditorError::Validation(NodeValidationError::BlankName));
        }
        let index = self.tree.index_of(id).ok_or(EditorError::NodeNotFound(id))?;
        self.tree.nodes[index].name = trimmed.to_string();
        Ok(())
    }

    /// Writes the working tree back to the store.
    ///
    /// # Errors
    /// - `WeightsInvalid` when the save gate fails; nothing is written.
    /// - `PersistFailed` / `PersistIncomplete` after a write problem; the
    ///   session is reloaded from the store before returning.
    pub fn save(&mut self) -> Result<SaveSummary, EditorError> {
        if !self.is_weight_valid() {
            return Err(EditorError::WeightsInvalid {
                sum: self.tree.root_sum(),
                target: self.config.root_total,
            });
        }

        let started_at = Instant::now();
        let changes = ChangeSet::diff(&self.persisted, &self.tree.nodes);
        let summary = SaveSummary {
            created: changes.created.len(),
            updated: changes.updated.len(),
            deleted: changes.deleted.len(),
        };
        if changes.is_empty() {
            return Ok(summary);
        }

        match changes.apply(&self.store, self.kind, &self.scope) {
            Ok(true) => {
                self.persisted = self.tree.nodes.clone();
                info!(
                    "event=editor_save module=service status=ok kind={} scope={} created={} updated={} deleted={} duration_ms={}",
                    self.kind,
                    self.scope,
                    summary.created,
                    summary.updated,
                    summary.deleted,
                    started_at.elapsed().as_millis()
                );
                Ok(summary)
            }
            Ok(false) => {
                error!(
                    "event=editor_save module=service status=error kind={} scope={} reason=records_missing duration_ms={}",
                    self.kind,
                    self.scope,
                    started_at.elapsed().as_millis()
                );
                let reloaded = self.reload().is_ok();
                Err(EditorError::PersistIncomplete { reloaded })
            }
            Err(source) => {
                error!(
                    "event=editor_save module=service status=error kind={} scope={} error={source} duration_ms={}",
                    self.kind,
                    self.scope,
                    started_at.elapsed().as_millis()
                );
                let reloaded = self.reload().is_ok();
                Err(EditorError::PersistFailed { source, reloaded })
            }
        }
    }

    /// Discards the working tree and reads the collection again.
    pub fn reload(&mut self) -> Result<(), EditorError> {
        let records = self.store.list(self.kind, &self.scope)?;
        self.tree = WeightTree::new(self.config.root_total, records.clone());
        self.persisted = records;
        Ok(())
    }

    fn commit_structure(&mut self, next: WeightTree) {
        self.tree = renumber(&next, &self.numbering);
    }
}
