//! Subcommand implementations.
//!
//! Each function opens its own store on the given connection and prints
//! human-readable results to stdout.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::info;
use rusqlite::Connection;
use serde::Deserialize;
use stageweight_core::{
    normalize, renumber, EngineConfig, NodeId, RecordKind, RenumberOptions, Scope, ScopeSyncService,
    SqliteTemplateStore, StageEditor, SyncOutcome, SyncReport, TemplateStore, WeightTree,
    WeightedNode,
};

use crate::error::CliError;

/// One record of an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub natural_key: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Natural key of the parent record in the same file.
    #[serde(default)]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

pub fn register_scope(
    conn: &Connection,
    key: &str,
    display_name: &str,
    master: bool,
) -> Result<(), CliError> {
    let store = SqliteTemplateStore::try_new(conn)?;
    let scope = Scope {
        key: key.to_string(),
        display_name: display_name.to_string(),
        is_master: master,
    };
    ScopeSyncService::new(&store, EngineConfig::default()).register_scope(&scope)?;
    println!("registered scope {key}{}", if master { " (master)" } else { "" });
    Ok(())
}

pub fn list_scopes(conn: &Connection) -> Result<(), CliError> {
    let store = SqliteTemplateStore::try_new(conn)?;
    for scope in store.list_scopes()? {
        let marker = if scope.is_master { "*" } else { " " };
        println!("{marker} {:<16} {}", scope.key, scope.display_name);
    }
    Ok(())
}

/// Loads a JSON array of records into an empty collection.
///
/// Weights are treated as bases and normalized so every sibling group sums
/// to its target.
pub fn import(
    conn: &Connection,
    config: &EngineConfig,
    kind: RecordKind,
    scope: &str,
    file: &Path,
) -> Result<usize, CliError> {
    let raw = fs::read_to_string(file).map_err(|source| CliError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let records: Vec<ImportRecord> = serde_json::from_str(&raw).map_err(|source| CliError::Json {
        path: file.to_path_buf(),
        source,
    })?;

    let store = SqliteTemplateStore::try_new(conn)?;
    let registered = find_scope(&store, scope)?;
    if !store.list(kind, scope)?.is_empty() {
        return Err(CliError::Usage(format!(
            "{kind} collection of `{scope}` is not empty"
        )));
    }

    let nodes = build_nodes(&records)?;
    let bases: HashMap<String, f64> = records
        .iter()
        .map(|record| (record.natural_key.clone(), record.weight))
        .collect();
    let tree = renumber(
        &WeightTree::new(config.root_total, normalize(&nodes, &bases, config.root_total)),
        &numbering_for(&registered),
    );
    for node in &tree.nodes {
        store.create(kind, scope, node)?;
    }
    info!(
        "event=cli_import module=cli status=ok kind={kind} scope={scope} records={}",
        tree.len()
    );
    println!("imported {} {kind} records into {scope}", tree.len());
    Ok(tree.len())
}

fn build_nodes(records: &[ImportRecord]) -> Result<Vec<WeightedNode>, CliError> {
    let mut nodes = Vec::with_capacity(records.len());
    let mut ids: HashMap<String, NodeId> = HashMap::new();
    for record in records {
        let mut node = WeightedNode::new(record.natural_key.clone(), record.name.trim());
        node.category = record.category.clone();
        node.enabled = record.enabled;
        node.weight = record.weight;
        node.validate()
            .map_err(|err| CliError::Usage(format!("record `{}`: {err}", record.natural_key)))?;
        if ids.insert(record.natural_key.clone(), node.id).is_some() {
            return Err(CliError::Usage(format!(
                "duplicate natural key `{}`",
                record.natural_key
            )));
        }
        nodes.push(node);
    }

    for (node, record) in nodes.iter_mut().zip(records) {
        if let Some(parent_key) = &record.parent_key {
            let parent = ids.get(parent_key).ok_or_else(|| {
                CliError::Usage(format!(
                    "record `{}` refers to unknown parent `{parent_key}`",
                    record.natural_key
                ))
            })?;
            node.parent_id = Some(*parent);
        }
    }
    let tree = WeightTree::new(0.0, nodes);
    if let Some(id) = tree.first_cycle() {
        let key = tree.get(id).map_or("?", |node| node.natural_key.as_str());
        return Err(CliError::Usage(format!("parent chain of `{key}` forms a cycle")));
    }
    Ok(tree.nodes)
}

pub fn show(
    conn: &Connection,
    config: &EngineConfig,
    kind: RecordKind,
    scope: &str,
    json: bool,
) -> Result<(), CliError> {
    let store = SqliteTemplateStore::try_new(conn)?;
    let tree = WeightTree::new(config.root_total, store.list(kind, scope)?);
    if json {
        let rendered = serde_json::to_string_pretty(&tree).unwrap_or_else(|err| {
            format!("{{\"error\": \"failed to serialize tree: {err}\"}}")
        });
        println!("{rendered}");
        return Ok(());
    }

    let depth = depth_index(&tree);
    for node in ordered(&tree) {
        let indent = "  ".repeat(depth.get(&node.id).copied().unwrap_or(0));
        let status = if node.enabled { "on " } else { "off" };
        println!(
            "{indent}{:<10} {:<12} {:>8.2} {status} {}",
            node.code, node.natural_key, node.weight, node.name
        );
    }
    println!(
        "total={:.2} target={:.2} valid={}",
        tree.root_sum(),
        config.root_total,
        config.is_weight_valid(tree.root_sum())
    );
    Ok(())
}

/// Nodes in depth-first display order.
fn ordered(tree: &WeightTree) -> Vec<&WeightedNode> {
    let groups = tree.group_index();
    let mut result = Vec::with_capacity(tree.len());
    let mut stack: Vec<usize> = groups
        .get(&None)
        .map(|roots| roots.iter().rev().copied().collect())
        .unwrap_or_default();
    while let Some(index) = stack.pop() {
        let node = &tree.nodes[index];
        result.push(node);
        if let Some(children) = groups.get(&Some(node.id)) {
            stack.extend(children.iter().rev().copied());
        }
    }
    result
}

fn depth_index(tree: &WeightTree) -> HashMap<NodeId, usize> {
    let parents: HashMap<_, _> = tree
        .nodes
        .iter()
        .map(|node| (node.id, node.parent_id))
        .collect();
    tree.nodes
        .iter()
        .map(|node| {
            let mut depth = 0;
            let mut cursor = node.parent_id;
            while let Some(parent) = cursor {
                depth += 1;
                if depth > tree.len() {
                    break;
                }
                cursor = parents.get(&parent).copied().flatten();
            }
            (node.id, depth)
        })
        .collect()
}

pub fn set_weight(
    conn: &Connection,
    config: &EngineConfig,
    kind: RecordKind,
    scope: &str,
    key: &str,
    weight: f64,
) -> Result<(), CliError> {
    let store = SqliteTemplateStore::try_new(conn)?;
    let mut editor = open_editor(&store, config, kind, scope)?;
    let id = lookup(&editor, key)?;
    editor.set_weight(id, weight)?;
    let summary = editor.save()?;
    println!("set {key} to {weight:.2}; updated {} records", summary.updated);
    Ok(())
}

pub fn set_enabled(
    conn: &Connection,
    config: &EngineConfig,
    kind: RecordKind,
    scope: &str,
    key: &str,
    enabled: bool,
) -> Result<(), CliError> {
    let store = SqliteTemplateStore::try_new(conn)?;
    let mut editor = open_editor(&store, config, kind, scope)?;
    let id = lookup(&editor, key)?;
    editor.set_enabled(id, enabled)?;
    let summary = editor.save()?;
    println!(
        "{} {key}; updated {} records",
        if enabled { "enabled" } else { "disabled" },
        summary.updated
    );
    Ok(())
}

pub fn sync(
    conn: &Connection,
    config: &EngineConfig,
    kind: RecordKind,
    scope: Option<&str>,
    reset: bool,
) -> Result<(), CliError> {
    let store = SqliteTemplateStore::try_new(conn)?;
    let service = ScopeSyncService::new(&store, *config);

    let Some(scope) = scope else {
        let mut first_error = None;
        for (scope, outcome) in service.sync_all(kind)? {
            match outcome.map_err(CliError::from).and_then(|outcome| applied(&scope, outcome)) {
                Ok(report) => print_report(&report),
                Err(err) => {
                    eprintln!("Error: {scope}: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }
        return first_error.map_or(Ok(()), Err);
    };

    let outcome = if reset {
        service.reset_scope(kind, scope)?
    } else {
        service.sync_scope(kind, scope)?
    };
    print_report(&applied(scope, outcome)?);
    Ok(())
}

fn applied(scope: &str, outcome: SyncOutcome) -> Result<SyncReport, CliError> {
    match outcome {
        SyncOutcome::Applied(report) => Ok(report),
        SyncOutcome::AlreadyRunning => Err(CliError::SyncSkipped(scope.to_string())),
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "synced {} {}: created={} updated={} deleted={}",
        report.kind, report.scope, report.created, report.updated, report.deleted
    );
}

fn open_editor<'a>(
    store: &'a SqliteTemplateStore<'a>,
    config: &EngineConfig,
    kind: RecordKind,
    scope: &str,
) -> Result<StageEditor<&'a SqliteTemplateStore<'a>>, CliError> {
    let registered = find_scope(store, scope)?;
    let editor = StageEditor::load(store, kind, scope, *config)?;
    Ok(editor.with_numbering(numbering_for(&registered)))
}

fn lookup<S: TemplateStore>(
    editor: &StageEditor<S>,
    key: &str,
) -> Result<NodeId, CliError> {
    editor
        .find_by_key(key)
        .map(|node| node.id)
        .ok_or_else(|| CliError::Usage(format!("no record with natural key `{key}`")))
}

fn find_scope(store: &impl TemplateStore, key: &str) -> Result<Scope, CliError> {
    store
        .list_scopes()?
        .into_iter()
        .find(|scope| scope.key == key)
        .ok_or_else(|| CliError::Usage(format!("scope `{key}` is not registered")))
}

/// Master collections number every record; derived ones skip disabled records.
fn numbering_for(scope: &Scope) -> RenumberOptions {
    if scope.is_master {
        RenumberOptions::all()
    } else {
        RenumberOptions::active_only()
    }
}
