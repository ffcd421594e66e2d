use stageweight_core::db::open_db_in_memory;
use stageweight_core::{
    EngineConfig, NodeId, RecordKind, RecordPatch, Scope, ScopeServiceError, ScopeSyncService,
    SqliteTemplateStore, StoreError, StoreResult, SyncOutcome, SyncReport, TemplateStore,
    WeightTree, WeightedNode, WEIGHT_TOLERANCE,
};

const MASTER: &str = "master";
const FITOUT: &str = "fitout";

fn seed_scopes<S: TemplateStore>(service: &ScopeSyncService<S>) {
    service
        .register_scope(&Scope::master(MASTER, "Master"))
        .unwrap();
    service
        .register_scope(&Scope::derived(FITOUT, "Fit-out"))
        .unwrap();
}

fn seed_master(store: &impl TemplateStore, kind: RecordKind, stages: &[(&str, f64)]) {
    for (position, (key, weight)) in stages.iter().enumerate() {
        let mut node = WeightedNode::new(*key, format!("Stage {key}")).with_weight(*weight);
        node.position = position as i64;
        node.code = format!("{:02}", position + 1);
        store.create(kind, MASTER, &node).unwrap();
    }
}

fn applied(outcome: SyncOutcome) -> SyncReport {
    match outcome {
        SyncOutcome::Applied(report) => report,
        SyncOutcome::AlreadyRunning => panic!("sync was skipped"),
    }
}

fn weight_of(records: &[WeightedNode], key: &str) -> f64 {
    records
        .iter()
        .find(|node| node.natural_key == key)
        .map(|node| node.weight)
        .unwrap()
}

fn enable(store: &impl TemplateStore, kind: RecordKind, keys: &[&str]) {
    for node in store.list(kind, FITOUT).unwrap() {
        if keys.contains(&node.natural_key.as_str()) {
            store
                .update(
                    kind,
                    node.id,
                    FITOUT,
                    &RecordPatch {
                        is_active: Some(true),
                        ..RecordPatch::default()
                    },
                )
                .unwrap();
        }
    }
}

#[test]
fn first_sync_creates_disabled_copies_of_master() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    seed_master(&store, RecordKind::Stage, &[("KO", 20.0), ("SD", 30.0), ("DD", 50.0)]);

    let report = applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    assert_eq!(report.created, 3);
    assert_eq!(report.deleted, 0);

    let stored = store.list(RecordKind::Stage, FITOUT).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored
        .iter()
        .all(|node| !node.enabled && node.weight == 0.0 && node.code == "00"));
    let master = store.list(RecordKind::Stage, MASTER).unwrap();
    for (derived, source) in stored.iter().zip(&master) {
        assert_eq!(derived.natural_key, source.natural_key);
        assert_ne!(derived.id, source.id);
    }
}

#[test]
fn enabled_subset_is_normalized_from_master_bases() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    seed_master(
        &store,
        RecordKind::Stage,
        &[
            ("KO", 5.0),
            ("SD", 12.5),
            ("DD", 17.5),
            ("ED", 22.5),
            ("PC", 12.5),
            ("CN", 25.0),
            ("HO", 5.0),
        ],
    );
    applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    enable(&store, RecordKind::Stage, &["KO", "SD", "DD", "ED", "HO"]);

    let report = applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    assert_eq!(report.created, 0);

    let stored = store.list(RecordKind::Stage, FITOUT).unwrap();
    for (key, expected) in [
        ("KO", 8.0),
        ("SD", 20.0),
        ("DD", 28.0),
        ("ED", 36.0),
        ("PC", 0.0),
        ("CN", 0.0),
        ("HO", 8.0),
    ] {
        assert!(
            (weight_of(&stored, key) - expected).abs() < 1e-9,
            "{key} should be {expected}"
        );
    }
    let codes: Vec<&str> = stored.iter().map(|node| node.code.as_str()).collect();
    assert_eq!(codes, vec!["01", "02", "03", "04", "00", "00", "05"]);
    assert!(WeightTree::new(100.0, stored).is_weight_valid());
}

#[test]
fn orphans_are_deleted_and_overrides_survive() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    seed_master(&store, RecordKind::Stage, &[("KO", 20.0), ("SD", 30.0), ("DD", 50.0)]);

    let ko = WeightedNode::new("KO", "Kick-off").with_weight(40.0);
    let mut sd = WeightedNode::new("SD", "Schematic design").with_weight(60.0).disabled();
    sd.position = 1;
    let mut xx = WeightedNode::new("XX", "Legacy");
    xx.position = 2;
    for node in [&ko, &sd, &xx] {
        store.create(RecordKind::Stage, FITOUT, node).unwrap();
    }

    let report = applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 1);

    let stored = store.list(RecordKind::Stage, FITOUT).unwrap();
    let keys: Vec<&str> = stored.iter().map(|node| node.natural_key.as_str()).collect();
    assert_eq!(keys, vec!["KO", "SD", "DD"]);

    let stored_ko = &stored[0];
    assert_eq!(stored_ko.id, ko.id);
    assert!(stored_ko.enabled);
    assert_eq!(stored_ko.weight, 100.0);
    assert!(!stored[1].enabled);
    assert_eq!(stored[1].id, sd.id);
    assert!(!stored[2].enabled);
    assert_eq!(stored[2].weight, 0.0);
}

#[test]
fn second_sync_writes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    seed_master(&store, RecordKind::Stage, &[("KO", 20.0), ("SD", 80.0)]);
    applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    enable(&store, RecordKind::Stage, &["SD"]);
    applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());

    let report = applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    assert_eq!((report.created, report.updated, report.deleted), (0, 0, 0));
}

#[test]
fn reset_reenables_every_master_record() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    seed_master(&store, RecordKind::Stage, &[("KO", 10.0), ("SD", 30.0), ("DD", 40.0)]);
    applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());

    let report = applied(service.reset_scope(RecordKind::Stage, FITOUT).unwrap());
    assert!(report.records.iter().all(|node| node.enabled));
    assert!((weight_of(&report.records, "KO") - 12.5).abs() < 1e-9);
    assert!((weight_of(&report.records, "SD") - 37.5).abs() < 1e-9);
    assert!((weight_of(&report.records, "DD") - 50.0).abs() < 1e-9);
}

#[test]
fn task_hierarchy_is_rebuilt_with_derived_parents() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);

    let survey = WeightedNode::new("T1", "Survey").with_weight(60.0);
    let mut measure = WeightedNode::new("T1.1", "Measure")
        .with_parent(survey.id)
        .with_weight(20.0);
    measure.position = 0;
    let mut photos = WeightedNode::new("T1.2", "Photos")
        .with_parent(survey.id)
        .with_weight(40.0);
    photos.position = 1;
    let mut report_task = WeightedNode::new("T2", "Report").with_weight(40.0);
    report_task.position = 1;
    for node in [&survey, &measure, &photos, &report_task] {
        store.create(RecordKind::Task, MASTER, node).unwrap();
    }

    applied(service.reset_scope(RecordKind::Task, FITOUT).unwrap());
    let stored = store.list(RecordKind::Task, FITOUT).unwrap();
    let tree = WeightTree::new(100.0, stored);
    tree.check_invariants(WEIGHT_TOLERANCE).unwrap();

    let derived_survey = tree.find_by_key("T1").unwrap();
    let derived_photos = tree.find_by_key("T1.2").unwrap();
    assert_eq!(derived_photos.parent_id, Some(derived_survey.id));
    assert_eq!(derived_photos.code, "01-02");
    assert!((derived_photos.weight - 40.0).abs() < 1e-9);
    assert!(tree.get(survey.id).is_none());
}

#[test]
fn sync_is_skipped_while_collection_is_claimed() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    seed_master(&store, RecordKind::Stage, &[("KO", 100.0)]);

    let token = service.guard().try_acquire(RecordKind::Stage, FITOUT).unwrap();
    assert_eq!(
        service.sync_scope(RecordKind::Stage, FITOUT).unwrap(),
        SyncOutcome::AlreadyRunning
    );
    assert!(store.list(RecordKind::Stage, FITOUT).unwrap().is_empty());

    applied(service.sync_scope(RecordKind::Task, FITOUT).unwrap());
    drop(token);
    applied(service.sync_scope(RecordKind::Stage, FITOUT).unwrap());
    assert!(!service.guard().is_running(RecordKind::Stage, FITOUT));
}

#[test]
fn master_and_unknown_scopes_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());

    assert!(matches!(
        service.sync_scope(RecordKind::Stage, FITOUT),
        Err(ScopeServiceError::MasterScopeMissing)
    ));
    seed_scopes(&service);
    assert!(matches!(
        service.sync_scope(RecordKind::Stage, MASTER),
        Err(ScopeServiceError::CannotSyncMaster(_))
    ));
    assert!(matches!(
        service.sync_scope(RecordKind::Stage, "newbuild"),
        Err(ScopeServiceError::ScopeNotFound(_))
    ));
}

#[test]
fn sync_all_visits_every_derived_scope() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let service = ScopeSyncService::new(&store, EngineConfig::default());
    seed_scopes(&service);
    service
        .register_scope(&Scope::derived("newbuild", "New build"))
        .unwrap();
    seed_master(&store, RecordKind::Stage, &[("KO", 100.0)]);

    let results = service.sync_all(RecordKind::Stage).unwrap();
    let scopes: Vec<&str> = results.iter().map(|(scope, _)| scope.as_str()).collect();
    assert_eq!(scopes, vec![FITOUT, "newbuild"]);
    assert!(results.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(store.list(RecordKind::Stage, "newbuild").unwrap().len(), 1);
}

/// Store that fails every insert after delegating reads.
struct FailingInserts<'a> {
    inner: SqliteTemplateStore<'a>,
}

impl TemplateStore for FailingInserts<'_> {
    fn list(&self, kind: RecordKind, scope: &str) -> StoreResult<Vec<WeightedNode>> {
        self.inner.list(kind, scope)
    }

    fn create(&self, _: RecordKind, _: &str, _: &WeightedNode) -> StoreResult<WeightedNode> {
        Err(StoreError::InvalidData("insert refused".to_string()))
    }

    fn update(&self, kind: RecordKind, id: NodeId, scope: &str, patch: &RecordPatch) -> StoreResult<()> {
        self.inner.update(kind, id, scope, patch)
    }

    fn delete(&self, kind: RecordKind, id: NodeId, scope: &str) -> StoreResult<()> {
        self.inner.delete(kind, id, scope)
    }

    fn bulk_update(&self, kind: RecordKind, scope: &str, records: &[WeightedNode]) -> StoreResult<bool> {
        self.inner.bulk_update(kind, scope, records)
    }

    fn list_scopes(&self) -> StoreResult<Vec<Scope>> {
        self.inner.list_scopes()
    }

    fn upsert_scope(&self, scope: &Scope) -> StoreResult<()> {
        self.inner.upsert_scope(scope)
    }
}

#[test]
fn failed_persist_returns_reloaded_snapshot() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let orphan = WeightedNode::new("XX", "Legacy");
    store.create(RecordKind::Stage, FITOUT, &orphan).unwrap();

    let failing = FailingInserts {
        inner: SqliteTemplateStore::try_new(&conn).unwrap(),
    };
    let service = ScopeSyncService::new(failing, EngineConfig::default());
    seed_scopes(&service);
    seed_master(&store, RecordKind::Stage, &[("KO", 100.0)]);

    match service.sync_scope(RecordKind::Stage, FITOUT) {
        Err(ScopeServiceError::PersistFailed { reloaded, .. }) => {
            // The orphan delete ran before the insert failed.
            assert_eq!(reloaded, Some(Vec::new()));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!service.guard().is_running(RecordKind::Stage, FITOUT));
}
