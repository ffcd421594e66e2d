use rusqlite::Connection;
use stageweight_core::db::open_db_in_memory;
use stageweight_core::{
    RecordKind, RecordPatch, Scope, SqliteTemplateStore, StoreError, TemplateStore, WeightedNode,
};

fn stage(key: &str, name: &str, position: i64, weight: f64) -> WeightedNode {
    let mut node = WeightedNode::new(key, name).with_weight(weight);
    node.position = position;
    node
}

#[test]
fn create_and_list_in_position_order() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();

    let second = store
        .create(RecordKind::Stage, "master", &stage("SD", "Schematic design", 1, 60.0))
        .unwrap();
    let first = store
        .create(
            RecordKind::Stage,
            "master",
            &stage("KO", "Kick-off", 0, 40.0).with_category("design"),
        )
        .unwrap();
    store
        .create(RecordKind::Task, "master", &stage("T1", "Survey", 0, 100.0))
        .unwrap();
    store
        .create(RecordKind::Stage, "fitout", &stage("KO", "Kick-off", 0, 100.0))
        .unwrap();

    let listed = store.list(RecordKind::Stage, "master").unwrap();
    assert_eq!(listed, vec![first.clone(), second]);
    assert_eq!(first.category.as_deref(), Some("design"));
    assert_eq!(store.list(RecordKind::Task, "master").unwrap().len(), 1);
    assert_eq!(store.list(RecordKind::Stage, "fitout").unwrap().len(), 1);
}

#[test]
fn create_rejects_invalid_record() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();

    let err = store
        .create(RecordKind::Stage, "master", &stage("K O", "Kick-off", 0, 0.0))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = store
        .create(RecordKind::Stage, "master", &stage("KO", "Kick-off", 0, -5.0))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[test]
fn update_applies_only_patched_fields() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let parent = store
        .create(RecordKind::Task, "master", &stage("T1", "Survey", 0, 100.0))
        .unwrap();
    let child = store
        .create(RecordKind::Task, "master", &stage("T2", "Measure", 1, 0.0))
        .unwrap();

    store
        .update(
            RecordKind::Task,
            child.id,
            "master",
            &RecordPatch {
                parent_id: Some(Some(parent.id)),
                weight: Some(100.0),
                display_code: Some("01-01".to_string()),
                ..RecordPatch::default()
            },
        )
        .unwrap();

    let listed = store.list(RecordKind::Task, "master").unwrap();
    let updated = listed.iter().find(|node| node.id == child.id).unwrap();
    assert_eq!(updated.parent_id, Some(parent.id));
    assert_eq!(updated.weight, 100.0);
    assert_eq!(updated.code, "01-01");
    assert_eq!(updated.name, "Measure");
    assert!(updated.enabled);
}

#[test]
fn update_and_delete_report_missing_records() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let record = store
        .create(RecordKind::Stage, "master", &stage("KO", "Kick-off", 0, 100.0))
        .unwrap();

    let wrong_scope = store.update(
        RecordKind::Stage,
        record.id,
        "fitout",
        &RecordPatch::overrides_of(&record),
    );
    assert!(matches!(wrong_scope, Err(StoreError::RecordNotFound(id)) if id == record.id));

    store.delete(RecordKind::Stage, record.id, "master").unwrap();
    assert!(matches!(
        store.delete(RecordKind::Stage, record.id, "master"),
        Err(StoreError::RecordNotFound(_))
    ));
}

#[test]
fn bulk_update_reports_missing_and_continues() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let first = store
        .create(RecordKind::Stage, "fitout", &stage("KO", "Kick-off", 0, 50.0))
        .unwrap();
    let second = store
        .create(RecordKind::Stage, "fitout", &stage("SD", "Schematic design", 1, 50.0))
        .unwrap();

    let ghost = stage("XX", "Gone", 2, 0.0);
    let applied = store
        .bulk_update(
            RecordKind::Stage,
            "fitout",
            &[
                first.clone().with_weight(30.0),
                ghost,
                second.clone().with_weight(70.0),
            ],
        )
        .unwrap();
    assert!(!applied);

    let listed = store.list(RecordKind::Stage, "fitout").unwrap();
    assert_eq!(listed[0].weight, 30.0);
    assert_eq!(listed[1].weight, 70.0);
}

#[test]
fn bulk_update_returns_first_error_after_applying_the_rest() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    let first = store
        .create(RecordKind::Stage, "fitout", &stage("KO", "Kick-off", 0, 50.0))
        .unwrap();
    let second = store
        .create(RecordKind::Stage, "fitout", &stage("SD", "Schematic design", 1, 50.0))
        .unwrap();

    let result = store.bulk_update(
        RecordKind::Stage,
        "fitout",
        &[first.clone().with_weight(f64::NAN), second.clone().with_weight(10.0)],
    );
    assert!(matches!(result, Err(StoreError::Validation(_))));
    let listed = store.list(RecordKind::Stage, "fitout").unwrap();
    assert_eq!(listed[0].weight, 50.0);
    assert_eq!(listed[1].weight, 10.0);
}

#[test]
fn scopes_are_upserted_and_master_is_unique() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();

    store.upsert_scope(&Scope::derived("fitout", "Fit-out")).unwrap();
    store.upsert_scope(&Scope::master("master", "Master")).unwrap();
    store
        .upsert_scope(&Scope::derived("fitout", "Fit-out works"))
        .unwrap();

    let scopes = store.list_scopes().unwrap();
    assert_eq!(
        scopes,
        vec![
            Scope::master("master", "Master"),
            Scope::derived("fitout", "Fit-out works"),
        ]
    );

    let err = store
        .upsert_scope(&Scope::master("newbuild", "New build"))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::MasterScopeConflict { ref existing, .. } if existing == "master"
    ));
}

#[test]
fn corrupted_rows_are_reported_as_invalid_data() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO template_records (
            record_uuid, record_kind, scope_key, natural_key, name,
            position, weight, is_active, display_code
        ) VALUES ('not-a-uuid', 'stage', 'master', 'KO', 'Kick-off', 0, 10.0, 1, '01');",
        [],
    )
    .unwrap();
    let store = SqliteTemplateStore::try_new(&conn).unwrap();
    assert!(matches!(
        store.list(RecordKind::Stage, "master"),
        Err(StoreError::InvalidData(_))
    ));
}

#[test]
fn try_new_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    match SqliteTemplateStore::try_new(&conn) {
        Err(StoreError::UninitializedConnection {
            actual_version, ..
        }) => assert_eq!(actual_version, 0),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unmigrated connection must be rejected"),
    }
}
