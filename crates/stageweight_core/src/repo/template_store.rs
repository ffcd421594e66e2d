//! Template store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist stage/section/task records per scope and record kind.
//! - Register scopes and identify the master scope.
//! - Keep SQL details and ordering behavior inside the store boundary.
//!
//! # Invariants
//! - Listing is deterministic: `position ASC, record_uuid ASC`.
//! - Records are validated before every write and after every read.
//! - `bulk_update` applies each record independently; there is no
//!   cross-record transaction.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::node::{NodeId, NodeValidationError, WeightedNode};
use crate::model::scope::{RecordKind, Scope};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT
    record_uuid,
    natural_key,
    parent_uuid,
    name,
    category,
    position,
    weight,
    is_active,
    display_code
FROM template_records";

const RECORD_COLUMNS: &[&str] = &[
    "record_uuid",
    "record_kind",
    "scope_key",
    "natural_key",
    "parent_uuid",
    "name",
    "category",
    "position",
    "weight",
    "is_active",
    "display_code",
    "created_at",
    "updated_at",
];

const SCOPE_COLUMNS: &[&str] = &["scope_key", "display_name", "is_master"];

/// Result type used by template store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from template store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Record or scope failed field validation.
    Validation(NodeValidationError),
    /// Target record does not exist in the given scope and kind.
    RecordNotFound(NodeId),
    /// Another scope is already registered as master.
    MasterScopeConflict { existing: String, requested: String },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "template record not found: {id}"),
            Self::MasterScopeConflict {
                existing,
                requested,
            } => write!(
                f,
                "scope `{existing}` is already master; refusing to register `{requested}`"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "template store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "template store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "template store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid template data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<NodeValidationError> for StoreError {
    fn from(value: NodeValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Partial field update for one record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub parent_id: Option<Option<NodeId>>,
    pub name: Option<String>,
    pub category: Option<Option<String>>,
    pub position: Option<i64>,
    pub weight: Option<f64>,
    pub is_active: Option<bool>,
    pub display_code: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Patch carrying only the derived-side overrides of `node`.
    pub fn overrides_of(node: &WeightedNode) -> Self {
        Self {
            weight: Some(node.weight),
            is_active: Some(node.enabled),
            display_code: Some(node.code.clone()),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), NodeValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(NodeValidationError::BlankName);
            }
        }
        if let Some(weight) = self.weight {
            if !weight.is_finite() || weight < 0.0 {
                return Err(NodeValidationError::InvalidWeight {
                    natural_key: String::new(),
                    weight,
                });
            }
        }
        Ok(())
    }
}

/// Store interface for template records, one collection per kind and scope.
pub trait TemplateStore {
    /// Lists records of one collection in stored order.
    fn list(&self, kind: RecordKind, scope: &str) -> StoreResult<Vec<WeightedNode>>;
    /// Inserts one record keeping its id.
    fn create(&self, kind: RecordKind, scope: &str, record: &WeightedNode)
        -> StoreResult<WeightedNode>;
    /// Applies a partial update to one record.
    fn update(
        &self,
        kind: RecordKind,
        id: NodeId,
        scope: &str,
        patch: &RecordPatch,
    ) -> StoreResult<()>;
    /// Deletes one record.
    fn delete(&self, kind: RecordKind, id: NodeId, scope: &str) -> StoreResult<()>;
    /// Writes every record independently.
    ///
    /// Returns `Ok(false)` when at least one record no longer exists, and the
    /// first error when any write failed; the other writes are still applied.
    fn bulk_update(
        &self,
        kind: RecordKind,
        scope: &str,
        records: &[WeightedNode],
    ) -> StoreResult<bool>;
    /// Lists registered scopes, master first.
    fn list_scopes(&self) -> StoreResult<Vec<Scope>>;
    /// Registers or renames one scope.
    fn upsert_scope(&self, scope: &Scope) -> StoreResult<()>;
}

impl<T: TemplateStore + ?Sized> TemplateStore for &T {
    fn list(&self, kind: RecordKind, scope: &str) -> StoreResult<Vec<WeightedNode>> {
        (**self).list(kind, scope)
    }

    fn create(
        &self,
        kind: RecordKind,
        scope: &str,
        record: &WeightedNode,
    ) -> StoreResult<WeightedNode> {
        (**self).create(kind, scope, record)
    }

    fn update(
        &self,
        kind: RecordKind,
        id: NodeId,
        scope: &str,
        patch: &RecordPatch,
    ) -> StoreResult<()> {
        (**self).update(kind, id, scope, patch)
    }

    fn delete(&self, kind: RecordKind, id: NodeId, scope: &str) -> StoreResult<()> {
        (**self).delete(kind, id, scope)
    }

    fn bulk_update(
        &self,
        kind: RecordKind,
        scope: &str,
        records: &[WeightedNode],
    ) -> StoreResult<bool> {
        (**self).bulk_update(kind, scope, records)
    }

    fn list_scopes(&self) -> StoreResult<Vec<Scope>> {
        (**self).list_scopes()
    }

    fn upsert_scope(&self, scope: &Scope) -> StoreResult<()> {
        (**self).upsert_scope(scope)
    }
}

/// SQLite-backed template store.
pub struct SqliteTemplateStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTemplateStore<'conn> {
    /// Creates store from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn write_record(&self, kind: RecordKind, scope: &str, record: &WeightedNode) -> StoreResult<usize> {
        record.validate()?;
        let changed = self.conn.execute(
            "UPDATE template_records
             SET parent_uuid = ?4,
                 name = ?5,
                 category = ?6,
                 position = ?7,
                 weight = ?8,
                 is_active = ?9,
                 display_code = ?10,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE record_uuid = ?1
               AND record_kind = ?2
               AND scope_key = ?3;",
            params![
                record.id.to_string(),
                kind.as_str(),
                scope,
                record.parent_id.map(|value| value.to_string()),
                record.name.as_str(),
                record.category.as_deref(),
                record.position,
                record.weight,
                bool_to_int(record.enabled),
                record.code.as_str(),
            ],
        )?;
        Ok(changed)
    }
}

impl TemplateStore for SqliteTemplateStore<'_> {
    fn list(&self, kind: RecordKind, scope: &str) -> StoreResult<Vec<WeightedNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE record_kind = ?1
               AND scope_key = ?2
             ORDER BY position ASC, record_uuid ASC;"
        ))?;
        let mut rows = stmt.query(params![kind.as_str(), scope])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn create(
        &self,
        kind: RecordKind,
        scope: &str,
        record: &WeightedNode,
    ) -> StoreResult<WeightedNode> {
        record.validate()?;
        self.conn.execute(
            "INSERT INTO template_records (
                record_uuid,
                record_kind,
                scope_key,
                natural_key,
                parent_uuid,
                name,
                category,
                position,
                weight,
                is_active,
                display_code
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.id.to_string(),
                kind.as_str(),
                scope,
                record.natural_key.as_str(),
                record.parent_id.map(|value| value.to_string()),
                record.name.as_str(),
                record.category.as_deref(),
                record.position,
                record.weight,
                bool_to_int(record.enabled),
                record.code.as_str(),
            ],
        )?;
        load_required_record(self.conn, kind, scope, record.id)
    }

    fn update(
        &self,
        kind: RecordKind,
        id: NodeId,
        scope: &str,
        patch: &RecordPatch,
    ) -> StoreResult<()> {
        patch.validate()?;
        if patch.is_empty() {
            return load_required_record(self.conn, kind, scope, id).map(|_| ());
        }

        let mut assignments = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(parent_id) = patch.parent_id {
            assignments.push("parent_uuid = ?");
            bind_values.push(parent_id.map_or(Value::Null, |id| Value::Text(id.to_string())));
        }
        if let Some(name) = &patch.name {
            assignments.push("name = ?");
            bind_values.push(Value::Text(name.clone()));
        }
        if let Some(category) = &patch.category {
            assignments.push("category = ?");
            bind_values.push(category.clone().map_or(Value::Null, Value::Text));
        }
        if let Some(position) = patch.position {
            assignments.push("position = ?");
            bind_values.push(Value::Integer(position));
        }
        if let Some(weight) = patch.weight {
            assignments.push("weight = ?");
            bind_values.push(Value::Real(weight));
        }
        if let Some(is_active) = patch.is_active {
            assignments.push("is_active = ?");
            bind_values.push(Value::Integer(bool_to_int(is_active)));
        }
        if let Some(display_code) = &patch.display_code {
            assignments.push("display_code = ?");
            bind_values.push(Value::Text(display_code.clone()));
        }

        let sql = format!(
            "UPDATE template_records
             SET {}, updated_at = (strftime('%s', 'now') * 1000)
             WHERE record_uuid = ? AND record_kind = ? AND scope_key = ?;",
            assignments.join(", ")
        );
        bind_values.push(Value::Text(id.to_string()));
        bind_values.push(Value::Text(kind.as_str().to_string()));
        bind_values.push(Value::Text(scope.to_string()));

        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        if changed == 0 {
            return Err(StoreError::RecordNotFound(id));
        }
        Ok(())
    }

    fn delete(&self, kind: RecordKind, id: NodeId, scope: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM template_records
             WHERE record_uuid = ?1
               AND record_kind = ?2
               AND scope_key = ?3;",
            params![id.to_string(), kind.as_str(), scope],
        )?;
        if changed == 0 {
            return Err(StoreError::RecordNotFound(id));
        }
        Ok(())
    }

    fn bulk_update(
        &self,
        kind: RecordKind,
        scope: &str,
        records: &[WeightedNode],
    ) -> StoreResult<bool> {
        let mut all_applied = true;
        let mut first_error = None;
        for record in records {
            match self.write_record(kind, scope, record) {
                Ok(0) => {
                    warn!(
                        "event=store_bulk_update module=repo status=missing kind={kind} scope={scope} record={}",
                        record.id
                    );
                    all_applied = false;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        "event=store_bulk_update module=repo status=error kind={kind} scope={scope} record={} error={err}",
                        record.id
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(all_applied),
        }
    }

    fn list_scopes(&self) -> StoreResult<Vec<Scope>> {
        let mut stmt = self.conn.prepare(
            "SELECT scope_key, display_name, is_master
             FROM template_scopes
             ORDER BY is_master DESC, scope_key ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut scopes = Vec::new();
        while let Some(row) = rows.next()? {
            scopes.push(Scope {
                key: row.get("scope_key")?,
                display_name: row.get("display_name")?,
                is_master: parse_flag(row.get("is_master")?, "template_scopes.is_master")?,
            });
        }
        Ok(scopes)
    }

    fn upsert_scope(&self, scope: &Scope) -> StoreResult<()> {
        scope.validate()?;
        if scope.is_master {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT scope_key
                     FROM template_scopes
                     WHERE is_master = 1
                       AND scope_key <> ?1;",
                    [scope.key.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                return Err(StoreError::MasterScopeConflict {
                    existing,
                    requested: scope.key.clone(),
                });
            }
        }

        self.conn.execute(
            "INSERT INTO template_scopes (scope_key, display_name, is_master)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(scope_key) DO UPDATE SET
                display_name = excluded.display_name,
                is_master = excluded.is_master,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                scope.key.as_str(),
                scope.display_name.as_str(),
                bool_to_int(scope.is_master),
            ],
        )?;
        Ok(())
    }
}

fn load_required_record(
    conn: &Connection,
    kind: RecordKind,
    scope: &str,
    id: NodeId,
) -> StoreResult<WeightedNode> {
    let mut stmt = conn.prepare(&format!(
        "{RECORD_SELECT_SQL}
         WHERE record_uuid = ?1
           AND record_kind = ?2
           AND scope_key = ?3;"
    ))?;
    let mut rows = stmt.query(params![id.to_string(), kind.as_str(), scope])?;
    if let Some(row) = rows.next()? {
        return parse_record_row(row);
    }
    Err(StoreError::RecordNotFound(id))
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<WeightedNode> {
    let id_text: String = row.get("record_uuid")?;
    let parent_id = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "template_records.parent_uuid"))
        .transpose()?;

    let record = WeightedNode {
        id: parse_uuid(&id_text, "template_records.record_uuid")?,
        natural_key: row.get("natural_key")?,
        parent_id,
        name: row.get("name")?,
        category: row.get("category")?,
        position: row.get("position")?,
        weight: row.get("weight")?,
        enabled: parse_flag(row.get("is_active")?, "template_records.is_active")?,
        code: row.get("display_code")?,
    };
    record
        .validate()
        .map_err(|err| StoreError::InvalidData(format!("record {id_text}: {err}")))?;
    Ok(record)
}

fn parse_flag(value: i64, column: &'static str) -> StoreResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for (table, columns) in [
        ("template_records", RECORD_COLUMNS),
        ("template_scopes", SCOPE_COLUMNS),
    ] {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
