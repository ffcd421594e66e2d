//! CLI error type and exit code mapping.
//!
//! Exit codes: `0` success, `1` invalid input or domain rule violation,
//! `2` save refused or sync skipped, `3` storage or I/O failure.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use stageweight_core::{
    ConfigError, DbError, EditorError, LoggingError, ScopeServiceError, StoreError,
};

#[derive(Debug)]
pub enum CliError {
    Usage(String),
    Config(ConfigError),
    Logging(LoggingError),
    Db(DbError),
    Store(StoreError),
    Editor(EditorError),
    Sync(ScopeServiceError),
    /// Sync trigger ignored because another run holds the collection.
    SyncSkipped(String),
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Config(_) | Self::Logging(_) | Self::Json { .. } => 1,
            Self::Editor(EditorError::WeightsInvalid { .. }) | Self::SyncSkipped(_) => 2,
            Self::Editor(
                EditorError::Store(_)
                | EditorError::PersistFailed { .. }
                | EditorError::PersistIncomplete { .. },
            ) => 3,
            Self::Editor(_) => 1,
            Self::Sync(
                ScopeServiceError::Store(_)
                | ScopeServiceError::PersistFailed { .. }
                | ScopeServiceError::PersistIncomplete { .. },
            ) => 3,
            Self::Sync(_) => 1,
            Self::Store(StoreError::Validation(_) | StoreError::MasterScopeConflict { .. }) => 1,
            Self::Db(_) | Self::Store(_) | Self::Io { .. } => 3,
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(message) => write!(f, "{message}"),
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "failed to open database: {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Editor(err) => write!(f, "{err}"),
            Self::Sync(err) => write!(f, "{err}"),
            Self::SyncSkipped(scope) => write!(f, "sync of `{scope}` is already running"),
            Self::Io { path, source } => write!(f, "failed to read `{}`: {source}", path.display()),
            Self::Json { path, source } => {
                write!(f, "failed to parse `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Editor(err) => Some(err),
            Self::Sync(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Usage(_) | Self::SyncSkipped(_) => None,
        }
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<EditorError> for CliError {
    fn from(value: EditorError) -> Self {
        Self::Editor(value)
    }
}

impl From<ScopeServiceError> for CliError {
    fn from(value: ScopeServiceError) -> Self {
        Self::Sync(value)
    }
}
