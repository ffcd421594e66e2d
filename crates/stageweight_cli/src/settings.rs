//! Runtime settings for the `stageweight` binary.
//!
//! # Responsibility
//! - Turn global flags into an opened database and engine configuration.
//! - Start file logging when a log directory is configured.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use stageweight_core::{default_log_level, init_logging, open_db, EngineConfig};

use crate::error::CliError;

/// Global options shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct GlobalArgs {
    /// Path to the SQLite template database.
    #[arg(long, env = "STAGEWEIGHT_DB_PATH", default_value = "stageweight.db", global = true)]
    pub db: PathBuf,

    /// Absolute directory for rolling log files. Logging is off when unset.
    #[arg(long, env = "STAGEWEIGHT_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// JSON file with `root_total`, `tolerance` and `save_tolerance`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn start_logging(&self) -> Result<(), CliError> {
        let Some(log_dir) = &self.log_dir else {
            return Ok(());
        };
        let level = self.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &log_dir.to_string_lossy()).map_err(CliError::Logging)
    }

    pub fn engine_config(&self) -> Result<EngineConfig, CliError> {
        let config = match &self.config {
            Some(path) => load_config(path)?,
            None => EngineConfig::default(),
        };
        config.validate().map_err(CliError::Config)?;
        Ok(config)
    }

    pub fn open(&self) -> Result<Connection, CliError> {
        open_db(&self.db).map_err(CliError::Db)
    }
}

fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    let raw = fs::read_to_string(path).map_err(|err| CliError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    serde_json::from_str(&raw).map_err(|err| CliError::Json {
        path: path.to_path_buf(),
        source: err,
    })
}
