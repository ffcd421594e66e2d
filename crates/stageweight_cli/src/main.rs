//! Command-line front-end for the stage weight engine.
//!
//! Provides the `stageweight` binary: scope registration, JSON import,
//! weight editing and master-to-scope synchronization over one SQLite
//! template database.

mod commands;
mod error;
mod settings;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use log::{error, info};
use stageweight_core::RecordKind;

use crate::error::CliError;
use crate::settings::GlobalArgs;

/// Stage and task weight allocation tools.
#[derive(Parser)]
#[command(name = "stageweight", version, about = "Stage and task weight allocation tools")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Register or rename a scope.
    InitScope {
        key: String,
        display_name: String,
        /// Make this the master scope.
        #[arg(long)]
        master: bool,
    },
    /// List registered scopes; the master is marked with `*`.
    Scopes,
    /// Load a JSON array of records into an empty collection.
    Import {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        #[arg(short, long)]
        scope: String,
        file: PathBuf,
    },
    /// Print one collection with codes and weights.
    Show {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        #[arg(short, long)]
        scope: String,
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Set one record's weight and rebalance its siblings.
    SetWeight {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        #[arg(short, long)]
        scope: String,
        key: String,
        weight: f64,
    },
    /// Enable one record and give it an equal share.
    Enable {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        #[arg(short, long)]
        scope: String,
        key: String,
    },
    /// Disable one record and its subtree.
    Disable {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        #[arg(short, long)]
        scope: String,
        key: String,
    },
    /// Reconcile derived scopes against master.
    Sync {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        /// Scope to sync; every derived scope when omitted with `--all`.
        #[arg(short, long, required_unless_present = "all", conflicts_with = "all")]
        scope: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Re-enable every master record in a scope and re-normalize.
    Reset {
        #[arg(short, long, value_parser = parse_kind)]
        kind: RecordKind,
        #[arg(short, long)]
        scope: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            error!("event=cli_command module=cli status=error error={err}");
            eprintln!("Error: {err}");
            err.exit_code()
        }
    };
    process::exit(exit_code);
}

fn run(cli: Cli) -> Result<(), CliError> {
    cli.global.start_logging()?;
    let config = cli.global.engine_config()?;
    let conn = cli.global.open()?;
    info!(
        "event=cli_command module=cli status=start db={}",
        cli.global.db.display()
    );

    match cli.command {
        Commands::InitScope {
            key,
            display_name,
            master,
        } => commands::register_scope(&conn, &key, &display_name, master),
        Commands::Scopes => commands::list_scopes(&conn),
        Commands::Import { kind, scope, file } => {
            commands::import(&conn, &config, kind, &scope, &file).map(|_| ())
        }
        Commands::Show { kind, scope, json } => commands::show(&conn, &config, kind, &scope, json),
        Commands::SetWeight {
            kind,
            scope,
            key,
            weight,
        } => commands::set_weight(&conn, &config, kind, &scope, &key, weight),
        Commands::Enable { kind, scope, key } => {
            commands::set_enabled(&conn, &config, kind, &scope, &key, true)
        }
        Commands::Disable { kind, scope, key } => {
            commands::set_enabled(&conn, &config, kind, &scope, &key, false)
        }
        Commands::Sync { kind, scope, all: _ } => {
            commands::sync(&conn, &config, kind, scope.as_deref(), false)
        }
        Commands::Reset { kind, scope } => commands::sync(&conn, &config, kind, Some(&scope), true),
    }
}

/// Parse a record kind: stage, section or task.
fn parse_kind(value: &str) -> Result<RecordKind, String> {
    RecordKind::parse(value).ok_or_else(|| {
        format!("invalid record kind '{value}', expected stage/section/task")
    })
}
