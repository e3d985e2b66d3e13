// crates/tuplevault-cli/src/main.rs
// ============================================================================
// Module: Tuplevault CLI Entry Point
// Description: Command dispatcher for Tuplevault datastore administration.
// Purpose: Migrate, inspect, and exercise a SQLite relationship datastore.
// Dependencies: clap, serde, serde_json, thiserror, tuplevault-core,
//               tuplevault-store-sqlite
// ============================================================================

//! ## Overview
//! `tuplevault` opens the datastore named by the configuration file (or
//! `--store-path`) and runs one command against it: schema migration,
//! revision inspection, readiness and statistics reports, relationship
//! writes, and snapshot queries. Structured reports are printed as JSON;
//! datastore events go to the sink selected by `[logging]`.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use thiserror::Error;
use tuplevault_cli::TuplevaultConfig;
use tuplevault_core::CancellationToken;
use tuplevault_core::Datastore;
use tuplevault_core::QueryOptions;
use tuplevault_core::ReadWriteTransaction;
use tuplevault_core::RelationTuple;
use tuplevault_core::RelationshipMutation;
use tuplevault_core::RelationshipsFilter;
use tuplevault_core::Revision;
use tuplevault_core::SortOrder;
use tuplevault_store_sqlite::HEAD;
use tuplevault_store_sqlite::MigrateOptions;
use tuplevault_store_sqlite::RunMode;
use tuplevault_store_sqlite::SqliteDatastore;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "tuplevault", version, disable_help_subcommand = true)]
struct Cli {
    /// Datastore location settings.
    #[command(flatten)]
    location: StoreLocationArgs,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Datastore location inputs shared by every command.
#[derive(Args, Debug, Clone)]
struct StoreLocationArgs {
    /// Optional config file path (defaults to tuplevault.toml or env override).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Optional direct `SQLite` datastore path (overrides config).
    #[arg(long = "store-path", value_name = "PATH", global = true)]
    store_path: Option<PathBuf>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate the schema and seed the datastore.
    Migrate(MigrateCommand),
    /// Print the head revision.
    Head,
    /// Check that a revision names a committed transaction.
    CheckRevision(CheckRevisionCommand),
    /// Report whether the datastore is migrated and seeded.
    Ready,
    /// Print datastore statistics.
    Stats,
    /// Apply relationship mutations in one transaction.
    Write(WriteCommand),
    /// Query relationships at a revision.
    Query(QueryCommand),
}

/// Arguments for `migrate`.
#[derive(Args, Debug)]
struct MigrateCommand {
    /// Target migration version.
    #[arg(long, default_value = HEAD)]
    target: String,
    /// Override for the run timeout (ms).
    #[arg(long = "timeout-ms", value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Override for the backfill batch size.
    #[arg(long = "backfill-batch-size", value_name = "ROWS")]
    backfill_batch_size: Option<u64>,
    /// Report the plan without applying it.
    #[arg(long = "dry-run")]
    dry_run: bool,
}

/// Arguments for `check-revision`.
#[derive(Args, Debug)]
struct CheckRevisionCommand {
    /// Revision to check.
    revision: String,
}

/// Arguments for `write`.
#[derive(Args, Debug)]
struct WriteCommand {
    /// Tuple to create; fails if it is already live.
    #[arg(long, value_name = "TUPLE")]
    create: Vec<String>,
    /// Tuple to create or replace.
    #[arg(long, value_name = "TUPLE")]
    touch: Vec<String>,
    /// Tuple to delete.
    #[arg(long, value_name = "TUPLE")]
    delete: Vec<String>,
}

/// Arguments for `query`.
#[derive(Args, Debug)]
struct QueryCommand {
    /// Resource type to query.
    resource_type: String,
    /// Optional resource identifier.
    #[arg(long = "resource-id", value_name = "ID")]
    resource_id: Option<String>,
    /// Optional relation name.
    #[arg(long, value_name = "RELATION")]
    relation: Option<String>,
    /// Revision to read at (defaults to head).
    #[arg(long, value_name = "REVISION")]
    revision: Option<String>,
    /// Maximum number of tuples to print.
    #[arg(long, value_name = "N")]
    limit: Option<u64>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let config = resolve_config(&cli.location)?;
    let manual_migrate = matches!(cli.command, Commands::Migrate(_));
    let store = open_datastore(&config, manual_migrate)?;
    let result = match &cli.command {
        Commands::Migrate(command) => command_migrate(&store, &config, command),
        Commands::Head => command_head(&store),
        Commands::CheckRevision(command) => command_check_revision(&store, command),
        Commands::Ready => command_ready(&store),
        Commands::Stats => command_stats(&store),
        Commands::Write(command) => command_write(&store, command),
        Commands::Query(command) => command_query(&store, command),
    };
    close_datastore(&store)?;
    result
}

// ============================================================================
// SECTION: Datastore Wiring
// ============================================================================

/// Resolves the configuration for CLI operations.
fn resolve_config(location: &StoreLocationArgs) -> CliResult<TuplevaultConfig> {
    let Some(store_path) = &location.store_path else {
        return TuplevaultConfig::load(location.config.as_deref())
            .map_err(|err| CliError::new(format!("unable to load config: {err}")));
    };
    let mut config = match location.config.as_deref() {
        Some(path) => TuplevaultConfig::load(Some(path))
            .map_err(|err| CliError::new(format!("unable to load config: {err}")))?,
        None => TuplevaultConfig::for_store_path(store_path.clone()),
    };
    config.store.path.clone_from(store_path);
    config.validate().map_err(|err| CliError::new(format!("invalid config: {err}")))?;
    Ok(config)
}

/// Opens the datastore, optionally forcing migrations off.
fn open_datastore(config: &TuplevaultConfig, manual_migrate: bool) -> CliResult<SqliteDatastore> {
    let sink = config
        .logging
        .event_sink()
        .map_err(|err| CliError::new(format!("unable to configure logging: {err}")))?;
    let mut store_config = config.store.clone();
    if manual_migrate {
        store_config.auto_migrate = false;
    }
    SqliteDatastore::open(&store_config, sink)
        .map_err(|err| CliError::new(format!("unable to open datastore: {err}")))
}

/// Closes the datastore.
fn close_datastore(store: &SqliteDatastore) -> CliResult<()> {
    store.close().map_err(|err| CliError::new(format!("unable to close datastore: {err}")))
}

/// Parses a revision argument.
fn parse_revision(value: &str) -> CliResult<Revision> {
    value.parse::<Revision>().map_err(|err| CliError::new(err.to_string()))
}

/// Builds mutations from `write` arguments, in create/touch/delete order.
fn parse_mutations(command: &WriteCommand) -> CliResult<Vec<RelationshipMutation>> {
    let parse =
        |text: &str| RelationTuple::parse(text).map_err(|err| CliError::new(err.to_string()));
    let mut mutations = Vec::new();
    for text in &command.create {
        mutations.push(RelationshipMutation::create(parse(text.as_str())?));
    }
    for text in &command.touch {
        mutations.push(RelationshipMutation::touch(parse(text.as_str())?));
    }
    for text in &command.delete {
        mutations.push(RelationshipMutation::delete(parse(text.as_str())?));
    }
    Ok(mutations)
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Output for `migrate`.
#[derive(Serialize)]
struct MigrateOutput {
    /// Schema version before the run.
    from_version: String,
    /// Requested target.
    target: String,
    /// Versions applied (or planned, for a dry run).
    versions: Vec<String>,
    /// Whether the run only reported the plan.
    dry_run: bool,
}

/// Executes `migrate`; live runs that reach head also seed the datastore.
fn command_migrate(
    store: &SqliteDatastore,
    config: &TuplevaultConfig,
    command: &MigrateCommand,
) -> CliResult<ExitCode> {
    let from_version = schema_version(store)?;
    let mode = if command.dry_run { RunMode::DryRun } else { RunMode::LiveRun };
    let options = MigrateOptions {
        target: &command.target,
        timeout_ms: command.timeout_ms.unwrap_or(config.migrations.timeout_ms),
        backfill_batch_size: command
            .backfill_batch_size
            .unwrap_or(config.migrations.backfill_batch_size),
        mode,
    };
    let versions =
        store.migrate(options).map_err(|err| CliError::new(format!("migration failed: {err}")))?;
    let head = store
        .migrations()
        .head_revision()
        .map_err(|err| CliError::new(format!("migration failed: {err}")))?;
    if mode == RunMode::LiveRun && schema_version(store)? == head {
        store.seed().map_err(|err| CliError::new(format!("unable to seed datastore: {err}")))?;
    }
    write_json(&MigrateOutput {
        from_version,
        target: command.target.clone(),
        versions,
        dry_run: command.dry_run,
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Reads the current schema version.
fn schema_version(store: &SqliteDatastore) -> CliResult<String> {
    store
        .schema_version()
        .map_err(|err| CliError::new(format!("unable to read schema version: {err}")))
}

/// Executes `head`.
fn command_head(store: &SqliteDatastore) -> CliResult<ExitCode> {
    let revision = store
        .head_revision()
        .map_err(|err| CliError::new(format!("unable to load head revision: {err}")))?;
    write_stdout_line(&revision.to_string())?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `check-revision`.
fn command_check_revision(
    store: &SqliteDatastore,
    command: &CheckRevisionCommand,
) -> CliResult<ExitCode> {
    let revision = parse_revision(&command.revision)?;
    store.check_revision(revision).map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line(&format!("revision {revision} is valid"))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `ready`; exits non-zero when the datastore is not ready.
fn command_ready(store: &SqliteDatastore) -> CliResult<ExitCode> {
    let state = store
        .ready_state()
        .map_err(|err| CliError::new(format!("unable to check readiness: {err}")))?;
    write_json(&state)?;
    Ok(if state.is_ready { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Executes `stats`.
fn command_stats(store: &SqliteDatastore) -> CliResult<ExitCode> {
    let stats = store
        .statistics()
        .map_err(|err| CliError::new(format!("unable to compute statistics: {err}")))?;
    write_json(&stats)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `write`.
fn command_write(store: &SqliteDatastore, command: &WriteCommand) -> CliResult<ExitCode> {
    let mutations = parse_mutations(command)?;
    if mutations.is_empty() {
        return Err(CliError::new(
            "write requires at least one --create, --touch, or --delete".to_string(),
        ));
    }
    let revision = store
        .read_write_tx(&CancellationToken::new(), &mut |rwt: &mut dyn ReadWriteTransaction| {
            rwt.write_relationships(&mutations)
        })
        .map_err(|err| CliError::new(format!("write failed: {err}")))?;
    write_stdout_line(&revision.to_string())?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `query`.
fn command_query(store: &SqliteDatastore, command: &QueryCommand) -> CliResult<ExitCode> {
    let revision = match &command.revision {
        Some(value) => parse_revision(value)?,
        None => store
            .head_revision()
            .map_err(|err| CliError::new(format!("unable to load head revision: {err}")))?,
    };
    store.check_revision(revision).map_err(|err| CliError::new(err.to_string()))?;
    let mut filter = RelationshipsFilter::for_resource_type(command.resource_type.clone());
    filter.resource_ids = command.resource_id.iter().cloned().collect();
    filter.relation.clone_from(&command.relation);
    let options = QueryOptions {
        limit: command.limit,
        after: None,
        sort: SortOrder::ByResource,
    };
    let reader = store.snapshot_reader(revision, &CancellationToken::new());
    let tuples = reader
        .query_relationships(&filter, &options)
        .map_err(|err| CliError::new(format!("query failed: {err}")))?;
    for tuple in tuples {
        write_stdout_line(&tuple.to_string())?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("unable to serialize output: {err}")))?;
    write_stdout_line(&text)
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output stream failure.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("unable to write to {stream}: {error}")
}

/// Emits an error message and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
