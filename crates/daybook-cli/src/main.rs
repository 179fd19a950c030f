//! Daybook CLI - manage the local tracker and reconcile it with the
//! counterpart device.

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use daybook_core::{
    standard_registry, Record, Store, SyncError, SyncOptions, SyncOrchestrator, SyncSummary,
    SyncTransport, TiePreference, WriteOrigin,
};

#[derive(Parser)]
#[command(name = "daybook")]
#[command(about = "Personal tracker with two-device sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or update a record: daybook add notes content="buy milk"
    #[command(alias = "new")]
    Add {
        /// Target table
        table: String,
        /// Fields as name=value pairs
        fields: Vec<String>,
    },
    /// List records of a table, most recently updated first
    List {
        /// Target table
        table: String,
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record (and its cascade dependents) by uuid
    Delete {
        /// Target table
        table: String,
        /// Record uuid
        uuid: String,
    },
    /// Show the tombstone ledger
    Tombstones {
        /// Include tombstones already pushed to the counterpart
        #[arg(long)]
        all: bool,
    },
    /// Drop synced tombstones older than the retention window
    PruneTombstones {
        /// Retention window in days
        #[arg(long, default_value = "30")]
        older_than_days: i64,
    },
    /// Reconcile with the counterpart device
    Sync {
        /// Counterpart base URL, e.g. http://192.168.1.20:4617
        #[arg(long, value_name = "URL")]
        peer: Option<String>,
        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,
        /// How to settle conflicts with equal timestamps
        #[arg(long, value_enum, default_value_t = TieArg::Remote)]
        prefer: TieArg,
        /// Push pending tombstones before pulling
        #[arg(long)]
        push_first: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TieArg {
    Remote,
    Local,
    Merge,
}

impl From<TieArg> for TiePreference {
    fn from(arg: TieArg) -> Self {
        match arg {
            TieArg::Remote => Self::PreferRemote,
            TieArg::Local => Self::PreferLocal,
            TieArg::Merge => Self::MergeFields,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] daybook_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Fields must be given as name=value: {0:?}")]
    InvalidField(String),
    #[error("Invalid uuid: {0:?}")]
    InvalidUuid(String),
    #[error("No counterpart configured. Pass --peer or set DAYBOOK_PEER_URL.")]
    MissingPeer,
    #[error("Sync cancelled")]
    Cancelled,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let store = open_store(cli.db_path)?;

    match cli.command {
        Commands::Add { table, fields } => run_add(&store, &table, &fields),
        Commands::List { table, limit, json } => run_list(&store, &table, limit, json),
        Commands::Delete { table, uuid } => run_delete(&store, &table, &uuid),
        Commands::Tombstones { all } => run_tombstones(&store, all),
        Commands::PruneTombstones { older_than_days } => run_prune(&store, older_than_days),
        Commands::Sync {
            peer,
            yes,
            prefer,
            push_first,
        } => run_sync(store, peer, yes, prefer.into(), push_first).await,
    }
}

fn open_store(db_path: Option<PathBuf>) -> Result<Arc<Store>, CliError> {
    let path = db_path
        .or_else(|| env::var("DAYBOOK_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("daybook.db"));
    Ok(Arc::new(Store::open(path, Arc::new(standard_registry()))?))
}

fn run_add(store: &Store, table: &str, fields: &[String]) -> Result<(), CliError> {
    let mut record = Record::new();
    for field in fields {
        let (name, value) = parse_field(field)?;
        record.set(name, value);
    }

    let saved = store.table(table)?.upsert(record, WriteOrigin::Local)?;
    println!(
        "Saved {table} record {}",
        saved
            .uuid()
            .map_or_else(|| "<unknown>".to_string(), |uuid| uuid.to_string())
    );
    Ok(())
}

fn run_list(store: &Store, table: &str, limit: usize, json: bool) -> Result<(), CliError> {
    let rows = store.table(table)?.list()?;
    let shown: Vec<&Record> = rows.iter().take(limit).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    if shown.is_empty() {
        println!("No {table} records.");
        return Ok(());
    }
    for row in shown {
        println!("{}", render_row(row));
    }
    Ok(())
}

fn run_delete(store: &Store, table: &str, raw_uuid: &str) -> Result<(), CliError> {
    let uuid: Uuid = raw_uuid
        .parse()
        .map_err(|_| CliError::InvalidUuid(raw_uuid.to_string()))?;
    store.table(table)?.remove_by_uuid(&uuid)?;
    println!("Deleted {table} record {uuid}");
    Ok(())
}

fn run_tombstones(store: &Store, all: bool) -> Result<(), CliError> {
    let log = store.deletion_log();
    let entries = if all {
        log.list_all()?
    } else {
        log.list_unsynced()?
    };

    if entries.is_empty() {
        println!("No tombstones.");
        return Ok(());
    }
    for entry in entries {
        let state = if entry.synced { "synced" } else { "pending" };
        println!(
            "{}  {}  deletedAt={}  [{state}]",
            entry.table_name, entry.record_uuid, entry.deleted_at
        );
    }
    Ok(())
}

fn run_prune(store: &Store, older_than_days: i64) -> Result<(), CliError> {
    let cutoff = daybook_core::models::now_ms() - older_than_days * 86_400_000;
    let pruned = store.deletion_log().prune_synced(cutoff)?;
    println!("Pruned {pruned} synced tombstone(s) older than {older_than_days} day(s).");
    Ok(())
}

async fn run_sync(
    store: Arc<Store>,
    peer: Option<String>,
    yes: bool,
    tie: TiePreference,
    push_first: bool,
) -> Result<(), CliError> {
    let endpoint = peer
        .or_else(|| env::var("DAYBOOK_PEER_URL").ok())
        .ok_or(CliError::MissingPeer)?;

    tracing::info!(endpoint = %endpoint, "Starting sync session");
    let transport = SyncTransport::new(&endpoint).map_err(SyncError::Transport)?;
    let options = SyncOptions {
        tie,
        push_tombstones_first: push_first,
    };
    let orchestrator = SyncOrchestrator::new(store, transport, options);

    println!("Fetching snapshot from {endpoint} ...");
    let preview = orchestrator.prepare().await?;
    print!("{}", render_summary(&preview));

    if preview.is_noop() {
        orchestrator.cancel();
        println!("Nothing to apply; devices are in sync.");
        return Ok(());
    }

    if !yes && !confirm("Apply these changes? [y/N] ")? {
        orchestrator.cancel();
        return Err(CliError::Cancelled);
    }

    let summary = orchestrator.apply().await?;
    print_apply_outcome(&summary);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn parse_field(field: &str) -> Result<(String, Value), CliError> {
    let (name, raw) = field
        .split_once('=')
        .ok_or_else(|| CliError::InvalidField(field.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidField(field.to_string()));
    }
    Ok((name.to_string(), parse_value(raw)))
}

/// Interpret a raw CLI value: booleans and numbers are typed, everything
/// else stays a string
fn parse_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn render_row(row: &Record) -> String {
    let uuid = row
        .uuid()
        .map_or_else(|| "<no uuid>".to_string(), |uuid| uuid.to_string());
    let mut line = format!("{uuid}  updatedAt={}", row.updated_at().unwrap_or(0));
    for (name, value) in row.fields() {
        if matches!(name.as_str(), "id" | "uuid" | "createdAt" | "updatedAt") {
            continue;
        }
        line.push_str(&format!("  {name}={value}"));
    }
    line
}

fn render_summary(summary: &SyncSummary) -> String {
    let mut out = String::new();
    for (table, report) in &summary.tables {
        if report.changes.is_empty() && report.counts.failed == 0 {
            continue;
        }
        let counts = report.counts;
        out.push_str(&format!(
            "{table}: {} processed, {} new, {} updated, {} removed, {} failed\n",
            counts.processed,
            counts.created,
            counts.updated,
            report
                .changes
                .iter()
                .filter(|change| change.kind == daybook_core::ChangeKind::Removed)
                .count(),
            counts.failed,
        ));
    }
    if out.is_empty() {
        out.push_str("No changes.\n");
    }
    for error in &summary.errors {
        out.push_str(&format!(
            "row error in {}: {}\n",
            error.table, error.detail
        ));
    }
    for warning in &summary.client_errors {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}

fn print_apply_outcome(summary: &SyncSummary) {
    let totals = summary.totals();
    println!(
        "Applied: {} new, {} updated, {} skipped, {} failed.",
        totals.created, totals.updated, totals.skipped, totals.failed
    );
    for warning in &summary.client_errors {
        eprintln!("warning: {warning}");
    }
}

#[cfg(test)]
mod tests {
    use daybook_core::models::{Change, ChangeKind, TableCounts, TableReport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_field_splits_on_first_equals() {
        let (name, value) = parse_field("memo=lunch=12").unwrap();
        assert_eq!(name, "memo");
        assert_eq!(value, json!("lunch=12"));

        assert!(parse_field("no-separator").is_err());
        assert!(parse_field("=value").is_err());
    }

    #[test]
    fn parse_value_types_scalars() {
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("2.5"), json!(2.5));
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("buy milk"), json!("buy milk"));
    }

    #[test]
    fn tie_argument_maps_to_preference() {
        assert_eq!(TiePreference::from(TieArg::Remote), TiePreference::PreferRemote);
        assert_eq!(TiePreference::from(TieArg::Local), TiePreference::PreferLocal);
        assert_eq!(TiePreference::from(TieArg::Merge), TiePreference::MergeFields);
    }

    #[test]
    fn affirmative_answers_are_lenient() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
    }

    #[test]
    fn summary_rendering_reports_active_tables_only() {
        let mut summary = SyncSummary::default();
        summary
            .tables
            .insert("settings".to_string(), TableReport::default());
        summary.tables.insert(
            "notes".to_string(),
            TableReport {
                counts: TableCounts {
                    processed: 3,
                    created: 1,
                    updated: 1,
                    skipped: 0,
                    failed: 0,
                },
                changes: vec![
                    Change::new(ChangeKind::Added, Record::new()),
                    Change::new(ChangeKind::Modified, Record::new()),
                    Change::new(ChangeKind::Removed, Record::new()),
                ],
            },
        );

        let rendered = render_summary(&summary);
        assert!(rendered.contains("notes: 3 processed, 1 new, 1 updated, 1 removed, 0 failed"));
        assert!(!rendered.contains("settings"));
    }

    #[test]
    fn empty_summary_renders_no_changes() {
        let summary = SyncSummary::default();
        assert_eq!(render_summary(&summary), "No changes.\n");
    }

    #[test]
    fn add_and_list_round_trip_through_a_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path().join("cli.db"))).unwrap();

        run_add(
            &store,
            "notes",
            &["content=from the cli".to_string(), "pinned=true".to_string()],
        )
        .unwrap();

        let rows = store.table("notes").unwrap().list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("content"), Some(&json!("from the cli")));
        assert_eq!(rows[0].get("pinned"), Some(&json!(true)));
    }

    #[test]
    fn delete_requires_a_well_formed_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path().join("cli.db"))).unwrap();

        let result = run_delete(&store, "notes", "not-a-uuid");
        assert!(matches!(result, Err(CliError::InvalidUuid(_))));
    }
}
