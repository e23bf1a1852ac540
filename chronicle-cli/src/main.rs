/*!
Chronicle CLI - Command-line interface for the Chronicle snapshot engine.

This CLI provides utilities for inspecting, comparing, capturing and restoring
snapshots of JSON documents stored in any of the bundled backends (memory,
file directory, SQLite database).
*/

use chronicle_core::{
    create_manager_from_config, ChronicleConfig, ChronicleError, DiffResult, DocumentSubject,
    EventType, ReportFormat, SnapshotFilter, SnapshotManager, SnapshotRecord, StorageConfig,
    StorageDriver,
};
use chrono::{Duration, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{error, info};

type Manager = SnapshotManager<Box<dyn StorageDriver>>;

#[derive(Parser)]
#[command(name = "chronicle")]
#[command(about = "CLI for the Chronicle snapshot engine")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Storage backend to use
    #[arg(short, long, global = true, value_enum, default_value = "disk")]
    storage: StorageType,

    /// Storage path (directory for disk, database file for sqlite)
    #[arg(short, long, global = true, env = "CHRONICLE_PATH")]
    path: Option<PathBuf>,

    /// JSON configuration file; overrides --storage and --path
    #[arg(short, long, global = true, env = "CHRONICLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StorageType {
    Memory,
    Disk,
    Sqlite,
}

#[derive(Subcommand)]
enum Commands {
    /// List snapshots, newest first
    List {
        /// Only snapshots of this subject type
        #[arg(short = 't', long = "type")]
        subject_type: Option<String>,
        /// Only snapshots of this subject id
        #[arg(long)]
        subject_id: Option<String>,
        /// Only snapshots carrying this label
        #[arg(short, long)]
        label: Option<String>,
        /// Maximum number of rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Show content hash and payload size
        #[arg(short, long)]
        detailed: bool,
    },
    /// Show details of a specific snapshot
    Show {
        /// Snapshot id or label
        snapshot: String,
        /// Print the stored payload
        #[arg(long)]
        payload: bool,
    },
    /// Compare two snapshots attribute by attribute
    Diff {
        /// Older snapshot id or label
        from: String,
        /// Newer snapshot id or label
        to: String,
        /// Print the raw diff as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture a JSON document as a new snapshot
    Capture {
        /// Path of the JSON document
        document: PathBuf,
        /// Subject type recorded with the snapshot
        #[arg(short = 't', long = "type")]
        subject_type: String,
        /// Label (defaults to manual-<timestamp>)
        #[arg(short, long)]
        label: Option<String>,
        /// Field holding the subject id
        #[arg(long, default_value = "id")]
        id_field: String,
        /// Tag the snapshot as scheduled instead of manual (requires --label)
        #[arg(long, requires = "label")]
        scheduled: bool,
    },
    /// Restore a JSON document from one of its snapshots
    Restore {
        /// Path of the JSON document to rewrite
        document: PathBuf,
        /// Snapshot id or label
        snapshot: String,
        /// Subject type of the document
        #[arg(short = 't', long = "type")]
        subject_type: String,
        /// Field holding the subject id
        #[arg(long, default_value = "id")]
        id_field: String,
        /// Do not capture an audit snapshot after restoring
        #[arg(long)]
        no_audit: bool,
    },
    /// Delete a snapshot
    Delete {
        /// Snapshot id or label
        snapshot: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Delete all snapshots, or all of one subject type
    Clear {
        #[arg(short = 't', long = "type")]
        subject_type: Option<String>,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Delete snapshots older than a number of days
    Purge {
        /// Age threshold in days (defaults to the configured retention)
        #[arg(short, long)]
        days: Option<u32>,
        #[arg(short = 't', long = "type")]
        subject_type: Option<String>,
    },
    /// Render a report of listed snapshots
    Report {
        /// html, json or csv
        #[arg(short, long, default_value = "html")]
        format: String,
        #[arg(short = 't', long = "type")]
        subject_type: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Tabled)]
struct SnapshotInfo {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    subject_type: String,
    #[tabled(rename = "Subject")]
    subject_id: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Created")]
    created: String,
}

#[derive(Tabled)]
struct DetailedSnapshotInfo {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    subject_type: String,
    #[tabled(rename = "Subject")]
    subject_id: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Change")]
    change: &'static str,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.log_json {
        chronicle_core::observability::init_observability(true)?;
    } else {
        init_logging(cli.verbose);
    }

    let config = build_config(&cli)?;
    let manager = create_manager_from_config(config)?;

    // Execute command
    match cli.command {
        Commands::List {
            subject_type,
            subject_id,
            label,
            limit,
            detailed,
        } => {
            let filter = SnapshotFilter {
                subject_type,
                subject_id,
                label,
                limit,
                ..SnapshotFilter::default()
            };
            list_snapshots(&manager, &filter, detailed)?
        }
        Commands::Show { snapshot, payload } => show_snapshot(&manager, &snapshot, payload)?,
        Commands::Diff { from, to, json } => diff_snapshots(&manager, &from, &to, json)?,
        Commands::Capture {
            document,
            subject_type,
            label,
            id_field,
            scheduled,
        } => capture_document(
            &manager,
            &document,
            &subject_type,
            &id_field,
            label.as_deref(),
            scheduled,
        )?,
        Commands::Restore {
            document,
            snapshot,
            subject_type,
            id_field,
            no_audit,
        } => restore_document(
            &manager,
            &document,
            &subject_type,
            &id_field,
            &snapshot,
            !no_audit,
        )?,
        Commands::Delete { snapshot, force } => delete_snapshot(&manager, &snapshot, force)?,
        Commands::Clear {
            subject_type,
            force,
        } => clear_snapshots(&manager, subject_type.as_deref(), force)?,
        Commands::Purge { days, subject_type } => {
            purge_snapshots(&manager, days, subject_type.as_deref())?
        }
        Commands::Report {
            format,
            subject_type,
            output,
        } => {
            let filter = SnapshotFilter {
                subject_type,
                ..SnapshotFilter::default()
            };
            write_report(&manager, &filter, &format, output.as_deref())?
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<ChronicleConfig, anyhow::Error> {
    if let Some(path) = &cli.config {
        return Ok(ChronicleConfig::from_json_file(path)?);
    }

    let storage = match cli.storage {
        StorageType::Memory => StorageConfig::memory(),
        StorageType::Disk => StorageConfig::file(
            cli.path
                .clone()
                .unwrap_or_else(|| PathBuf::from("./snapshots")),
        ),
        StorageType::Sqlite => StorageConfig::sqlite(
            cli.path
                .clone()
                .unwrap_or_else(|| PathBuf::from("./snapshots.db")),
        ),
    };
    let config = ChronicleConfig::default().with_storage(storage);
    config.validate()?;
    Ok(config)
}

fn list_snapshots(
    manager: &Manager,
    filter: &SnapshotFilter,
    detailed: bool,
) -> Result<(), anyhow::Error> {
    info!("Listing snapshots with {:?}", filter);
    let records = manager.list(filter)?;

    if records.is_empty() {
        println!("No snapshots found");
        return Ok(());
    }

    let table = if detailed {
        Table::new(records.iter().map(|r| DetailedSnapshotInfo {
            id: r.id.to_string(),
            subject_type: r.subject_type.clone(),
            subject_id: r.subject_id.clone(),
            label: r.label.clone(),
            event: r.event_type.to_string(),
            created: format_timestamp(r),
            size: format_size(r.payload.size_bytes() as u64),
            hash: r.content_hash.chars().take(12).collect(),
        }))
    } else {
        Table::new(records.iter().map(|r| SnapshotInfo {
            id: r.id.to_string(),
            subject_type: r.subject_type.clone(),
            subject_id: r.subject_id.clone(),
            label: r.label.clone(),
            event: r.event_type.to_string(),
            created: format_timestamp(r),
        }))
    };
    println!("{table}");
    Ok(())
}

fn show_snapshot(manager: &Manager, snapshot: &str, payload: bool) -> Result<(), anyhow::Error> {
    info!("Showing snapshot: {}", snapshot);

    let record = match manager.find(snapshot) {
        Ok(record) => record,
        Err(ChronicleError::IntegrityCheckFailed { expected, actual }) => {
            error!("✗ Integrity check failed:");
            error!("  Expected hash: {}", expected);
            error!("  Actual hash: {}", actual);
            return Err(anyhow::anyhow!("Integrity check failed"));
        }
        Err(e) => {
            error!("Failed to load snapshot: {}", e);
            return Err(e.into());
        }
    };

    println!("Snapshot Details:");
    println!("  ID: {}", record.id);
    println!("  Subject: {}#{}", record.subject_type, record.subject_id);
    println!("  Label: {}", record.label);
    println!("  Event: {}", record.event_type);
    println!("  Created: {}", format_timestamp(&record));
    println!("  Content Hash: {}", record.content_hash);
    println!("  Size: {}", format_size(record.payload.size_bytes() as u64));
    println!("  Attributes: {}", record.payload.attributes.len());
    if let Some(metadata) = &record.metadata {
        println!("  Metadata: {}", serde_json::to_string(metadata)?);
    }

    if payload {
        println!("{}", serde_json::to_string_pretty(&record.payload)?);
    }
    Ok(())
}

fn change_rows(result: &DiffResult) -> Vec<ChangeRow> {
    let mut rows = Vec::new();
    for (field, value) in &result.added {
        rows.push(ChangeRow {
            field: field.clone(),
            change: "added",
            from: String::new(),
            to: value.to_string(),
        });
    }
    for (field, change) in &result.modified {
        rows.push(ChangeRow {
            field: field.clone(),
            change: "modified",
            from: change.from.to_string(),
            to: change.to.to_string(),
        });
    }
    for (field, value) in &result.removed {
        rows.push(ChangeRow {
            field: field.clone(),
            change: "removed",
            from: value.to_string(),
            to: String::new(),
        });
    }
    rows.sort_by(|a, b| a.field.cmp(&b.field));
    rows
}

fn diff_snapshots(
    manager: &Manager,
    from: &str,
    to: &str,
    json: bool,
) -> Result<(), anyhow::Error> {
    let result = manager.compare(from, to)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.is_empty() {
        println!("No differences between {from} and {to}");
    } else {
        let summary = result.summary();
        println!("{}", Table::new(change_rows(&result)));
        println!(
            "{} added, {} modified, {} removed",
            summary.added, summary.modified, summary.removed
        );
    }
    Ok(())
}

fn open_document(
    path: &Path,
    subject_type: &str,
    id_field: &str,
) -> Result<DocumentSubject, anyhow::Error> {
    Ok(DocumentSubject::open(subject_type, path)?.with_id_field(id_field))
}

fn capture_document(
    manager: &Manager,
    document: &Path,
    subject_type: &str,
    id_field: &str,
    label: Option<&str>,
    scheduled: bool,
) -> Result<(), anyhow::Error> {
    let subject = open_document(document, subject_type, id_field)?;
    let record = match (scheduled, label) {
        (true, Some(label)) => manager.capture_scheduled(&subject, label)?,
        _ => manager.capture_manual(&subject, label)?,
    };
    println!(
        "✓ Captured snapshot {} ({}) for {}#{}",
        record.id, record.label, record.subject_type, record.subject_id
    );
    Ok(())
}

fn restore_document(
    manager: &Manager,
    document: &Path,
    subject_type: &str,
    id_field: &str,
    snapshot: &str,
    audit: bool,
) -> Result<(), anyhow::Error> {
    let mut subject = open_document(document, subject_type, id_field)?;
    let source = manager.find_for_subject(&subject, snapshot)?;

    if !manager.restore(&mut subject, snapshot)? {
        return Err(anyhow::anyhow!(
            "Restored state of {} could not be persisted",
            document.display()
        ));
    }
    println!("✓ Restored {} from snapshot {}", document.display(), source.id);

    if audit {
        let audit_record = capture_audit(manager, &subject, &source)?;
        println!("  Audit snapshot: {}", audit_record.id);
    }
    Ok(())
}

/// Record the post-restore state so the restore shows up in the subject's history
fn capture_audit(
    manager: &Manager,
    subject: &DocumentSubject,
    source: &SnapshotRecord,
) -> Result<SnapshotRecord, anyhow::Error> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("restored_from".to_string(), serde_json::json!(source.id));
    metadata.insert("restored_label".to_string(), serde_json::json!(source.label));
    let label = format!("restore-{}", source.id);
    Ok(manager.capture(subject, &label, EventType::Manual, Some(metadata))?)
}

fn confirm(prompt: &str) -> Result<bool, anyhow::Error> {
    print!("{prompt} (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase().starts_with('y'))
}

fn delete_snapshot(manager: &Manager, snapshot: &str, force: bool) -> Result<(), anyhow::Error> {
    if !force && !confirm(&format!("Are you sure you want to delete snapshot '{snapshot}'?"))? {
        println!("Deletion cancelled");
        return Ok(());
    }

    if manager.delete(snapshot)? {
        println!("✓ Snapshot deleted successfully");
        Ok(())
    } else {
        Err(anyhow::anyhow!("Snapshot '{snapshot}' not found"))
    }
}

fn clear_snapshots(
    manager: &Manager,
    subject_type: Option<&str>,
    force: bool,
) -> Result<(), anyhow::Error> {
    let scope = subject_type.map_or("ALL snapshots".to_string(), |t| format!("all {t} snapshots"));
    if !force && !confirm(&format!("Are you sure you want to delete {scope}?"))? {
        println!("Clear cancelled");
        return Ok(());
    }

    let removed = manager.clear(subject_type)?;
    println!("✓ Removed {removed} snapshot(s)");
    Ok(())
}

fn purge_snapshots(
    manager: &Manager,
    days: Option<u32>,
    subject_type: Option<&str>,
) -> Result<(), anyhow::Error> {
    let removed = match days {
        Some(days) => manager.purge(Utc::now() - Duration::days(i64::from(days)), subject_type)?,
        None if manager.config().retention.enabled => manager.purge_expired()?,
        None => {
            return Err(anyhow::anyhow!(
                "Retention is disabled in the configuration; pass --days"
            ))
        }
    };
    println!("✓ Purged {removed} expired snapshot(s)");
    Ok(())
}

fn write_report(
    manager: &Manager,
    filter: &SnapshotFilter,
    format: &str,
    output: Option<&Path>,
) -> Result<(), anyhow::Error> {
    let format: ReportFormat = format.parse()?;
    let report = manager.report(filter, format)?;

    match output {
        Some(path) => {
            std::fs::write(path, report)?;
            println!("✓ Wrote {format} report to {}", path.display());
        }
        None => print!("{report}"),
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(record: &SnapshotRecord) -> String {
    record
        .created_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("chronicle").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_build_config_defaults_to_disk() {
        let cli = parse(&["list"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.storage, StorageConfig::file("./snapshots"));
    }

    #[test]
    fn test_build_config_sqlite_with_path() {
        let cli = parse(&["--storage", "sqlite", "--path", "/tmp/x.db", "list"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.storage, StorageConfig::sqlite("/tmp/x.db"));
    }

    #[test]
    fn test_scheduled_capture_requires_label() {
        let args = ["chronicle", "capture", "doc.json", "--type", "User", "--scheduled"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_change_rows_are_sorted_by_field() {
        let mut result = DiffResult::default();
        result.added.insert("zip".to_string(), json!("9000"));
        result.removed.insert("age".to_string(), json!(30));
        result.modified.insert(
            "name".to_string(),
            chronicle_core::Change {
                from: json!("Al"),
                to: json!("Alice"),
            },
        );

        let rows = change_rows(&result);
        let fields: Vec<_> = rows.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(fields, vec!["age", "name", "zip"]);
        assert_eq!(rows[1].to, "\"Alice\"");
    }

    #[test]
    fn test_capture_and_restore_documents() {
        let temp_dir = TempDir::new().unwrap();
        let doc = temp_dir.path().join("user.json");
        std::fs::write(&doc, r#"{"id": 42, "name": "Alice", "age": 30}"#).unwrap();

        let config = ChronicleConfig::default()
            .with_storage(StorageConfig::file(temp_dir.path().join("snapshots")));
        let manager = create_manager_from_config(config).unwrap();

        capture_document(&manager, &doc, "app::User", "id", Some("v1"), false).unwrap();
        std::fs::write(&doc, r#"{"id": 42, "name": "Alice", "age": 99}"#).unwrap();

        restore_document(&manager, &doc, "app::User", "id", "v1", true).unwrap();
        let restored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&doc).unwrap()).unwrap();
        assert_eq!(restored["age"], json!(30));

        let history = manager.list(&SnapshotFilter::new()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].label, "restore-1");
        assert_eq!(
            history[0].metadata.as_ref().unwrap()["restored_from"],
            json!(1)
        );
    }

    #[test]
    fn test_restore_audit_points_at_own_lineage() {
        let temp_dir = TempDir::new().unwrap();
        let alice = temp_dir.path().join("alice.json");
        let bob = temp_dir.path().join("bob.json");
        std::fs::write(&alice, r#"{"id": 1, "name": "Alice"}"#).unwrap();
        std::fs::write(&bob, r#"{"id": 2, "name": "Bob"}"#).unwrap();

        let manager = create_manager_from_config(ChronicleConfig::default()).unwrap();
        capture_document(&manager, &alice, "app::User", "id", Some("v1"), false).unwrap();
        capture_document(&manager, &bob, "app::User", "id", Some("v1"), false).unwrap();

        restore_document(&manager, &alice, "app::User", "id", "v1", true).unwrap();
        let audit = manager.find("restore-1").unwrap();
        assert_eq!(audit.subject_id, "1");
        assert_eq!(audit.metadata.unwrap()["restored_from"], json!(1));
    }

    #[test]
    fn test_unknown_report_format_is_rejected() {
        let config = ChronicleConfig::default();
        let manager = create_manager_from_config(config).unwrap();
        let err = write_report(&manager, &SnapshotFilter::new(), "pdf", None).unwrap_err();
        assert!(err.to_string().contains("pdf"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
