//! notesync CLI
//!
//! Thin wrapper around notesync-core for command-line usage. The remote is a
//! shared directory, so two data directories pointed at the same
//! `--remote-dir` behave like two devices on one drive.
//!
//! ## Usage
//!
//! ```bash
//! # Create a note and give it content
//! notesync new --title "Groceries" --content "milk, eggs"
//!
//! # List notes (* marks unsynced changes)
//! notesync list
//!
//! # Edit a note by ID or exact title
//! notesync write Groceries "milk, eggs, bread"
//! notesync rename Groceries "Shopping"
//!
//! # Exchange changes with the remote
//! notesync sync
//!
//! # Show what is waiting to sync
//! notesync status
//! ```

mod dir_remote;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use notesync_core::{LocalId, Note, SyncConfig, SyncEngine, SyncReport};

use crate::dir_remote::DirRemote;

/// Config file looked up in the data directory
const CONFIG_FILE: &str = "notesync.json";

/// notesync - notes kept in sync with a drive folder
#[derive(Parser)]
#[command(name = "notesync")]
#[command(version = "0.1.0")]
#[command(about = "notesync - notes kept in sync with a drive folder")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.notesync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory acting as the remote drive (default: <data-dir>/remote)
    #[arg(short, long, global = true)]
    remote_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List notes
    List,

    /// Create a note
    New {
        /// Title (default: next free "Untitled")
        #[arg(short, long)]
        title: Option<String>,
        /// Initial content
        #[arg(short, long)]
        content: Option<String>,
    },

    /// Show a note and its content
    Show {
        /// Note ID (ULID) or exact title
        note: String,
    },

    /// Replace a note's content
    Write {
        /// Note ID (ULID) or exact title
        note: String,
        /// New content (read from stdin when omitted)
        text: Option<String>,
    },

    /// Rename a note
    Rename {
        /// Note ID (ULID) or exact title
        note: String,
        /// New title
        title: String,
    },

    /// Delete a note (removed remotely on the next sync)
    Delete {
        /// Note ID (ULID) or exact title
        note: String,
    },

    /// Push local changes and pull remote ones
    Sync,

    /// Reconcile with a full listing of the remote
    Refresh,

    /// Show pending changes and sync position
    Status,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.notesync)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".notesync")
}

/// Find a visible note by ULID or exact title
fn resolve_note(engine: &SyncEngine, s: &str) -> Result<Note> {
    if let Ok(id) = LocalId::from_string(s) {
        if let Some(note) = engine.get_note(&id) {
            return Ok(note);
        }
    }
    engine
        .visible_notes()
        .into_iter()
        .find(|n| n.title() == s)
        .ok_or_else(|| anyhow::anyhow!("No note with ID or title '{}'", s))
}

fn format_time(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn print_report(label: &str, report: &SyncReport) -> Result<()> {
    println!("{} complete: {}", label, report);
    for note in &report.changes.added {
        println!("  + {}", note.title());
    }
    for note in &report.changes.updated {
        println!("  ~ {}", note.title());
    }
    for note in &report.changes.deleted {
        println!("  - {}", note.title());
    }
    if report.is_clean() {
        return Ok(());
    }
    for error in &report.errors {
        let hint = if error.is_retryable() { "will retry" } else { "needs attention" };
        eprintln!("  error ({}): {}", hint, error);
    }
    anyhow::bail!("{} finished with {} error(s)", label, report.errors.len())
}

async fn open_engine(data_dir: &Path, remote_dir: &Path) -> Result<SyncEngine> {
    let mut config = SyncConfig::load_or_default(data_dir.join(CONFIG_FILE))?;
    let remote = Arc::new(DirRemote::open(remote_dir)?);
    config.resolve_remote_folder(remote.as_ref()).await?;
    Ok(SyncEngine::open(data_dir, remote, config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let remote_dir = cli.remote_dir.unwrap_or_else(|| data_dir.join("remote"));
    let engine = open_engine(&data_dir, &remote_dir).await?;

    match cli.command {
        Commands::List => {
            let notes = engine.visible_notes();
            if notes.is_empty() {
                println!("No notes.");
            } else {
                println!("Notes ({}):", notes.len());
                println!();
                for note in notes {
                    let marker = if note.is_dirty() { "*" } else { " " };
                    println!("  {} {} {}", marker, note.local_id(), note.title());
                }
            }
        }

        Commands::New { title, content } => {
            let note = engine.create_unique_note()?;
            let id = note.local_id();
            if let Some(title) = title {
                if let Err(e) = engine.update_title(&id, &title) {
                    engine.mark_deleted(&id)?;
                    return Err(e.into());
                }
            }
            if let Some(content) = content {
                engine.write_content(&id, &content)?;
            }
            let note = resolve_note(&engine, &id.to_string())?;
            println!("Created note: {}", note.title());
            println!("  ID: {}", id);
        }

        Commands::Show { note } => {
            let note = resolve_note(&engine, &note)?;
            println!("{}", note.title());
            println!("  ID: {}", note.local_id());
            match note.remote_id() {
                Some(remote_id) => println!("  Remote: {}", remote_id),
                None => println!("  Remote: (not pushed)"),
            }
            println!("  Modified: {}", format_time(note.modified_at()));
            println!("  Unsynced changes: {}", if note.is_dirty() { "yes" } else { "no" });
            println!();
            println!("{}", engine.read_content(&note.local_id())?);
        }

        Commands::Write { note, text } => {
            let note = resolve_note(&engine, &note)?;
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            if engine.write_content(&note.local_id(), &text)? {
                println!("Updated note: {}", note.title());
            } else {
                println!("No change: {}", note.title());
            }
        }

        Commands::Rename { note, title } => {
            let note = resolve_note(&engine, &note)?;
            if engine.update_title(&note.local_id(), &title)? {
                println!("Renamed: {} -> {}", note.title(), title.trim());
            } else {
                println!("No change: {}", note.title());
            }
        }

        Commands::Delete { note } => {
            let note = resolve_note(&engine, &note)?;
            engine.mark_deleted(&note.local_id())?;
            println!("Deleted note: {}", note.title());
        }

        Commands::Sync => {
            let report = engine.synchronize().await?;
            print_report("Sync", &report)?;
        }

        Commands::Refresh => {
            let report = engine.refresh_from_remote().await?;
            print_report("Refresh", &report)?;
        }

        Commands::Status => {
            let pending = engine.pending_counts();
            println!("notesync v0.1.0");
            println!();
            println!("Data directory: {}", data_dir.display());
            println!("Remote directory: {}", remote_dir.display());
            println!("Notes: {}", engine.visible_notes().len());
            println!("Pending push: {}", pending.push);
            println!("Pending purge: {}", pending.purge);
            match engine.cursor()? {
                Some(cursor) => println!("Cursor: {}", cursor),
                None => println!("Cursor: (never pulled)"),
            }
        }
    }

    Ok(())
}
