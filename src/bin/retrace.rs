//! # Retrace CLI - Version history for your files
//!
//! Command-line interface for the retrace version history engine.
//!
//! ## Usage
//! ```bash
//! # Track a folder (with exclusions) and a single file
//! retrace add ~/documents --exclude "*.tmp" --exclude "node_modules"
//! retrace add ~/notes.txt
//!
//! # Preserve changed content as new versions
//! retrace scan
//!
//! # Browse and restore history
//! retrace list
//! retrace history ~/notes.txt
//! retrace restore 42
//!
//! # Apply retention policy and reclaim orphaned blobs
//! retrace cleanup
//! ```

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use retrace::{
    format_bytes, Engine, EngineConfig, EngineEvent, ItemKind, RunOutcome, WatchedItem,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Retrace CLI - preserve and restore versions of tracked files
#[derive(Parser)]
#[command(name = "retrace")]
#[command(version)]
#[command(about = "Preserve deduplicated version history for tracked files and folders")]
struct Cli {
    /// Data directory (catalog, content store, config)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a file or folder
    Add {
        /// Path to track
        path: PathBuf,

        /// Exclusion patterns for folders (globs or substrings)
        #[arg(short, long = "exclude")]
        exclusions: Vec<String>,
    },

    /// Stop tracking a file or folder
    Remove {
        /// Tracked path to remove
        path: PathBuf,
    },

    /// List tracked items and known files
    #[command(alias = "ls")]
    List,

    /// Scan tracked items and preserve changed content
    Scan,

    /// Show the version history of a file
    History {
        /// Tracked file path
        path: PathBuf,
    },

    /// Print or export one version's content
    Show {
        /// Version id (see `history`)
        version: i64,

        /// Write content to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Restore a version over its original path
    ///
    /// The current content is preserved in history first.
    #[command(alias = "rs")]
    Restore {
        /// Version id (see `history`)
        version: i64,
    },

    /// Delete one or more versions
    Delete {
        /// Version ids to delete
        versions: Vec<i64>,
    },

    /// Drop a file and its whole history from the catalog
    Forget {
        /// Tracked file path
        path: PathBuf,
    },

    /// Apply retention policy and reclaim orphaned storage
    Cleanup,

    /// Show catalog and storage statistics
    Status,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("retrace=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("retrace=warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config_path = data_dir.join("config.json");

    match cli.command {
        Commands::Add { path, exclusions } => cmd_add(&config_path, path, exclusions),
        Commands::Remove { path } => cmd_remove(&config_path, path),
        Commands::List => cmd_list(&data_dir, &config_path),
        Commands::Scan => cmd_scan(&data_dir, &config_path),
        Commands::History { path } => cmd_history(&data_dir, &config_path, path),
        Commands::Show { version, output } => cmd_show(&data_dir, &config_path, version, output),
        Commands::Restore { version } => cmd_restore(&data_dir, &config_path, version),
        Commands::Delete { versions } => cmd_delete(&data_dir, &config_path, versions),
        Commands::Forget { path } => cmd_forget(&data_dir, &config_path, path),
        Commands::Cleanup => cmd_cleanup(&data_dir, &config_path),
        Commands::Status => cmd_status(&data_dir, &config_path),
    }
}

/// Default data directory: `$RETRACE_HOME`, else `~/.retrace`
fn default_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("RETRACE_HOME") {
        return PathBuf::from(home);
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .unwrap_or_else(|| ".".into());
    PathBuf::from(home).join(".retrace")
}

fn open_engine(
    data_dir: &Path,
    config_path: &Path,
) -> anyhow::Result<(std::sync::Arc<Engine>, Receiver<EngineEvent>)> {
    let config = EngineConfig::load(config_path);
    Engine::open(data_dir, config).context("opening the engine")
}

fn cmd_add(config_path: &Path, path: PathBuf, exclusions: Vec<String>) -> anyhow::Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("path {:?} does not exist", path))?;

    let item = if path.is_dir() {
        WatchedItem::folder(path.clone(), exclusions)
    } else {
        if !exclusions.is_empty() {
            bail!("exclusion patterns only apply to folders");
        }
        WatchedItem::file(path.clone())
    };

    let mut config = EngineConfig::load(config_path);
    if config.watched_items.iter().any(|i| i.path == item.path) {
        bail!("{} is already tracked", path.display());
    }
    config.watched_items.push(item);
    config.save(config_path)?;

    println!(
        "{} Now tracking {}",
        "✓".green().bold(),
        path.display().to_string().cyan()
    );
    println!(
        "  Run {} to preserve its current content",
        "retrace scan".yellow()
    );
    Ok(())
}

fn cmd_remove(config_path: &Path, path: PathBuf) -> anyhow::Result<()> {
    let path = path.canonicalize().unwrap_or(path);
    let mut config = EngineConfig::load(config_path);
    let before = config.watched_items.len();
    config.watched_items.retain(|i| i.path != path);
    if config.watched_items.len() == before {
        bail!("{} is not tracked", path.display());
    }
    config.save(config_path)?;

    println!(
        "{} No longer tracking {}",
        "✓".green().bold(),
        path.display().to_string().cyan()
    );
    println!(
        "  Its history stays until the next {}",
        "retrace cleanup".yellow()
    );
    Ok(())
}

fn cmd_list(data_dir: &Path, config_path: &Path) -> anyhow::Result<()> {
    let (engine, _events) = open_engine(data_dir, config_path)?;

    let items = engine.catalog().tracked_items()?;
    if items.is_empty() {
        println!("Nothing is tracked yet. Add something with {}", "retrace add <path>".yellow());
        engine.shutdown();
        return Ok(());
    }

    println!("{}", "Tracked items:".blue().bold());
    for item in &items {
        let kind = match item.kind {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        };
        print!("  {} {}", kind.dimmed(), item.path.display());
        if !item.exclusions.is_empty() {
            print!("  (excluding {})", item.exclusions.join(", ").dimmed());
        }
        println!();
    }

    let files = engine.catalog().list_files()?;
    if !files.is_empty() {
        println!("\n{}", "Files with history:".blue().bold());
        for file in files {
            let versions = engine.catalog().list_versions(file.id)?;
            println!(
                "  {} {} ({} versions)",
                format!("#{}", file.id).dimmed(),
                file.path.display(),
                versions.len()
            );
        }
    }
    engine.shutdown();
    Ok(())
}

fn cmd_scan(data_dir: &Path, config_path: &Path) -> anyhow::Result<()> {
    let (engine, events) = open_engine(data_dir, config_path)?;

    println!("{}", "Scanning tracked items...".blue().bold());
    engine.request_scan();

    let summary = loop {
        match events.recv_timeout(Duration::from_secs(3600)) {
            Ok(EngineEvent::FileTracked { path }) => {
                println!("  {} {}", "new".green(), path.display());
            }
            Ok(EngineEvent::VersionSaved { path, size }) => {
                println!(
                    "  {} {} ({})",
                    "saved".cyan(),
                    path.display(),
                    format_bytes(size)
                );
            }
            Ok(EngineEvent::ScanFinished(summary)) => break summary,
            Ok(_) => {}
            Err(_) => bail!("scan did not report a result"),
        }
    };
    engine.shutdown();

    match summary.outcome {
        RunOutcome::NothingToDo => println!("{}", "Nothing to scan.".yellow()),
        RunOutcome::Interrupted => println!("{}", "Scan interrupted.".yellow()),
        RunOutcome::Failed(reason) => bail!("scan failed: {}", reason),
        RunOutcome::Finished => {
            println!(
                "{} {} files examined, {} new, {} updated, {} stored in {}",
                "✓".green().bold(),
                summary.files_seen,
                summary.files_tracked,
                summary.versions_saved,
                format_bytes(summary.bytes_stored),
                format_duration(Duration::from_millis(summary.duration_ms))
            );
        }
    }
    for issue in &summary.issues {
        println!("  {} {}: {}", "!".yellow(), issue.path.display(), issue.message);
    }
    Ok(())
}

fn cmd_history(data_dir: &Path, config_path: &Path, path: PathBuf) -> anyhow::Result<()> {
    let (engine, _events) = open_engine(data_dir, config_path)?;
    let path = path.canonicalize().unwrap_or(path);

    let file = engine
        .catalog()
        .find_file(&path)?
        .ok_or_else(|| anyhow!("{} has no recorded history", path.display()))?;
    let versions = engine.catalog().list_versions(file.id)?;

    println!(
        "{} {}",
        "History of".blue().bold(),
        path.display().to_string().cyan()
    );
    for version in versions {
        let note = version
            .note
            .as_deref()
            .map(|n| format!(" [{}]", n))
            .unwrap_or_default();
        println!(
            "  {} {} ({}){}",
            format!("#{}", version.id).yellow(),
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(version.size),
            note.dimmed()
        );
    }
    engine.shutdown();
    Ok(())
}

fn cmd_show(
    data_dir: &Path,
    config_path: &Path,
    version: i64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (engine, _events) = open_engine(data_dir, config_path)?;

    match output {
        Some(dest) => {
            engine.export_version(version, &dest)?;
            println!(
                "{} Exported version #{} to {}",
                "✓".green().bold(),
                version,
                dest.display().to_string().cyan()
            );
        }
        None => {
            let bytes = engine.read_version(version)?;
            match String::from_utf8(bytes) {
                Ok(text) => print!("{}", text),
                Err(_) => bail!("version #{} is not valid text; use --output to export it", version),
            }
        }
    }
    engine.shutdown();
    Ok(())
}

fn cmd_restore(data_dir: &Path, config_path: &Path, version: i64) -> anyhow::Result<()> {
    let (engine, _events) = open_engine(data_dir, config_path)?;
    let path = engine.restore_version(version)?;
    println!(
        "{} Restored version #{} over {}",
        "✓".green().bold(),
        version,
        path.display().to_string().cyan()
    );
    println!("  The previous content was preserved in history first.");
    engine.shutdown();
    Ok(())
}

fn cmd_delete(data_dir: &Path, config_path: &Path, versions: Vec<i64>) -> anyhow::Result<()> {
    if versions.is_empty() {
        bail!("no version ids given");
    }
    let (engine, _events) = open_engine(data_dir, config_path)?;

    let outcome = engine.delete_versions(&versions);
    println!(
        "{} Deleted {} of {} versions",
        "✓".green().bold(),
        outcome.deleted,
        versions.len()
    );
    for path in &outcome.files_removed {
        println!("  {} {} left history entirely", "-".dimmed(), path.display());
    }
    for (id, reason) in &outcome.failures {
        println!("  {} #{}: {}", "!".yellow(), id, reason);
    }
    engine.shutdown();
    if !outcome.failures.is_empty() {
        bail!("{} deletions were refused", outcome.failures.len());
    }
    Ok(())
}

fn cmd_forget(data_dir: &Path, config_path: &Path, path: PathBuf) -> anyhow::Result<()> {
    let (engine, _events) = open_engine(data_dir, config_path)?;
    let path = path.canonicalize().unwrap_or(path);

    let file = engine
        .catalog()
        .find_file(&path)?
        .ok_or_else(|| anyhow!("{} has no recorded history", path.display()))?;
    let (path, versions) = engine.delete_file(file.id)?;

    println!(
        "{} Forgot {} ({} versions removed)",
        "✓".green().bold(),
        path.display().to_string().cyan(),
        versions
    );
    println!(
        "  Unreferenced blobs will be reclaimed by {}",
        "retrace cleanup".yellow()
    );
    engine.shutdown();
    Ok(())
}

fn cmd_cleanup(data_dir: &Path, config_path: &Path) -> anyhow::Result<()> {
    let (engine, events) = open_engine(data_dir, config_path)?;

    println!("{}", "Running cleanup sweep...".blue().bold());
    engine.request_cleanup();

    let summary = loop {
        match events.recv_timeout(Duration::from_secs(3600)) {
            Ok(EngineEvent::CleanupFinished(summary)) => break summary,
            Ok(_) => {}
            Err(_) => bail!("cleanup did not report a result"),
        }
    };
    engine.shutdown();

    match summary.outcome {
        RunOutcome::NothingToDo => println!("{}", "No files to delete.".yellow()),
        RunOutcome::Interrupted => println!("{}", "Cleanup interrupted.".yellow()),
        RunOutcome::Failed(reason) => bail!("cleanup failed: {}", reason),
        RunOutcome::Finished => {
            println!(
                "{} removed {} files and {} versions, pruned {} stale and {} unrecoverable, reclaimed {} blobs ({})",
                "✓".green().bold(),
                summary.files_removed,
                summary.versions_removed,
                summary.stale_versions_pruned,
                summary.unrecoverable_pruned,
                summary.blobs_reclaimed,
                format_bytes(summary.bytes_reclaimed)
            );
        }
    }
    for issue in &summary.issues {
        println!("  {} {}: {}", "!".yellow(), issue.path.display(), issue.message);
    }
    Ok(())
}

fn cmd_status(data_dir: &Path, config_path: &Path) -> anyhow::Result<()> {
    let (engine, _events) = open_engine(data_dir, config_path)?;

    let items = engine.catalog().tracked_items()?;
    let files = engine.catalog().list_files()?;
    let versions = engine.catalog().list_all_versions()?;
    let blob_hashes = engine.store().iter_hashes()?;
    let stored_bytes: u64 = blob_hashes
        .iter()
        .filter_map(|h| engine.store().blob_size(h))
        .sum();

    println!("{}", "Retrace status".blue().bold());
    println!("  Data directory: {}", data_dir.display().to_string().cyan());
    println!("  Tracked items:  {}", items.len());
    println!("  Known files:    {}", files.len());
    println!("  Versions:       {}", versions.len());
    println!(
        "  Content store:  {} blobs, {}",
        blob_hashes.len(),
        format_bytes(stored_bytes)
    );

    let config = engine.config();
    if config.retention.is_active() {
        let mut parts = Vec::new();
        if let Some(n) = config.retention.max_versions_per_file {
            parts.push(format!("keep {} versions per file", n));
        }
        if let Some(days) = config.retention.max_age_days {
            parts.push(format!("drop versions older than {} days", days));
        }
        println!("  Retention:      {}", parts.join(", "));
    } else {
        println!("  Retention:      keep everything");
    }
    engine.shutdown();
    Ok(())
}
