//! # Retrace - Version history for tracked files
//!
//! A version history engine: it tracks a user-selected set of files and
//! folders and, on every observed change, preserves the previous content
//! as an immutable, deduplicated version addressed by its SHA-256 hash.
//! Versions can later be browsed, previewed, restored, or deleted.
//!
//! ## Architecture
//!
//! - **Content-Addressable Storage**: changed file content is stored once
//!   per distinct hash in a sharded object directory, so identical content
//!   across files and points in time shares one blob
//! - **Metadata Catalog**: a local SQLite database is the sole source of
//!   truth for tracked items, discovered files, and their versions; blob
//!   reference counting is always derived from it by query
//! - **Background Workers**: scanning and retention cleanup run on
//!   dedicated worker threads, one active run per job kind, cancellable
//!   between files and never mid-write
//! - **Notification Aggregation**: bursts of fine-grained worker events
//!   are coalesced per category over a debounce window into single
//!   human-readable messages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retrace::{Engine, EngineConfig, WatchedItem};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = EngineConfig::default();
//! config.watched_items.push(WatchedItem::folder(
//!     "/home/user/documents",
//!     vec!["*.tmp".to_string()],
//! ));
//!
//! let (engine, events) = Engine::open("/home/user/.retrace", config)?;
//!
//! // Sweep everything once; changed files get new versions.
//! engine.request_scan();
//!
//! // Events describe what happened; aggregate them for presentation.
//! for event in events.iter() {
//!     if let retrace::EngineEvent::ScanFinished(summary) = event {
//!         println!("scan ended: {:?}", summary.outcome);
//!         break;
//!     }
//! }
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency guarantees
//!
//! A version row is never committed without its blob already durably
//! written, and no partially written blob is ever observable under its
//! hash (writes land in a temp file and are renamed into place). Hash
//! verification gates every destructive operation: deleting a version
//! whose stored bytes disagree with its recorded hash is refused, never
//! silently resolved.
//!
//! ## Module organization
//!
//! - [`engine`]: supervising component and worker slots
//! - [`store`]: content-addressable blob storage
//! - [`catalog`]: the relational metadata catalog
//! - [`scanner`]: full and incremental scans
//! - [`cleaner`]: retention and orphan reclamation sweeps
//! - [`aggregator`]: notification debouncing and formatting
//! - [`watch`]: consumption of the external change-event stream
//! - [`config`]: injected configuration
//! - [`types`]: events, summaries, and catalog row types
//! - [`error`]: error taxonomy

pub mod aggregator;
pub mod cancel;
pub mod catalog;
pub mod cleaner;
pub mod config;
pub mod engine;
pub mod error;
pub mod scanner;
pub mod store;
pub mod types;
pub mod watch;

mod utils;

// Re-export main types for convenience
pub use aggregator::{AggregatedNotification, Aggregator, AggregatorCore, Category};
pub use cancel::CancelToken;
pub use catalog::Catalog;
pub use cleaner::RetentionCleaner;
pub use config::{EngineConfig, RetentionPolicy};
pub use engine::Engine;
pub use error::{Result, RetraceError};
pub use scanner::Scanner;
pub use store::ContentStore;
pub use types::*;
pub use utils::format_bytes;
