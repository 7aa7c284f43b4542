//! Notification aggregation
//!
//! Background workers can emit many fine-grained events per second; one
//! "new version" event per file during a large scan would flood the user.
//! The aggregator buffers events per category over a short debounce window
//! and, when the window expires, emits one consolidated message. A new
//! event in a category restarts that category's window.
//!
//! Formatting is deterministic and lives in [`AggregatorCore`], which is
//! pure and directly testable; the timer plumbing is a thin thread around
//! it. Categories never merge: scan events and cleanup events always
//! produce separate summaries.

use crate::types::{EngineEvent, RunOutcome};
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default number of file names shown before "and N more"
pub const DEFAULT_DISPLAY_CAP: usize = 5;

/// Aggregation category; each has its own debounce window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Per-file scan events (files tracked, versions saved)
    ScanProgress,
    /// Cleanup sweep summaries
    CleanupProgress,
    /// Everything else worth telling the user
    Notice,
}

/// One consolidated message ready for presentation
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedNotification {
    /// Category the window belonged to
    pub category: Category,
    /// Consolidated human-readable message
    pub message: String,
    /// Number of events coalesced into this message
    pub count: usize,
}

/// Deterministic aggregation state: buffered messages per category
///
/// Window timing lives outside; this type only accumulates and formats.
pub struct AggregatorCore {
    display_cap: usize,
    pending: HashMap<Category, Vec<String>>,
}

impl AggregatorCore {
    /// Create a core with the given file-name display cap
    pub fn new(display_cap: usize) -> Self {
        AggregatorCore {
            display_cap,
            pending: HashMap::new(),
        }
    }

    /// Buffer one event message in its category's window
    pub fn push(&mut self, category: Category, message: String) {
        trace!("buffering {:?} event: {}", category, message);
        self.pending.entry(category).or_default().push(message);
    }

    /// Number of buffered messages in a category
    pub fn pending_count(&self, category: Category) -> usize {
        self.pending.get(&category).map_or(0, Vec::len)
    }

    /// Close a category's window and produce its consolidated message
    ///
    /// Returns `None` if the window was empty. The window state resets:
    /// the next event in this category starts a new window.
    pub fn flush(&mut self, category: Category) -> Option<AggregatedNotification> {
        let messages = self.pending.remove(&category)?;
        if messages.is_empty() {
            return None;
        }
        let count = messages.len();
        let message = match category {
            Category::ScanProgress => Self::format_names(&messages, self.display_cap),
            Category::CleanupProgress | Category::Notice => Self::format_generic(&messages),
        };
        debug!("flushing {:?} window with {} events", category, count);
        Some(AggregatedNotification {
            category,
            message,
            count,
        })
    }

    /// Flush every non-empty window (shutdown path)
    pub fn flush_all(&mut self) -> Vec<AggregatedNotification> {
        [
            Category::ScanProgress,
            Category::CleanupProgress,
            Category::Notice,
        ]
        .into_iter()
        .filter_map(|category| self.flush(category))
        .collect()
    }

    /// Scan window: all names when N is at most the cap, otherwise the
    /// first cap names followed by "and N-cap more".
    fn format_names(names: &[String], cap: usize) -> String {
        if names.len() <= cap {
            names.join(", ")
        } else {
            format!("{} and {} more", names[..cap].join(", "), names.len() - cap)
        }
    }

    /// Generic window: a single message shown bare, otherwise the first
    /// message followed by the count of the rest.
    fn format_generic(messages: &[String]) -> String {
        match messages {
            [single] => single.clone(),
            [first, rest @ ..] => {
                format!("{} (and {} more notifications)", first, rest.len())
            }
            [] => String::new(),
        }
    }
}

/// Map an engine event onto its aggregation category and display text
///
/// Events with no user-facing representation (run starts, uneventful scan
/// completions) return `None`.
pub fn route(event: &EngineEvent) -> Option<(Category, String)> {
    match event {
        EngineEvent::FileTracked { path } => {
            Some((Category::ScanProgress, display_name(path)))
        }
        EngineEvent::VersionSaved { path, .. } => {
            Some((Category::ScanProgress, display_name(path)))
        }
        EngineEvent::ScanFinished(summary) => match &summary.outcome {
            RunOutcome::NothingToDo => Some((Category::Notice, "Nothing to scan".to_string())),
            RunOutcome::Interrupted => Some((Category::Notice, "Scan interrupted".to_string())),
            RunOutcome::Failed(reason) => {
                Some((Category::Notice, format!("Scan failed: {}", reason)))
            }
            RunOutcome::Finished => None,
        },
        EngineEvent::CleanupFinished(summary) => {
            let message = match &summary.outcome {
                RunOutcome::NothingToDo => "No files to delete".to_string(),
                RunOutcome::Interrupted => "Cleanup interrupted".to_string(),
                RunOutcome::Failed(reason) => format!("Cleanup failed: {}", reason),
                RunOutcome::Finished => {
                    let versions = summary.versions_removed
                        + summary.stale_versions_pruned
                        + summary.unrecoverable_pruned;
                    format!(
                        "Removed {} files and {} versions, reclaimed {} blobs",
                        summary.files_removed, versions, summary.blobs_reclaimed
                    )
                }
            };
            Some((Category::CleanupProgress, message))
        }
        EngineEvent::VersionRestored { path } => {
            Some((Category::Notice, format!("Restored {}", display_name(path))))
        }
        EngineEvent::VersionDeleted { path, .. } => Some((
            Category::Notice,
            format!("Deleted a version of {}", display_name(path)),
        )),
        EngineEvent::FilesForgotten { paths } => Some((
            Category::Notice,
            format!("Removed {} files from history", paths.len()),
        )),
        EngineEvent::Notice { message } => Some((Category::Notice, message.clone())),
        EngineEvent::ScanStarted | EngineEvent::CleanupStarted => None,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Debounce-driven aggregator thread
///
/// Feed it `(Category, String)` pairs (usually via [`route`]); it emits
/// [`AggregatedNotification`]s on the receiver returned by [`spawn`].
/// Dropping the aggregator flushes whatever is still buffered.
///
/// [`spawn`]: Aggregator::spawn
pub struct Aggregator {
    input: Option<Sender<(Category, String)>>,
    handle: Option<JoinHandle<()>>,
}

impl Aggregator {
    /// Start the aggregation thread with the given debounce window
    pub fn spawn(
        window: Duration,
        display_cap: usize,
    ) -> (Aggregator, Receiver<AggregatedNotification>) {
        let (input_tx, input_rx) = mpsc::channel();
        let (output_tx, output_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("retrace-aggregator".to_string())
            .spawn(move || Self::run(input_rx, output_tx, window, display_cap))
            .expect("spawning the aggregator thread");
        (
            Aggregator {
                input: Some(input_tx),
                handle: Some(handle),
            },
            output_rx,
        )
    }

    /// A cloneable handle for feeding events into the aggregator
    ///
    /// The aggregation thread runs until this aggregator and every clone
    /// of its sender are dropped.
    pub fn sender(&self) -> Sender<(Category, String)> {
        self.input.as_ref().expect("aggregator is running").clone()
    }

    /// Buffer one event
    pub fn push(&self, category: Category, message: String) {
        if let Some(input) = &self.input {
            let _ = input.send((category, message));
        }
    }

    fn run(
        input: Receiver<(Category, String)>,
        output: Sender<AggregatedNotification>,
        window: Duration,
        display_cap: usize,
    ) {
        let mut core = AggregatorCore::new(display_cap);
        let mut deadlines: HashMap<Category, Instant> = HashMap::new();

        loop {
            let received = if deadlines.is_empty() {
                input.recv().map_err(|_| RecvTimeoutError::Disconnected)
            } else {
                let next = deadlines.values().min().copied().unwrap();
                input.recv_timeout(next.saturating_duration_since(Instant::now()))
            };

            match received {
                Ok((category, message)) => {
                    core.push(category, message);
                    // Restart this category's window.
                    deadlines.insert(category, Instant::now() + window);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    let due: Vec<Category> = deadlines
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(category, _)| *category)
                        .collect();
                    for category in due {
                        deadlines.remove(&category);
                        if let Some(notification) = core.flush(category) {
                            let _ = output.send(notification);
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for notification in core.flush_all() {
                        let _ = output.send(notification);
                    }
                    break;
                }
            }
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.input.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
