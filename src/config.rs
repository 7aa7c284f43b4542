//! Engine configuration
//!
//! The engine consumes configuration but does not own the decisions in it:
//! which items to watch, their exclusion patterns, and the retention
//! thresholds are all injected here. Settings persist as pretty-printed
//! JSON; an unreadable file logs a warning and falls back to defaults
//! rather than refusing to start.

use crate::error::Result;
use crate::types::WatchedItem;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Default debounce window for notification aggregation, in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

/// Retention thresholds applied by the cleaner
///
/// Both dimensions are optional; `None` disables that dimension. Retention
/// never removes a file's newest version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetentionPolicy {
    /// Keep at most this many versions per file (newest win)
    #[serde(default)]
    pub max_versions_per_file: Option<u32>,
    /// Remove versions older than this many days
    #[serde(default)]
    pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
    /// Whether the policy prunes anything at all
    pub fn is_active(&self) -> bool {
        self.max_versions_per_file.is_some() || self.max_age_days.is_some()
    }
}

/// User-facing engine settings, stored as `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Files and folders to track
    pub watched_items: Vec<WatchedItem>,
    /// Retention thresholds for the cleaner
    pub retention: RetentionPolicy,
    /// Notification aggregation window in milliseconds
    pub debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            watched_items: Vec::new(),
            retention: RetentionPolicy::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path`
    ///
    /// A missing file yields defaults (and is written out on the next
    /// save); a malformed file logs a warning and yields defaults, the
    /// same recovery the rest of the engine applies to non-fatal problems.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => {
                    debug!("loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("configuration at {:?} is unreadable ({}), using defaults", path, e);
                    EngineConfig::default()
                }
            },
            Err(_) => EngineConfig::default(),
        }
    }

    /// Persist configuration to `path` as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        debug!("saved configuration to {:?}", path);
        Ok(())
    }
}
