use crate::queue::DEFAULT_BATCH_SIZE;
use crate::retry::{RetryPolicy, DEFAULT_LEDGER_CAPACITY};
use crate::scoring::DEFAULT_SNIPPET_RADIUS;
use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR_NAME: &str = "transcript-search";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_RESULTS: usize = 100;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the index snapshot.
    pub data_dir: PathBuf,
    pub debounce: Duration,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub ledger_capacity: usize,
    pub max_results: usize,
    pub snippet_radius: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            debounce: DEFAULT_DEBOUNCE,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            max_results: DEFAULT_MAX_RESULTS,
            snippet_radius: DEFAULT_SNIPPET_RADIUS,
        }
    }
}

impl EngineConfig {
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }
}

/// Per-user application data directory, e.g. `~/.local/share/transcript-search`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}
