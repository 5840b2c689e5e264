//! Runtime policy, derived from configuration.

use std::time::Duration;
use tanko_config::{DEFAULT_STALENESS_SECS, DEFAULT_WINDOW_SIZE, PagesConfig, SyncConfig};

/// Chapter synchronization policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// How old the last successful sync may get before
    /// [`setup_data`](crate::ChapterSyncEngine::setup_data) refetches.
    pub staleness: Duration,
    /// Drop chapters that have no pages from merged lists.
    pub hide_empty_chapters: bool,
}
impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(DEFAULT_STALENESS_SECS),
            hide_empty_chapters: false,
        }
    }
}
impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            staleness: Duration::from_secs(config.staleness_secs),
            hide_empty_chapters: config.hide_empty_chapters,
        }
    }
}

/// Page loading policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    window_size: usize,
}
impl PageOptions {
    /// A zero window would never load anything; it's bumped to one.
    pub fn new(window_size: usize) -> Self {
        Self { window_size: window_size.max(1) }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}
impl Default for PageOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
impl From<&PagesConfig> for PageOptions {
    fn from(config: &PagesConfig) -> Self {
        Self::new(config.window_size)
    }
}
