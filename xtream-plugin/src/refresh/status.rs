//! Refresh state machine, status snapshot and progress reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress never reaches 1.0 until a refresh completes successfully.
pub(crate) const MAX_PROGRESS_BEFORE_COMPLETION: f64 = 0.99;

// Phase boundaries.
pub(crate) const CATEGORIES_END: f64 = 0.05;
pub(crate) const SERIES_LISTS_END: f64 = 0.15;
pub(crate) const PROCESSING_END: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Starting,
    FetchingCategories,
    FetchingSeriesLists,
    ProcessingSeriesParallel,
    Enrichment,
    Completed,
    Cancelled,
    Failed,
}

impl RefreshState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_running(self) -> bool {
        !self.is_terminal() && self != Self::Idle
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::FetchingCategories => "Fetching categories",
            Self::FetchingSeriesLists => "Fetching series lists",
            Self::ProcessingSeriesParallel => "Processing series",
            Self::Enrichment => "Enriching metadata",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RefreshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Counts reported when a refresh pass ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub categories: usize,
    pub series_total: usize,
    pub series_processed: usize,
    pub seasons: usize,
    pub episodes: usize,
    pub errors: usize,
    pub metadata_updated: usize,
    pub library_added: usize,
}

/// Snapshot polled by the configuration page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub is_refreshing: bool,
    /// Monotonic within one pass, in `[0, 1]`.
    pub progress: f64,
    pub phase: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RefreshSummary>,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            state: RefreshState::Idle,
            is_refreshing: false,
            progress: 0.0,
            phase: RefreshState::Idle.label().to_string(),
            started_at: None,
            completed_at: None,
            last_error: None,
            summary: None,
        }
    }
}

/// Receives progress updates.
///
/// Called while the status lock is held so updates arrive in order;
/// implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: f64, phase: &str);
}
