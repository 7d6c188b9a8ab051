//! Bulk series cache refresh and host library population.

mod orchestrator;
mod population;
mod status;

pub use orchestrator::{CacheRefreshOrchestrator, MetadataProvider};
pub use population::{
    FAST_PATH_SAMPLE_SIZE, FAST_PATH_THRESHOLD, HostLibraryStore, LibraryItem, LibraryPopulator,
    PopulationReport, expected_items,
};
pub use status::{ProgressSink, RefreshState, RefreshStatus, RefreshSummary};
