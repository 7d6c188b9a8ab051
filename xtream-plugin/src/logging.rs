//! Logging bootstrap with a reloadable filter and local timestamps.
//!
//! The plugin lives inside a host process that may already own the global
//! subscriber. Installation then fails with an error instead of panicking and
//! events keep flowing to the host's subscriber.

use chrono::Local;
use tracing::info;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "xtream_plugin=info,restream_engine=info";

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle for changing the log filter at runtime.
pub struct LoggingConfig {
    handle: FilterHandle,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive, e.g. `xtream_plugin=debug`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::Other(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

/// Install the plugin's subscriber.
///
/// Returns an error when the host already installed a global subscriber.
pub fn init_logging() -> Result<LoggingConfig> {
    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(false).with_timer(LocalTimer))
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(LoggingConfig {
        handle: filter_handle,
    })
}

/// Available logging modules for the configuration page.
pub fn available_modules() -> Vec<(&'static str, &'static str)> {
    vec![
        ("xtream_plugin", "Catalog, caching and channels"),
        ("restream_engine", "Live stream relay"),
        ("reqwest", "HTTP requests"),
    ]
}
