use crate::config::PluginConfig;

/// The slice of the host's task framework the plugin needs.
///
/// The host owns scheduling; the plugin only tells it when the refresh task's
/// settings changed and when channel contents should be re-read.
pub trait HostTaskScheduler: Send + Sync {
    /// Settings of the scheduled cache refresh changed; `enabled` mirrors
    /// `enable_series_caching`.
    fn refresh_settings_changed(&self, config: &PluginConfig, enabled: bool);

    /// Ask the host to re-read channel listings, e.g. after a cache
    /// invalidation.
    fn request_channel_refresh(&self);
}
