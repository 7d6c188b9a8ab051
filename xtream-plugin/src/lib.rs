//! Xtream Codes IPTV provider integration for a media server.
//!
//! The host activates the plugin through a [`ServiceContainer`]. From there
//! it browses channels by opaque identifiers ([`identifier::ItemId`]), runs
//! the scheduled series cache refresh and opens shared live streams.
//!
//! ```no_run
//! use xtream_plugin::{PluginConfig, ServiceContainer};
//!
//! # async fn run() -> xtream_plugin::Result<()> {
//! let _logging = xtream_plugin::logging::init_logging()?;
//! let services = ServiceContainer::builder(PluginConfig {
//!     base_url: "http://provider.example:8080".into(),
//!     username: "user".into(),
//!     password: "secret".into(),
//!     ..Default::default()
//! })
//! .build()?;
//!
//! if let Some(summary) = services.run_scheduled_refresh().await? {
//!     println!("cached {} episodes", summary.episodes);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod error;
pub mod failure;
pub mod identifier;
pub mod live;
pub mod logging;
pub mod refresh;
pub mod retry;
pub mod services;
pub mod throttle;

pub use config::{ConfigHandle, PluginConfig};
pub use error::{Error, Result};
pub use services::ServiceContainer;
