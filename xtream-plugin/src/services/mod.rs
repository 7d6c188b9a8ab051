//! Service wiring and host integration.

mod container;
mod scheduler;

pub use container::{ServiceContainer, ServiceContainerBuilder, ServiceStats};
pub use scheduler::HostTaskScheduler;
