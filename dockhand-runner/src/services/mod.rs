//! Service containers
//!
//! - Creation on the job network under the service aliases
//! - Health checks through the helper image
//! - Log capture for unhealthy services and `CI_DEBUG_SERVICES`

mod health;
mod logs;
mod manager;
mod ports;

// Re-export traits
pub use manager::ServiceManager;

// Re-export implementations
pub use health::DEFAULT_LOG_DRAIN_DELAY;
pub use manager::{DefaultServiceManager, ServiceSetup, service_definitions};
