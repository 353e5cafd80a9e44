//! Image resolution for job containers
//!
//! - Name expansion and allowlist checks
//! - Policy driven pulls with per-job memoization

mod allowed;
mod manager;

// Re-export traits
pub use manager::{PullManager, PullObserver};

// Re-export implementations
pub use allowed::{expand_image_name, verify_allowed_image};
pub use manager::DefaultPullManager;
