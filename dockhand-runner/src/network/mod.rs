//! Job networking

mod manager;

// Re-export traits
pub use manager::NetworkManager;

// Re-export implementations
pub use manager::{DefaultNetworkManager, is_user_defined, supports_links};
