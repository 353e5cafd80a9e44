//! Job volumes

mod manager;

// Re-export traits
pub use manager::VolumeManager;

// Re-export implementations
pub use manager::{DefaultVolumeManager, VolumeManagerConfig};
