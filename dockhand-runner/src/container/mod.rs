//! Job containers
//!
//! - Creation of build and predefined containers
//! - Streaming a script through an attached container
//! - Host configuration shared with service containers

mod devices;
mod exec;
pub mod host_config;
mod manager;

// Re-export traits
pub use exec::Exec;
pub use manager::ContainerManager;

// Re-export implementations
pub use devices::{bind_devices, gpu_requests};
pub use exec::{DefaultExec, ExecStreams};
pub use manager::{
    ContainerKind, ContainerRequest, ContainerSetup, DefaultContainerManager, remove_container,
};
