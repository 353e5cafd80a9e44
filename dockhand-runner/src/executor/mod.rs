//! Job executors
//!
//! - `DockerExecutor` drives one job through prepare, run and cleanup
//! - `ExecutorRegistry` names the available executor variants

mod docker;
mod registry;
mod stage;
mod variant;

#[cfg(test)]
mod scenarios;

// Re-export implementations
pub use docker::{DEFAULT_CLEANUP_TIMEOUT, DEFAULT_HELPER_REVISION, EngineFactory, ExecutorCommand};
pub use registry::ExecutorRegistry;
