//! Dockhand Core
//!
//! Domain types and pure logic for the Docker job executor.
//!
//! This crate contains:
//! - Image references and service-name splitting
//! - Volume spec parsers and OS path semantics (Linux and Windows)
//! - Registry auth resolution from job variables, docker config files and job credentials
//! - Resource labeling
//! - Job identity, variables, feature flags and runner settings
//!
//! Nothing in here talks to the container engine.

pub mod allowlist;
pub mod auth;
pub mod config;
pub mod image;
pub mod job;
pub mod labels;
pub mod variables;
pub mod volume;
