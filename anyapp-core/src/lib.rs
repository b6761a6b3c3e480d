//! AnyApplication Core Library
//!
//! Shared types, models, and utilities for the AnyApplication controller.
//! This crate is used by the controller library, the zone daemon and the CLI.

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod quantity;
pub mod resource;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use config::{default_config_path, default_data_dir, get_sync_timeout, Config};
pub use error::*;
pub use health::{HealthStatus, HealthStatusCode};
pub use resource::{Resource, ResourceKey};
pub use types::*;
pub use version::{ChartVersion, SpecificVersion, VersionRange};
