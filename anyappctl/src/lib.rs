//! AnyApplication CLI Library
//!
//! This library provides the core functionality for the `anyappctl` tool.
//!
//! # Public API
//!
//! The primary public API is the [`client::AnyAppClient`] which provides
//! programmatic access to a zone daemon. Configuration types are also
//! available via [`config::CliConfig`] and [`config::ConfigBuilder`].
//!
//! ```no_run
//! use anyappctl::client::AnyAppClient;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = AnyAppClient::with_config(
//!     "http://127.0.0.1:8090".to_string(),
//!     10,  // timeout in seconds
//!     3,   // max retries
//!     Duration::from_millis(500),  // initial retry delay
//! )?;
//!
//! for app in client.list_applications().await? {
//!     println!("{}/{}: {}", app.namespace, app.name, app.state);
//! }
//! # Ok(())
//! # }
//! ```

// Internal CLI implementation - not part of public API
#[doc(hidden)]
pub mod cli;

/// HTTP client for communicating with a zone daemon.
pub mod client;

/// Configuration types for the CLI tool.
pub mod config;

// Internal formatting functions - not part of public API
#[doc(hidden)]
pub mod format;

// In-process daemon stand-in, shared by unit and integration tests
#[doc(hidden)]
pub mod test_utils;
