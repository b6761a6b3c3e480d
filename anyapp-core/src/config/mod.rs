//! Configuration types for the AnyApplication zone daemon
//!
//! # Architecture
//!
//! - [`Config`] - everything read from `config.yaml` at startup: runtime
//!   timings and zone id, API bind address, peers, logging, backends
//! - [`duration`] - `10s` / `1h30m` style durations used throughout the file
//! - [`get_sync_timeout`] - per-application sync timeout from `syncOptions`

pub mod duration;
mod paths;
mod zone_config;

pub use paths::{default_config_path, default_data_dir};
pub use zone_config::{
    get_sync_timeout, ApiConfig, ApplicationRuntimeConfig, CacheConfig, ChartsConfig,
    ClusterConfig, Config, LogLevel, LoggingConfig, PeerConfig, PeerSyncConfig, StoreConfig,
};
