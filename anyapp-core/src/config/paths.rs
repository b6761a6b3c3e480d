//! Default path resolution for configuration and state files
//!
//! Uses XDG Base Directory specification when available, with sensible fallbacks.

use std::path::PathBuf;

/// Returns the default path for the zone daemon configuration file.
///
/// Uses XDG config directory if available:
/// - Linux/macOS: `~/.config/anyapp/config.yaml`
/// - Fallback: `/etc/anyapp/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("anyapp")
        .join("config.yaml")
}

/// Returns the default directory for persisted controller state.
///
/// Uses XDG data directory if available:
/// - Linux/macOS: `~/.local/share/anyapp`
/// - Fallback: `/var/lib/anyapp`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("anyapp")
}
