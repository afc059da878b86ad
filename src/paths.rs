/// Centralized platform-specific path computation
///
/// Provides consistent default locations for checkouts, parsed artifacts,
/// the LanceDB store, sync state and lock files.
use std::path::PathBuf;

const APP_DIR: &str = "lineage-rag";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Get the appropriate data directory for the current platform
    ///
    /// - Windows: %LOCALAPPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_DATA_HOME or ~/.local/share
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the appropriate config directory for the current platform
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns: {data_dir}/lineage-rag
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(APP_DIR)
    }

    /// Returns: {config_dir}/lineage-rag
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(APP_DIR)
    }

    /// Local checkouts live here, one directory per repository id
    pub fn default_repositories_path() -> PathBuf {
        Self::project_data_dir().join("repositories")
    }

    /// Parsed chunk artifacts, mirrored per repository
    pub fn default_parsed_path() -> PathBuf {
        Self::project_data_dir().join("parsed_repositories")
    }

    pub fn default_lancedb_path() -> PathBuf {
        Self::project_data_dir().join("lancedb")
    }

    pub fn default_state_path() -> PathBuf {
        Self::project_data_dir().join("sync_state.json")
    }

    pub fn default_lock_dir() -> PathBuf {
        Self::project_data_dir().join("locks")
    }

    /// Returns: {config_dir}/lineage-rag/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }
}
