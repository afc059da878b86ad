/// Configuration system for lineage-rag
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::{ConfigError, LineageError};
use crate::paths::PlatformPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where local checkouts and parsed artifacts live
    #[serde(default)]
    pub repositories: RepositoriesConfig,

    /// Git subprocess and upstream settings
    #[serde(default)]
    pub git: GitConfig,

    /// History tracing settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Derived index configuration
    #[serde(default)]
    pub vector_db: VectorDbConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Sync state persistence
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoriesConfig {
    /// Base directory holding one checkout per repository id
    #[serde(default = "default_repositories_path")]
    pub base_path: PathBuf,

    /// Root directory for parsed chunk artifacts
    #[serde(default = "default_parsed_path")]
    pub parsed_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Timeout applied to every git subprocess
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Remote to fetch from
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Upstream branch on that remote
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Encodings tried in order when decoding historical file contents.
    /// Labels follow the WHATWG encoding standard ("utf-8", "euc-kr", "windows-1252", ...).
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDbConfig {
    /// Backend: "lancedb" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// LanceDB data directory path
    #[serde(default = "default_lancedb_path")]
    pub lancedb_path: PathBuf,

    /// Table holding the chunk embeddings
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2", "BAAI/bge-small-en-v1.5")
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Batch size for embedding generation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout in seconds for one embedding batch
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Files re-embedded concurrently during a sync
    #[serde(default = "default_max_parallel_files")]
    pub max_parallel_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// JSON file holding per-repository sync state
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Directory for cross-process sync lock files
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

// Default value functions
fn default_repositories_path() -> PathBuf {
    PlatformPaths::default_repositories_path()
}

fn default_parsed_path() -> PathBuf {
    PlatformPaths::default_parsed_path()
}

fn default_command_timeout() -> u64 {
    300
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_encodings() -> Vec<String> {
    vec![
        "utf-8".to_string(),
        "euc-kr".to_string(),
        "windows-1252".to_string(),
    ]
}

fn default_db_backend() -> String {
    "lancedb".to_string()
}

fn default_lancedb_path() -> PathBuf {
    PlatformPaths::default_lancedb_path()
}

fn default_table_name() -> String {
    "code_chunks".to_string()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_max_parallel_files() -> usize {
    4
}

fn default_state_path() -> PathBuf {
    PlatformPaths::default_state_path()
}

fn default_lock_dir() -> PathBuf {
    PlatformPaths::default_lock_dir()
}

impl Default for RepositoriesConfig {
    fn default() -> Self {
        Self {
            base_path: default_repositories_path(),
            parsed_path: default_parsed_path(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            encodings: default_encodings(),
        }
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            lancedb_path: default_lancedb_path(),
            table_name: default_table_name(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            max_parallel_files: default_max_parallel_files(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            lock_dir: default_lock_dir(),
        }
    }
}

impl GitConfig {
    /// The remote-tracking ref the working copy is compared against
    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

impl Config {
    /// Build a config whose every on-disk location sits under `root`
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default();
        config.repositories.base_path = root.join("repositories");
        config.repositories.parsed_path = root.join("parsed_repositories");
        config.vector_db.lancedb_path = root.join("lancedb");
        config.state.state_path = root.join("sync_state.json");
        config.state.lock_dir = root.join("locks");
        config
    }

    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, LineageError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, LineageError> {
        let config_path = PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), LineageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), LineageError> {
        if self.vector_db.backend != "lancedb" && self.vector_db.backend != "memory" {
            return Err(invalid(
                "vector_db.backend",
                format!(
                    "must be 'lancedb' or 'memory', got '{}'",
                    self.vector_db.backend
                ),
            ));
        }

        if self.vector_db.table_name.trim().is_empty() {
            return Err(invalid("vector_db.table_name", "must not be empty"));
        }

        if self.git.command_timeout_secs == 0 {
            return Err(invalid("git.command_timeout_secs", "must be greater than 0"));
        }

        if self.git.remote.trim().is_empty() || self.git.branch.trim().is_empty() {
            return Err(invalid("git.remote/git.branch", "must not be empty"));
        }

        if self.history.encodings.is_empty() {
            return Err(invalid("history.encodings", "must list at least one encoding"));
        }

        for label in &self.history.encodings {
            if encoding_rs::Encoding::for_label(label.as_bytes()).is_none() {
                return Err(invalid(
                    "history.encodings",
                    format!("unknown encoding label '{}'", label),
                ));
            }
        }

        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size", "must be greater than 0"));
        }

        if self.embedding.timeout_secs == 0 {
            return Err(invalid("embedding.timeout_secs", "must be greater than 0"));
        }

        if self.embedding.max_parallel_files == 0 {
            return Err(invalid(
                "embedding.max_parallel_files",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LINEAGE_RAG_REPOSITORIES_PATH") {
            self.repositories.base_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("LINEAGE_RAG_PARSED_PATH") {
            self.repositories.parsed_path = PathBuf::from(path);
        }

        if let Ok(backend) = std::env::var("LINEAGE_RAG_DB_BACKEND") {
            self.vector_db.backend = backend;
        }

        if let Ok(path) = std::env::var("LINEAGE_RAG_LANCEDB_PATH") {
            self.vector_db.lancedb_path = PathBuf::from(path);
        }

        if let Ok(model) = std::env::var("LINEAGE_RAG_MODEL") {
            self.embedding.model_name = model;
        }

        if let Ok(batch_size) = std::env::var("LINEAGE_RAG_BATCH_SIZE")
            && let Ok(size) = batch_size.parse()
        {
            self.embedding.batch_size = size;
        }

        if let Ok(timeout) = std::env::var("LINEAGE_RAG_GIT_TIMEOUT")
            && let Ok(secs) = timeout.parse()
        {
            self.git.command_timeout_secs = secs;
        }

        if let Ok(remote) = std::env::var("LINEAGE_RAG_REMOTE") {
            self.git.remote = remote;
        }

        if let Ok(branch) = std::env::var("LINEAGE_RAG_BRANCH") {
            self.git.branch = branch;
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, LineageError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> LineageError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}
