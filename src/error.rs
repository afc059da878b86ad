/// Centralized error types for lineage-rag using thiserror
///
/// Provides domain-specific error types for history tracing and index synchronization.
use thiserror::Error;

/// Main error type for the lineage system
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector database error: {0}")]
    VectorDb(#[from] VectorDbError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to git repositories and git subprocesses
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Repository already exists: {0}")]
    RepoAlreadyExists(String),

    #[error("Failed to open git repository: {0}")]
    OpenFailed(String),

    #[error("Failed to read git object: {0}")]
    ReadFailed(String),

    #[error("Failed to iterate commits: {0}")]
    IterFailed(String),

    #[error("Failed to start `git {command}`: {reason}")]
    CommandSpawn { command: String, reason: String },

    #[error("`git {command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("`git {command}` timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    #[error("Unexpected git output: {0}")]
    UnexpectedOutput(String),
}

/// Errors related to structural lookups and chunk extraction
#[derive(Error, Debug)]
pub enum StructureError {
    #[error("Unsupported construct kind: {0}")]
    UnsupportedConstruct(String),

    #[error("Construct kind '{0}' requires a name")]
    MissingName(String),

    #[error("Invalid line range {start}..={end}")]
    InvalidLineRange { start: usize, end: usize },

    #[error("Failed to initialize parser: {0}")]
    LanguageInit(String),

    #[error("Failed to parse source: {0}")]
    ParseFailed(String),
}

/// Errors related to embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    InitializationFailed(String),

    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),

    #[error("Embedding generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),
}

/// Errors related to the derived index
#[derive(Error, Debug)]
pub enum VectorDbError {
    #[error("Failed to initialize vector database: {0}")]
    InitializationFailed(String),

    #[error("Failed to invalidate entries: {0}")]
    InvalidationFailed(String),

    #[error("Failed to insert entries: {0}")]
    InsertFailed(String),

    #[error("Failed to search embeddings: {0}")]
    SearchFailed(String),
}

/// Errors related to the sync pipeline
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Repository '{0}' is already syncing")]
    AlreadySyncing(String),

    #[error("Failed to access parsed artifacts: {0}")]
    ArtifactIo(String),

    #[error("Failed to persist sync state to '{path}': {reason}")]
    StatePersist { path: String, reason: String },

    #[error("Failed to acquire repository lock: {0}")]
    LockFailed(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors related to input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid repository id: {0}")]
    InvalidRepoId(String),

    #[error("Empty {0}")]
    Empty(String),
}

// Conversion from anyhow::Error to LineageError
impl From<anyhow::Error> for LineageError {
    fn from(err: anyhow::Error) -> Self {
        LineageError::Other(format!("{:#}", err))
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        GitError::ReadFailed(err.message().to_string())
    }
}

impl From<git2::Error> for LineageError {
    fn from(err: git2::Error) -> Self {
        LineageError::Git(err.into())
    }
}

/// Result alias used by the public operations of this crate
pub type Result<T, E = LineageError> = std::result::Result<T, E>;

impl LineageError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        LineageError::Other(msg.into())
    }

    /// Check if this is a caller error (validation, bad construct query) vs system error
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LineageError::Validation(_)
                | LineageError::Structure(StructureError::UnsupportedConstruct(_))
                | LineageError::Structure(StructureError::MissingName(_))
                | LineageError::Structure(StructureError::InvalidLineRange { .. })
                | LineageError::Sync(SyncError::AlreadySyncing(_))
                | LineageError::Config(ConfigError::InvalidValue { .. })
        )
    }

    /// Check if the caller may retry the same request later.
    ///
    /// Nothing here is retried automatically; a retry is always a new request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LineageError::Git(GitError::CommandTimeout { .. })
                | LineageError::Sync(SyncError::AlreadySyncing(_))
                | LineageError::Embedding(EmbeddingError::Timeout(_))
                | LineageError::Io(_)
        )
    }

    /// True when the repository id did not resolve to a local checkout
    pub fn is_repo_not_found(&self) -> bool {
        matches!(self, LineageError::Git(GitError::RepoNotFound(_)))
    }
}
