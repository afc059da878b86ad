use crate::error::StructureError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of construct whose history can be traced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    /// Whole module/file, optionally narrowed to a line range
    Module,
    Function,
    Class,
}

impl ConstructKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::Module => "module",
            ConstructKind::Function => "function",
            ConstructKind::Class => "class",
        }
    }

    /// Whether lookups of this kind need a declared name
    pub fn requires_name(&self) -> bool {
        !matches!(self, ConstructKind::Module)
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConstructKind {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "module" | "script" | "file" => Ok(ConstructKind::Module),
            "function" | "async_function" | "method" => Ok(ConstructKind::Function),
            "class" => Ok(ConstructKind::Class),
            other => Err(StructureError::UnsupportedConstruct(other.to_string())),
        }
    }
}

/// 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Result<Self, StructureError> {
        if start == 0 || start > end {
            return Err(StructureError::InvalidLineRange { start, end });
        }
        Ok(Self { start, end })
    }
}

/// What to look for inside one revision of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructQuery {
    pub kind: ConstructKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lines: Option<LineRange>,
}

impl ConstructQuery {
    pub fn module() -> Self {
        Self {
            kind: ConstructKind::Module,
            name: None,
            lines: None,
        }
    }

    pub fn module_lines(range: LineRange) -> Self {
        Self {
            kind: ConstructKind::Module,
            name: None,
            lines: Some(range),
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self {
            kind: ConstructKind::Function,
            name: Some(name.into()),
            lines: None,
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self {
            kind: ConstructKind::Class,
            name: Some(name.into()),
            lines: None,
        }
    }

    /// Reject queries that can never match: named kinds without a name,
    /// or an out-of-order line range.
    pub fn validate(&self) -> Result<(), StructureError> {
        if self.kind.requires_name()
            && self.name.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(StructureError::MissingName(self.kind.to_string()));
        }
        if let Some(range) = self.lines {
            LineRange::new(range.start, range.end)?;
        }
        Ok(())
    }
}

/// Immutable commit metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

impl CommitRef {
    pub fn short_hash(&self) -> &str {
        let end = self.hash.len().min(7);
        &self.hash[..end]
    }

    /// Commit time rendered as `YYYY-MM-DD HH:MM:SS` (UTC)
    pub fn formatted_date(&self) -> String {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp.to_string())
    }
}

/// One historical transition of a construct or file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub commit: CommitRef,
    /// Text before this commit; `None` marks creation
    pub before: Option<String>,
    /// Text after this commit; `None` marks deletion
    pub after: Option<String>,
    pub diff: String,
}

impl ChangeRecord {
    pub fn is_creation(&self) -> bool {
        self.before.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.after.is_none()
    }
}

/// Pipeline step labels recorded with failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Detect,
    Pull,
    Invalidate,
    Reparse,
    Embed,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Detect => "detect",
            SyncStep::Pull => "pull",
            SyncStep::Invalidate => "invalidate",
            SyncStep::Reparse => "reparse",
            SyncStep::Embed => "embed",
        }
    }

    /// State a repository is in while this step runs
    pub fn running_state(&self) -> SyncState {
        match self {
            SyncStep::Detect => SyncState::DetectingChanges,
            SyncStep::Pull => SyncState::Pulling,
            SyncStep::Invalidate => SyncState::Invalidating,
            SyncStep::Reparse => SyncState::Reparsing,
            SyncStep::Embed => SyncState::Embedding,
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-repository sync state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    DetectingChanges,
    Pulling,
    Invalidating,
    Reparsing,
    Embedding,
    Active,
    Error { step: SyncStep, message: String },
}

impl SyncState {
    /// True while a sync owns the repository
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SyncState::DetectingChanges
                | SyncState::Pulling
                | SyncState::Invalidating
                | SyncState::Reparsing
                | SyncState::Embedding
        )
    }

    /// The step a non-terminal state belongs to
    pub fn step(&self) -> Option<SyncStep> {
        match self {
            SyncState::DetectingChanges => Some(SyncStep::Detect),
            SyncState::Pulling => Some(SyncStep::Pull),
            SyncState::Invalidating => Some(SyncStep::Invalidate),
            SyncState::Reparsing => Some(SyncStep::Reparse),
            SyncState::Embedding => Some(SyncStep::Embed),
            SyncState::Error { step, .. } => Some(*step),
            SyncState::Idle | SyncState::Active => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => f.write_str("idle"),
            SyncState::DetectingChanges => f.write_str("detecting-changes"),
            SyncState::Pulling => f.write_str("pulling"),
            SyncState::Invalidating => f.write_str("invalidating"),
            SyncState::Reparsing => f.write_str("reparsing"),
            SyncState::Embedding => f.write_str("embedding"),
            SyncState::Active => f.write_str("active"),
            SyncState::Error { step, message } => write!(f, "error ({}): {}", step, message),
        }
    }
}

/// Counts reported by a completed sync or full index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub repo_id: String,
    /// Paths that differed from upstream (empty for a full index)
    pub changed_paths: Vec<String>,
    /// Paths whose entries were deleted in the invalidation batch
    pub paths_invalidated: usize,
    pub entries_deleted: usize,
    pub files_reparsed: usize,
    pub chunks_reparsed: usize,
    pub files_reembedded: usize,
    pub chunks_inserted: usize,
    /// Changed paths with no reparsed artifact (deleted or not parseable)
    #[serde(default)]
    pub skipped_missing_artifacts: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub step: SyncStep,
    pub message: String,
}

/// Terminal result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    Failed(SyncFailure),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AlreadySyncing,
}

/// Synchronous answer to a sync trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerResponse {
    Accepted,
    Rejected { reason: RejectReason },
}

/// Result of provisioning a new local checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneResult {
    pub repo_id: String,
    pub path: String,
    pub head_commit: String,
}

/// What `delete_repository` removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub repo_id: String,
    pub path: String,
    pub entries_deleted: usize,
}

/// Snapshot of a local checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub repo_id: String,
    /// `None` when HEAD is detached or unborn
    pub branch: Option<String>,
    pub head_commit: Option<String>,
    pub is_dirty: bool,
    pub sync_state: SyncState,
}

/// A single search result from the derived index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub repo_id: String,
    /// File path relative to the repository root
    pub file_path: String,
    pub kind: String,
    pub name: String,
    pub content: String,
    /// Similarity score (0.0 to 1.0)
    pub score: f32,
    pub start_line: usize,
    pub end_line: usize,
}
