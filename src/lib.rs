//! # lineage-rag - construct-level git history and incremental re-indexing
//!
//! Two cooperating engines over local git checkouts:
//!
//! - **History**: reconstructs how a file, or a single function or class
//!   inside it, changed across commits. Each change comes back as a
//!   [`ChangeRecord`] with before/after text and a line-prefixed diff.
//! - **Index sync**: keeps a derived semantic index (parsed chunks plus
//!   embeddings) consistent with upstream through a staged pipeline:
//!   detect, pull, invalidate, reparse, embed.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌───────────────────┐
//!                   │   LineageClient   │  (library API / CLI)
//!                   └─────────┬─────────┘
//!           ┌─────────────────┼──────────────────┐
//!           │                 │                  │
//!  ┌────────▼────────┐ ┌──────▼──────┐  ┌────────▼────────┐
//!  │ HistoryTracker  │ │ SyncEngine  │  │ SyncStateStore  │
//!  │ (git2 + locator)│ │ (5 steps)   │  │ (JSON + flock)  │
//!  └─────────────────┘ └──────┬──────┘  └─────────────────┘
//!              ┌──────────────┼───────────────┐
//!        ┌─────▼─────┐  ┌─────▼─────┐  ┌──────▼──────┐
//!        │ git CLI   │  │ Reparser  │  │ FastEmbed + │
//!        │ fetch/ff  │  │ tree-sitter│ │ LanceDB     │
//!        └───────────┘  └───────────┘  └─────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```no_run
//! use lineage_rag::{Config, LineageClient, TriggerResponse};
//!
//! #[tokio::main]
//! async fn main() -> lineage_rag::Result<()> {
//!     let client = LineageClient::with_config(Config::new()?).await?;
//!
//!     match client.trigger_sync("demo").await? {
//!         TriggerResponse::Accepted => println!("sync started"),
//!         TriggerResponse::Rejected { reason } => println!("rejected: {:?}", reason),
//!     }
//!     println!("state: {}", client.sync_state("demo"));
//!     Ok(())
//! }
//! ```

/// Library client and composition root
pub mod client;

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding generation using FastEmbed, plus an offline hash embedder
pub mod embedding;

/// Error types and utilities
pub mod error;

/// Git access: revision reads, upstream change detection, clone and status
pub mod git;

/// Construct-level history tracing and diff rendering
pub mod history;

/// Structural parsing: construct lookup, chunking and parsed artifacts
pub mod indexer;

/// Platform-specific default locations
pub mod paths;

/// Sync state machine, persisted state and locking
pub mod sync;

/// Shared request/response and domain types
pub mod types;

/// Derived index abstraction (LanceDB and in-memory)
pub mod vector_db;

pub use client::LineageClient;
pub use config::Config;
pub use error::{LineageError, Result};
pub use types::{
    ChangeRecord, CloneResult, CommitRef, DeleteResult, ConstructKind, ConstructQuery, LineRange, RejectReason,
    RepositoryStatus, SearchResult, SyncOutcome, SyncReport, SyncState, SyncStep, TriggerResponse,
};
