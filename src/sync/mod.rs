//! Incremental index synchronization
//!
//! A sync claims the repository through [`SyncStateStore::try_begin`], then
//! runs the [`SyncEngine`] pipeline with the returned [`SyncTicket`]. The
//! ticket records every step transition and the terminal state.

mod engine;
mod fs_lock;
mod state;

pub use engine::{EmbedSettings, SyncEngine};
pub use fs_lock::FsLockGuard;
pub use state::{RepoSyncRecord, SyncStateStore, SyncTicket};

#[cfg(test)]
mod tests;
