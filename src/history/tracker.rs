use super::diff::DiffRenderer;
use crate::error::Result;
use crate::git::RevisionStore;
use crate::indexer::StructuralLocator;
use crate::types::{ChangeRecord, CommitRef, ConstructQuery};

/// Reconstructs the change history of a file or of one construct inside it
pub struct HistoryTracker<S> {
    store: S,
    locator: StructuralLocator,
    renderer: DiffRenderer,
}

impl<S: RevisionStore> HistoryTracker<S> {
    pub fn new(store: S, locator: StructuralLocator) -> Self {
        Self {
            store,
            locator,
            renderer: DiffRenderer::new(),
        }
    }

    /// History of `path`, newest first.
    ///
    /// With no query the whole file is tracked. Otherwise every revision is
    /// reduced to the queried construct's text before comparing, so commits
    /// that leave the construct alone produce no record. The oldest revision
    /// yields a creation record (no "before" text) unless its text already
    /// appears as some record's "before".
    pub fn trace(&self, path: &str, query: Option<&ConstructQuery>) -> Result<Vec<ChangeRecord>> {
        if let Some(query) = query {
            query.validate()?;
        }

        let commits = self.store.commits_touching(path)?;
        if commits.is_empty() {
            tracing::info!("No commits touch {}", path);
            return Ok(Vec::new());
        }
        tracing::info!("Tracing {} across {} commits", path, commits.len());

        let reduced = commits
            .iter()
            .map(|commit| self.reduced_at(commit, path, query))
            .collect::<Result<Vec<_>>>()?;

        let mut history = Vec::new();
        for (i, pair) in reduced.windows(2).enumerate() {
            let (after, before) = (&pair[0], &pair[1]);
            let commit = &commits[i];

            if after == before {
                tracing::debug!("{}: no change to tracked text", commit.short_hash());
                continue;
            }

            tracing::debug!(
                "{}: {} -> {}",
                commit.short_hash(),
                presence(before),
                presence(after)
            );
            history.push(self.record(commit, before.clone(), after.clone()));
        }

        if let (Some(oldest_commit), Some(Some(oldest))) = (commits.last(), reduced.last()) {
            let already_seen = history
                .iter()
                .any(|record| record.before.as_deref() == Some(oldest.as_str()));
            if !already_seen {
                history.push(self.record(oldest_commit, None, Some(oldest.clone())));
            }
        }

        tracing::info!("{} change records for {}", history.len(), path);
        Ok(history)
    }

    fn reduced_at(&self, commit: &CommitRef, path: &str, query: Option<&ConstructQuery>) -> Result<Option<String>> {
        let Some(content) = self.store.content_at(&commit.hash, path)? else {
            return Ok(None);
        };
        match query {
            None => Ok(Some(content)),
            Some(query) => Ok(self.locator.find_span(&content, query)?),
        }
    }

    fn record(&self, commit: &CommitRef, before: Option<String>, after: Option<String>) -> ChangeRecord {
        let diff = self.renderer.render(
            before.as_deref().unwrap_or(""),
            after.as_deref().unwrap_or(""),
        );
        ChangeRecord {
            commit: commit.clone(),
            before,
            after,
            diff,
        }
    }
}

fn presence(value: &Option<String>) -> &'static str {
    if value.is_some() { "present" } else { "absent" }
}
