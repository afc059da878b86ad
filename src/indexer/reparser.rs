use super::chunker::{ParsedChunk, StructuralChunker};
use crate::error::{Result, SyncError};
use crate::git::TextDecoder;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Counts from one whole-tree reparse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReparseSummary {
    pub files: usize,
    pub chunks: usize,
}

/// Rebuilds the parsed-artifact tree for a repository.
///
/// Artifacts live at `<parsed_root>/<repo_id>/<relative path>.json`. Each
/// reparse writes a complete new tree into a staging directory and then
/// swaps it in, so artifacts of files that no longer exist disappear.
#[derive(Debug, Clone)]
pub struct Reparser {
    chunker: StructuralChunker,
    decoder: TextDecoder,
    parsed_root: PathBuf,
}

impl Reparser {
    pub fn new(chunker: StructuralChunker, decoder: TextDecoder, parsed_root: impl Into<PathBuf>) -> Self {
        Self {
            chunker,
            decoder,
            parsed_root: parsed_root.into(),
        }
    }

    pub fn artifact_dir(&self, repo_id: &str) -> PathBuf {
        self.parsed_root.join(repo_id)
    }

    pub fn artifact_path(&self, repo_id: &str, rel_path: &str) -> PathBuf {
        self.artifact_dir(repo_id).join(format!("{}.json", rel_path))
    }

    /// Source files of `repo_path` the chunker understands, relative and sorted
    pub fn source_files(&self, repo_path: &Path) -> Vec<String> {
        let walker = WalkBuilder::new(repo_path)
            .hidden(false)
            .git_ignore(true)
            .filter_entry(|entry| entry.file_name() != std::ffi::OsStr::new(".git"))
            .build();

        let mut files: Vec<String> = walker
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| self.chunker.language().handles(entry.path()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(repo_path)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }

    /// Reparse every source file in `repo_path` and replace the artifact tree.
    ///
    /// Blocking; runs chunking on the rayon pool.
    pub fn reparse_repository(&self, repo_id: &str, repo_path: &Path) -> Result<ReparseSummary> {
        let files = self.source_files(repo_path);
        tracing::info!("[{}] Reparsing {} source files", repo_id, files.len());
        self.reparse_files(repo_id, repo_path, &files)
    }

    /// Files that cannot be read or parsed are logged and get no artifact
    fn reparse_files(&self, repo_id: &str, repo_path: &Path, files: &[String]) -> Result<ReparseSummary> {
        let parsed: Vec<(String, Vec<ParsedChunk>)> = files
            .par_iter()
            .filter_map(|rel| match self.parse_file(repo_path, rel) {
                Ok(chunks) => Some((rel.clone(), chunks)),
                Err(e) => {
                    tracing::warn!("[{}] Skipping {}: {}", repo_id, rel, e);
                    None
                }
            })
            .collect();

        let staging = self.parsed_root.join(format!(".staging-{}", repo_id));
        remove_dir_if_exists(&staging)?;

        let mut summary = ReparseSummary::default();
        for (rel, chunks) in &parsed {
            let target = staging.join(format!("{}.json", rel));
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| artifact_err(parent, e))?;
            }
            let json = serde_json::to_vec_pretty(chunks)
                .map_err(|e| SyncError::ArtifactIo(format!("serialize {}: {}", rel, e)))?;
            std::fs::write(&target, json).map_err(|e| artifact_err(&target, e))?;

            summary.files += 1;
            summary.chunks += chunks.len();
        }
        std::fs::create_dir_all(&staging).map_err(|e| artifact_err(&staging, e))?;

        self.swap_in(repo_id, &staging)?;

        tracing::info!(
            "[{}] Reparsed {} files into {} chunks",
            repo_id,
            summary.files,
            summary.chunks
        );
        Ok(summary)
    }

    fn parse_file(&self, repo_path: &Path, rel: &str) -> Result<Vec<ParsedChunk>> {
        let bytes = std::fs::read(repo_path.join(rel))
            .map_err(|e| SyncError::ArtifactIo(format!("read {}: {}", rel, e)))?;
        let source = self.decoder.decode(&bytes);
        Ok(self.chunker.chunk(rel, &source)?)
    }

    fn swap_in(&self, repo_id: &str, staging: &Path) -> Result<()> {
        let live = self.artifact_dir(repo_id);
        let retired = self.parsed_root.join(format!(".retired-{}", repo_id));
        remove_dir_if_exists(&retired)?;

        if live.exists() {
            std::fs::rename(&live, &retired).map_err(|e| artifact_err(&live, e))?;
        }
        std::fs::rename(staging, &live).map_err(|e| artifact_err(staging, e))?;
        remove_dir_if_exists(&retired)?;
        Ok(())
    }

    /// Remove every artifact of `repo_id`
    pub fn remove_artifacts(&self, repo_id: &str) -> Result<()> {
        remove_dir_if_exists(&self.artifact_dir(repo_id))?;
        remove_dir_if_exists(&self.parsed_root.join(format!(".staging-{}", repo_id)))
    }

    /// Chunks stored for `rel_path`, or `None` when no artifact exists
    pub fn load_artifact(&self, repo_id: &str, rel_path: &str) -> Result<Option<Vec<ParsedChunk>>> {
        let path = self.artifact_path(repo_id, rel_path);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(artifact_err(&path, e).into()),
        };
        let chunks = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::ArtifactIo(format!("{}: {}", path.display(), e)))?;
        Ok(Some(chunks))
    }

    /// Relative source paths that currently have an artifact, sorted
    pub fn list_artifacts(&self, repo_id: &str) -> Result<Vec<String>> {
        let root = self.artifact_dir(repo_id);
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<String> = WalkBuilder::new(&root)
            .standard_filters(false)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let rel = entry.path().strip_prefix(&root).ok()?;
                let rel = rel.to_string_lossy().replace('\\', "/");
                rel.strip_suffix(".json").map(|s| s.to_string())
            })
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(artifact_err(path, e).into()),
    }
}

fn artifact_err(path: &Path, e: std::io::Error) -> SyncError {
    SyncError::ArtifactIo(format!("{}: {}", path.display(), e))
}
