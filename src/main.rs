use clap::{Parser, Subcommand, ValueEnum};
use lineage_rag::{ChangeRecord, Config, ConstructKind, ConstructQuery, LineRange, LineageClient, SyncOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser, Debug)]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "LINEAGE_RAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clone a repository into the managed base path
    Clone {
        url: String,
        /// Repository id (derived from the URL when omitted)
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a repository's checkout, parsed artifacts, index entries and sync state
    Delete { repo_id: String },
    /// Reparse and embed a whole repository
    Index { repo_id: String },
    /// Pull upstream changes and re-index the changed files
    Sync { repo_id: String },
    /// Show branch, HEAD, dirtiness and sync state
    Status { repo_id: String },
    /// Print the change history of a file or of one construct in it
    Trace {
        repo_id: String,
        path: String,
        /// Construct kind to track
        #[arg(long, value_enum, default_value_t = KindArg::Module)]
        kind: KindArg,
        /// Function or class name
        #[arg(long)]
        name: Option<String>,
        /// First line of a module range (1-based)
        #[arg(long, requires = "end")]
        start: Option<usize>,
        /// Last line of a module range (inclusive)
        #[arg(long, requires = "start")]
        end: Option<usize>,
        /// Emit records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Semantic search over the derived index
    Search {
        query: String,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Module,
    Function,
    Class,
}

impl From<KindArg> for ConstructKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Module => ConstructKind::Module,
            KindArg::Function => ConstructKind::Function,
            KindArg::Class => ConstructKind::Class,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> lineage_rag::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::new()?,
    };
    let client = LineageClient::with_config(config).await?;

    match cli.command {
        Command::Clone { url, name } => {
            let result = client.clone_repository(&url, name.as_deref()).await?;
            println!("Cloned {} into {} at {}", result.repo_id, result.path, result.head_commit);
        }
        Command::Delete { repo_id } => {
            let result = client.delete_repository(&repo_id).await?;
            println!(
                "Deleted {} ({}, {} index entries)",
                result.repo_id, result.path, result.entries_deleted
            );
        }
        Command::Index { repo_id } => {
            return Ok(print_outcome(&client.index_repository(&repo_id).await?));
        }
        Command::Sync { repo_id } => {
            return Ok(print_outcome(&client.run_sync(&repo_id).await?));
        }
        Command::Status { repo_id } => {
            let status = client.repository_status(&repo_id).await?;
            println!("repository: {}", status.repo_id);
            println!("branch:     {}", status.branch.as_deref().unwrap_or("(detached)"));
            println!("head:       {}", status.head_commit.as_deref().unwrap_or("(none)"));
            println!("dirty:      {}", status.is_dirty);
            println!("sync state: {}", status.sync_state);
        }
        Command::Trace {
            repo_id,
            path,
            kind,
            name,
            start,
            end,
            json,
        } => {
            let lines = match (start, end) {
                (Some(start), Some(end)) => Some(LineRange::new(start, end)?),
                _ => None,
            };
            let query = ConstructQuery {
                kind: kind.into(),
                name,
                lines,
            };
            let query = (query.kind != ConstructKind::Module || query.lines.is_some()).then_some(query);

            let history = client.trace_history(&repo_id, &path, query).await?;
            if json {
                let out = serde_json::to_string_pretty(&history)
                    .map_err(|e| lineage_rag::LineageError::other(e.to_string()))?;
                println!("{}", out);
            } else {
                print_history(&history);
            }
        }
        Command::Search { query, repo, limit } => {
            let results = client.search(repo.as_deref(), &query, limit).await?;
            for (i, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}/{}:{}-{} {} {}",
                    i + 1,
                    result.score,
                    result.repo_id,
                    result.file_path,
                    result.start_line,
                    result.end_line,
                    result.kind,
                    result.name
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(outcome: &SyncOutcome) -> ExitCode {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!(
                "{}: {} changed, {} entries deleted, {} files re-embedded ({} chunks) in {}ms",
                report.repo_id,
                report.changed_paths.len(),
                report.entries_deleted,
                report.files_reembedded,
                report.chunks_inserted,
                report.duration_ms
            );
            for path in &report.skipped_missing_artifacts {
                println!("  skipped (no parsed artifact): {}", path);
            }
            ExitCode::SUCCESS
        }
        SyncOutcome::Failed(failure) => {
            eprintln!("Sync failed during {}: {}", failure.step, failure.message);
            ExitCode::FAILURE
        }
    }
}

fn print_history(history: &[ChangeRecord]) {
    if history.is_empty() {
        println!("No changes found");
        return;
    }
    for record in history {
        println!(
            "commit {} ({}, {})",
            record.commit.short_hash(),
            record.commit.author_name,
            record.commit.formatted_date()
        );
        println!("    {}", record.commit.message.lines().next().unwrap_or(""));
        print!("{}", record.diff);
        println!();
    }
}
