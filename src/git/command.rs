use crate::error::{GitError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs git subprocesses under a hard timeout.
///
/// A timed-out child is killed, and a non-zero exit becomes
/// `GitError::CommandFailed` carrying git's stderr verbatim.
#[derive(Debug, Clone)]
pub struct GitCommandRunner {
    timeout: Duration,
}

impl GitCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `git <args>` in `cwd` and return raw stdout
    pub async fn run(&self, cwd: &Path, args: &[&str]) -> Result<Vec<u8>> {
        let command = args.join(" ");
        tracing::debug!("Running `git {}` in {}", command, cwd.display());

        let child = Command::new("git")
            .args(args)
            .current_dir(cwd)
            // Never block on credential prompts
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GitError::CommandSpawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| GitError::CommandSpawn {
                command: command.clone(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                tracing::warn!(
                    "`git {}` exceeded {}s and was killed",
                    command,
                    self.timeout.as_secs()
                );
                return Err(GitError::CommandTimeout {
                    command,
                    secs: self.timeout.as_secs(),
                }
                .into());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stderr = if stderr.is_empty() {
                format!("exit status {}", output.status.code().unwrap_or(-1))
            } else {
                stderr
            };
            return Err(GitError::CommandFailed { command, stderr }.into());
        }

        Ok(output.stdout)
    }

    /// Run `git <args>` and return trimmed stdout as text
    pub async fn run_text(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let stdout = self.run(cwd, args).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}
