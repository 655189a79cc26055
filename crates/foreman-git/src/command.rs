//! Git command execution abstraction

use async_trait::async_trait;
use foreman_core::{ForemanError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Output from a git command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl GitOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

impl From<Output> for GitOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// Trait for executing git commands (allows mocking in tests)
///
/// Commands run inside `dir`; one executor serves every project.
#[async_trait]
pub trait GitExecutor: Send + Sync {
    /// Execute `git <args>` with `dir` as the working directory
    async fn exec(&self, dir: &Path, args: &[&str]) -> Result<GitOutput>;
}

#[async_trait]
impl<E: GitExecutor + ?Sized> GitExecutor for Arc<E> {
    async fn exec(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        (**self).exec(dir, args).await
    }
}

/// Real git command executor
#[derive(Debug, Clone)]
pub struct GitCommand {
    program: PathBuf,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCommand {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl GitExecutor for GitCommand {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn exec(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        debug!("Executing git {:?}", args);

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| ForemanError::Git(format!("Failed to execute git: {}", e)))?;

        let git_output = GitOutput::from(output);

        if !git_output.success {
            debug!("git command failed: {}", git_output.stderr.trim());
        }

        Ok(git_output)
    }
}

/// Mock git executor for testing
///
/// Responses are keyed by the space-joined arguments. A key ending in `*`
/// matches any command starting with the text before it; the longest match
/// wins. Every executed command is recorded.
#[derive(Clone, Default)]
pub struct MockGitExecutor {
    responses: HashMap<String, GitOutput>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockGitExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, command: &str, output: GitOutput) -> Self {
        self.responses.insert(command.to_string(), output);
        self
    }

    /// Commands executed so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn lookup(&self, key: &str) -> Option<&GitOutput> {
        if let Some(output) = self.responses.get(key) {
            return Some(output);
        }

        self.responses
            .iter()
            .filter_map(|(pattern, output)| {
                let prefix = pattern.strip_suffix('*')?;
                key.starts_with(prefix).then_some((prefix.len(), output))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, output)| output)
    }
}

#[async_trait]
impl GitExecutor for MockGitExecutor {
    async fn exec(&self, _dir: &Path, args: &[&str]) -> Result<GitOutput> {
        let key = args.join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }

        self.lookup(&key)
            .cloned()
            .ok_or_else(|| ForemanError::Git(format!("No mock response for: {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_executor_exact_match() {
        let executor =
            MockGitExecutor::new().with_response("rev-parse HEAD", GitOutput::ok("abc123\n"));

        let output = executor
            .exec(Path::new("/repo"), &["rev-parse", "HEAD"])
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "abc123");
        assert_eq!(executor.calls(), vec!["rev-parse HEAD".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_executor_longest_prefix_wins() {
        let executor = MockGitExecutor::new()
            .with_response("worktree *", GitOutput::failed("generic"))
            .with_response("worktree add *", GitOutput::ok(""));

        let output = executor
            .exec(Path::new("/repo"), &["worktree", "add", "/tmp/wt", "-b", "x"])
            .await
            .unwrap();
        assert!(output.success);
    }

    #[tokio::test]
    async fn test_mock_executor_missing_response() {
        let executor = MockGitExecutor::new();
        let err = executor
            .exec(Path::new("/repo"), &["status"])
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::Git(_)));
    }
}
