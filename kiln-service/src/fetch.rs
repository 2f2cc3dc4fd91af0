// Source Fetch
// Populates a workspace with the checked-out tree of one commit

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Errors from fetching a source tree
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{message}: {details}")]
    Command { message: String, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Populates `destination` with the tree of `commit`
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        clone_url: &str,
        destination: &Path,
        commit: &str,
        branch: Option<&str>,
    ) -> Result<(), FetchError>;
}

/// Fetches sources with the `git` command line client
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git_binary: String,
    token: Option<String>,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GitFetcher {
    pub fn new() -> Self {
        Self {
            git_binary: "git".to_string(),
            token: None,
        }
    }

    /// Authenticate https clones with an access token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_binary(mut self, git_binary: impl Into<String>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    /// Build the `git clone` argument list
    pub fn clone_args(&self, clone_url: &str, destination: &Path, branch: Option<&str>) -> Vec<String> {
        let mut args = vec!["clone".to_string(), "--no-checkout".to_string()];
        if let Some(branch) = branch.filter(|b| !b.is_empty()) {
            args.push("--branch".to_string());
            args.push(branch.to_string());
        }
        args.push(self.authenticated_url(clone_url));
        args.push(destination.to_string_lossy().to_string());
        args
    }

    /// Insert the token into credential-free https URLs
    pub fn authenticated_url(&self, clone_url: &str) -> String {
        match (&self.token, clone_url.strip_prefix("https://")) {
            (Some(token), Some(rest)) if !clone_url.contains('@') => {
                format!("https://{}@{}", token, rest)
            }
            _ => clone_url.to_string(),
        }
    }

    fn mask(&self, text: &str) -> String {
        let text = text.trim();
        match &self.token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }

    async fn run_git(&self, args: &[String], message: &str) -> Result<(), FetchError> {
        let output = Command::new(&self.git_binary)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stdout = self.mask(&String::from_utf8_lossy(&output.stdout));
        let stderr = self.mask(&String::from_utf8_lossy(&output.stderr));
        let details = [stdout, stderr]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        Err(FetchError::Command {
            message: message.to_string(),
            details,
        })
    }
}

#[async_trait::async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        clone_url: &str,
        destination: &Path,
        commit: &str,
        branch: Option<&str>,
    ) -> Result<(), FetchError> {
        match tokio::fs::remove_dir_all(destination).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(url = clone_url, destination = %destination.display(), "Cloning repository");
        let clone = self.clone_args(clone_url, destination, branch);
        self.run_git(&clone, "Failed to clone repository").await?;

        info!(commit, "Checking out commit");
        let checkout = vec![
            "-C".to_string(),
            destination.to_string_lossy().to_string(),
            "checkout".to_string(),
            commit.to_string(),
        ];
        self.run_git(&checkout, "Failed to checkout commit").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_args_with_branch() {
        let fetcher = GitFetcher::new();
        let args = fetcher.clone_args("https://example.com/a/b.git", Path::new("/tmp/ws"), Some("main"));
        assert_eq!(
            args,
            vec![
                "clone",
                "--no-checkout",
                "--branch",
                "main",
                "https://example.com/a/b.git",
                "/tmp/ws"
            ]
        );
    }

    #[test]
    fn test_clone_args_without_branch() {
        let fetcher = GitFetcher::new();
        let args = fetcher.clone_args("https://example.com/a/b.git", Path::new("/tmp/ws"), None);
        assert!(!args.contains(&"--branch".to_string()));
    }

    #[test]
    fn test_token_injection() {
        let fetcher = GitFetcher::new().with_token(Some("s3cret".to_string()));
        assert_eq!(
            fetcher.authenticated_url("https://github.com/a/b.git"),
            "https://s3cret@github.com/a/b.git"
        );
        // credentials already present
        assert_eq!(
            fetcher.authenticated_url("https://user@github.com/a/b.git"),
            "https://user@github.com/a/b.git"
        );
        assert_eq!(
            fetcher.authenticated_url("git@github.com:a/b.git"),
            "git@github.com:a/b.git"
        );
    }

    #[test]
    fn test_empty_token_ignored() {
        let fetcher = GitFetcher::new().with_token(Some(String::new()));
        assert_eq!(
            fetcher.authenticated_url("https://github.com/a/b.git"),
            "https://github.com/a/b.git"
        );
    }

    #[test]
    fn test_mask_hides_token() {
        let fetcher = GitFetcher::new().with_token(Some("s3cret".to_string()));
        assert_eq!(
            fetcher.mask("  fatal: https://s3cret@host failed \n"),
            "fatal: https://***@host failed"
        );
    }

    #[tokio::test]
    async fn test_missing_git_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = GitFetcher::new().with_binary("kiln-definitely-missing-git");
        let err = fetcher
            .fetch("https://example.com/a.git", &dir.path().join("ws"), "abc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Io(_)));
    }
}
