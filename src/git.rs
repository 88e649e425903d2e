// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git plumbing.
//!
//! - URL helpers: authenticated clone URLs, credential redaction, repo slugs
//! - [`GithubAuth`]: which token a job uses, and where it came from
//! - [`Git`]: a thin async wrapper around `git` subprocesses run with the job's
//!   environment. Every error message is scrubbed of known secrets.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use reqwest::Url;
use tokio::process::Command;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::config::GithubSettings;
use crate::error::GitError;
use crate::workspace::ChildEnv;

const REDACTED: &str = "***";

fn is_github_https(url: &Url) -> bool {
    url.scheme() == "https"
        && url
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case("github.com"))
}

/// Embed `username:token` into an HTTPS github.com URL.
///
/// Other hosts, URLs that already carry credentials and unparseable input are
/// returned unchanged.
pub fn build_auth_repo_url(repo_url: &str, token: Option<&str>, username: &str) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return repo_url.to_string();
    };
    let Ok(mut url) = Url::parse(repo_url) else {
        return repo_url.to_string();
    };
    if !is_github_https(&url) || !url.username().is_empty() || url.password().is_some() {
        return repo_url.to_string();
    }
    if url.set_username(username).is_err() || url.set_password(Some(token)).is_err() {
        return repo_url.to_string();
    }
    url.to_string()
}

/// Replace any userinfo in a URL with `***`.
pub fn redact_url_credentials(repo_url: &str) -> String {
    let Ok(mut url) = Url::parse(repo_url) else {
        return repo_url.to_string();
    };
    if url.username().is_empty() && url.password().is_none() {
        return repo_url.to_string();
    }
    if !url.username().is_empty() && url.set_username(REDACTED).is_err() {
        return repo_url.to_string();
    }
    if url.password().is_some() && url.set_password(Some(REDACTED)).is_err() {
        return repo_url.to_string();
    }
    url.to_string()
}

/// The password component of a URL, if any.
pub fn token_from_repo_url(repo_url: &str) -> Option<String> {
    Url::parse(repo_url)
        .ok()
        .and_then(|u| u.password().map(str::to_string))
        .filter(|p| !p.is_empty())
}

/// `owner/repo` from a github.com URL.
pub fn github_slug(repo_url: &str) -> Option<String> {
    let url = Url::parse(repo_url).ok()?;
    if !url
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case("github.com"))
    {
        return None;
    }
    let mut parts = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

/// The token a job uses for clone, push and the pull request API.
#[derive(Clone)]
pub struct GithubAuth {
    pub token: Option<String>,
    pub username: String,
    /// Where the token came from, for logs.
    pub source: &'static str,
}

impl std::fmt::Debug for GithubAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubAuth")
            .field("token", &self.token.as_ref().map(|_| REDACTED))
            .field("username", &self.username)
            .field("source", &self.source)
            .finish()
    }
}

/// Pick a token: clone token, generic token, PR token, then the repo URL itself.
pub fn resolve_github_auth(settings: &GithubSettings, repo_url: &str) -> GithubAuth {
    let non_empty = |t: &Option<String>| t.as_ref().filter(|t| !t.trim().is_empty()).cloned();
    let (token, source) = if let Some(t) = non_empty(&settings.clone_token) {
        (Some(t), "GITHUB_CLONE_TOKEN")
    } else if let Some(t) = non_empty(&settings.token) {
        (Some(t), "GITHUB_TOKEN")
    } else if let Some(t) = non_empty(&settings.pr_token) {
        (Some(t), "GITHUB_PR_TOKEN")
    } else if let Some(t) = token_from_repo_url(repo_url) {
        (Some(t), "repoUrl")
    } else {
        (None, "none")
    };
    GithubAuth {
        token,
        username: settings.clone_username.clone(),
        source,
    }
}

/// Runs `git` in a working directory with the job's environment.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    env: ChildEnv,
    secrets: Vec<String>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, env: ChildEnv) -> Self {
        Self {
            workdir: workdir.into(),
            env,
            secrets: Vec::new(),
        }
    }

    /// Scrub `secret` from every error message this wrapper produces.
    pub fn with_secret(mut self, secret: Option<&str>) -> Self {
        if let Some(s) = secret.filter(|s| !s.is_empty()) {
            self.secrets.push(s.to_string());
        }
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether the working directory holds a repository.
    pub fn is_repository(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), REDACTED);
        }
        out.split(' ')
            .map(|word| {
                if word.contains("://") {
                    redact_url_credentials(word)
                } else {
                    word.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run git and return stdout; a non-zero exit is an error carrying stderr.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, fields(cmd = %self.redact(&args.join(" ")))))]
    pub async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let command = self.redact(&args.join(" "));
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        self.env.apply(&mut cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| GitError::Spawn(self.redact(&e.to_string())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = if stderr.trim().is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(GitError::CommandFailed {
                command,
                stderr: self.redact(&stderr),
            });
        }

        #[cfg(feature = "telemetry")]
        debug!(cmd = %command, "git command succeeded");

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Shallow-clone `url` at `branch` into `dest`.
    pub async fn clone_shallow(&self, url: &str, branch: &str, dest: &Path) -> Result<(), GitError> {
        let dest = dest.to_string_lossy();
        self.run(&["clone", "--branch", branch, "--depth", "1", url, &dest])
            .await
            .map(|_| ())
    }

    /// Fetch a single commit so it can be checked out from a shallow clone.
    pub async fn fetch_commit(&self, commit: &str) -> Result<(), GitError> {
        self.run(&["fetch", "--depth", "1", "origin", commit])
            .await
            .map(|_| ())
    }

    pub async fn checkout(&self, rev: &str) -> Result<(), GitError> {
        self.run(&["checkout", rev]).await.map(|_| ())
    }

    /// Create or reset `branch` at the current HEAD and switch to it.
    pub async fn checkout_branch(&self, branch: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-B", branch]).await.map(|_| ())
    }

    pub async fn init(&self) -> Result<(), GitError> {
        self.run(&["init", "--quiet"]).await.map(|_| ())
    }

    /// Set a repository-local commit identity.
    pub async fn set_identity(&self, name: &str, email: &str) -> Result<(), GitError> {
        self.run(&["config", "user.name", name]).await?;
        self.run(&["config", "user.email", email]).await?;
        Ok(())
    }

    pub async fn add_all(&self) -> Result<(), GitError> {
        self.run(&["add", "-A"]).await.map(|_| ())
    }

    /// Register untracked files without staging content, so they appear in diffs.
    pub async fn add_intent_to_add(&self) -> Result<(), GitError> {
        self.run(&["add", "--intent-to-add", "--all"]).await.map(|_| ())
    }

    pub async fn commit(&self, message: &str, allow_empty: bool) -> Result<(), GitError> {
        let mut args = vec!["commit", "--quiet", "--no-verify", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.run(&args).await.map(|_| ())
    }

    /// HEAD commit hash, or `None` if there is no repository or no commit yet.
    pub async fn head_commit(&self) -> Option<String> {
        if !self.is_repository() {
            return None;
        }
        self.run(&["rev-parse", "HEAD"])
            .await
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Paths changed relative to `base` (working tree included).
    pub async fn diff_name_only(&self, base: &str) -> Result<Vec<String>, GitError> {
        let out = self.run(&["diff", "--name-only", base]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Unified diff of the working tree against `base`.
    pub async fn diff(&self, base: &str) -> Result<String, GitError> {
        self.run(&["diff", base]).await
    }

    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), GitError> {
        self.run(&["remote", "set-url", remote, url]).await.map(|_| ())
    }

    pub async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.run(&["push", remote, branch]).await.map(|_| ())
    }
}

/// Whether `git` is on PATH. Used by tests that need a real binary.
pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
