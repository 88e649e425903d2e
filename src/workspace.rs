// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-job workspace directories and child-process environment.
//!
//! Layout under `{base}/cifix-{job}-{nonce}/`:
//!
//! ```text
//! .ssh/            SSH key and client config
//! .config/gcloud/  cloud credentials
//! .m2/             Maven settings with the registry server entries
//! .cifix/          registry token file
//! repo/            the source tree the agent works in
//! ```
//!
//! The workspace directory doubles as `HOME` for every child process, so tools
//! like `ssh`, `gcloud` and `mvn` find the materialized credentials.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use uuid::Uuid;

const REPO_DIR: &str = "repo";
const MAX_ID_CHARS: usize = 48;

/// Environment variables layered on top of the inherited process environment.
#[derive(Debug, Clone, Default)]
pub struct ChildEnv {
    vars: BTreeMap<String, String>,
}

impl ChildEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base environment for a workspace: `HOME` points at the workspace root.
    pub fn for_home(home: &Path) -> Self {
        let mut env = Self::new();
        env.set("HOME", home.to_string_lossy());
        env
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Apply the overrides to a command.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.envs(&self.vars);
    }
}

/// What happened to a workspace once its job finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retention {
    Kept(PathBuf),
    Removed,
    RemoveFailed(String),
}

/// An exclusive directory tree owned by one job.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    repo: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Create a fresh, uniquely named workspace under `base`.
    pub async fn allocate(base: &Path, job_id: &str, keep: bool) -> io::Result<Self> {
        tokio::fs::create_dir_all(base).await?;
        let name = format!(
            "cifix-{}-{}",
            sanitize_job_id(job_id),
            Uuid::new_v4().simple()
        );
        let root = base.join(name);
        tokio::fs::create_dir(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        let repo = root.join(REPO_DIR);
        Ok(Self { root, repo, keep })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the source tree lives. Not created until acquisition.
    pub fn repo_dir(&self) -> &Path {
        &self.repo
    }

    pub fn home(&self) -> &Path {
        &self.root
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    pub fn child_env(&self) -> ChildEnv {
        ChildEnv::for_home(self.home())
    }

    /// Apply the retention policy: keep the tree, or delete it.
    pub async fn finish(self) -> Retention {
        if self.keep {
            return Retention::Kept(self.root);
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Retention::Removed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Retention::Removed,
            Err(e) => Retention::RemoveFailed(format!("{}: {e}", self.root.display())),
        }
    }
}

/// Job ids are caller-supplied; keep only path-safe characters.
fn sanitize_job_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_ID_CHARS)
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}
