// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Source acquisition.
//!
//! A job's tree comes either from a shallow clone or from an uploaded zip that
//! is extracted and turned into a fresh repository. Both paths return the
//! baseline commit later used for diffing; `None` means there is nothing to
//! diff against.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::credentials::decode_upload;
use crate::error::{AcquireError, GitError};
use crate::git::{build_auth_repo_url, redact_url_credentials, Git, GithubAuth};
use crate::job::{RepositorySource, UploadSource};
use crate::workspace::ChildEnv;

pub const UPLOAD_AUTHOR_NAME: &str = "cifix upload";
pub const UPLOAD_AUTHOR_EMAIL: &str = "cifix-upload@localhost";
pub const DEFAULT_UPLOAD_BRANCH: &str = "upload";

/// Refs are passed to git as arguments, so they must not look like options.
fn validate_ref(value: &str) -> Result<(), AcquireError> {
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_whitespace) {
        return Err(AcquireError::InvalidRef(value.to_string()));
    }
    Ok(())
}

/// Shallow-clone the repository into `dest` and check out the pinned commit.
///
/// `workdir` is where `git clone` runs (the workspace root).
pub async fn clone_repository(
    source: &RepositorySource,
    auth: &GithubAuth,
    workdir: &Path,
    dest: &Path,
    env: &ChildEnv,
    notes: &mut Vec<String>,
) -> Result<Option<String>, AcquireError> {
    validate_ref(&source.branch)?;
    let commit = source
        .commit_hash
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if let Some(commit) = commit {
        validate_ref(commit)?;
    }

    let url = build_auth_repo_url(&source.repo_url, auth.token.as_deref(), &auth.username);
    notes.push(format!(
        "Cloning {} (branch {}) into {}",
        redact_url_credentials(&url),
        source.branch,
        dest.display()
    ));

    let token = auth.token.as_deref();
    Git::new(workdir, env.clone())
        .with_secret(token)
        .clone_shallow(&url, &source.branch, dest)
        .await?;

    let repo = Git::new(dest, env.clone()).with_secret(token);
    if let Some(commit) = commit {
        notes.push(format!("Checking out commit {commit}"));
        // Shallow clones only hold the branch tip.
        if let Err(e) = repo.fetch_commit(commit).await {
            notes.push(format!("Fetching commit {commit} failed, trying checkout anyway: {e}"));
        }
        repo.checkout(commit).await?;
    }

    Ok(repo.head_commit().await)
}

/// Decode and extract an uploaded zip into `dest`, then initialize git over it.
pub async fn extract_upload(
    upload: &UploadSource,
    dest: &Path,
    env: &ChildEnv,
    notes: &mut Vec<String>,
) -> Result<Option<String>, AcquireError> {
    let branch = upload
        .branch
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_BRANCH)
        .to_string();
    validate_ref(&branch)?;

    let bytes = decode_upload("uploaded archive", &upload.archive)
        .map_err(|e| AcquireError::Archive(e.to_string()))?;
    notes.push(format!(
        "Extracting upload {} ({} bytes) into {}",
        upload.archive.filename.as_deref().unwrap_or("source.zip"),
        bytes.len(),
        dest.display()
    ));

    tokio::fs::create_dir_all(dest).await?;
    let target = dest.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || extract_zip(&bytes, &target))
        .await
        .map_err(|e| AcquireError::Archive(format!("extraction task failed: {e}")))??;
    notes.push(format!("Upload extracted ({entries} entries)"));

    Ok(init_upload_repository(dest, env, &branch, notes).await)
}

/// Commit the extracted tree as the baseline.
///
/// Git trouble here is logged and yields no baseline; the job can still run
/// and produce a result archive.
async fn init_upload_repository(
    dest: &Path,
    env: &ChildEnv,
    branch: &str,
    notes: &mut Vec<String>,
) -> Option<String> {
    let git = Git::new(dest, env.clone());
    let result: Result<(), GitError> = async {
        git.init().await?;
        git.set_identity(UPLOAD_AUTHOR_NAME, UPLOAD_AUTHOR_EMAIL).await?;
        git.checkout_branch(branch).await?;
        git.add_all().await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        notes.push(format!("Failed to initialize git for upload: {e}"));
        return None;
    }
    if let Err(e) = git.commit("Initial upload", true).await {
        notes.push(format!("No initial commit created: {e}"));
    }
    git.head_commit().await
}

/// Turn an archive entry name into a relative path under the destination.
///
/// `Ok(None)` for names that collapse to the destination itself (`./`).
pub fn normalize_entry(name: &str) -> Result<Option<PathBuf>, AcquireError> {
    let unified = name.replace('\\', "/");
    let has_drive = unified.as_bytes().get(1) == Some(&b':');
    if unified.starts_with('/') || has_drive {
        return Err(AcquireError::ZipSlip(name.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(AcquireError::ZipSlip(name.to_string()));
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.iter().collect()))
}

/// Extract every entry, rejecting the whole archive on the first escaping name.
///
/// Returns the number of entries in the archive.
pub fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize, AcquireError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| AcquireError::Archive(e.to_string()))?;

    // Validate all names first so a bad entry leaves nothing half-written.
    let mut targets = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| AcquireError::Archive(e.to_string()))?;
        let relative = normalize_entry(entry.name())?;
        if relative.is_none() && !entry.is_dir() {
            return Err(AcquireError::ZipSlip(entry.name().to_string()));
        }
        targets.push(relative);
    }

    for (index, relative) in targets.into_iter().enumerate() {
        let Some(relative) = relative else {
            continue;
        };
        let target = dest.join(relative);
        let mut entry = archive
            .by_index(index)
            .map_err(|e| AcquireError::Archive(e.to_string()))?;

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            // Keep the owner able to rewrite the file.
            let mode = (mode & 0o777) | 0o600;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(archive.len())
}
