// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Materialize uploaded secrets inside the job workspace.
//!
//! Every secret file is written with mode `0600` below the workspace home and
//! exposed to child processes through [`ChildEnv`]. Secret values never reach
//! the job log; notes pushed here only carry paths and counts.

pub mod maven;

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::RegistrySettings;
use crate::error::CredentialError;
use crate::job::UploadedFile;
use crate::workspace::ChildEnv;

pub use maven::SettingsUpdate;

const SSH_KEY_NAME: &str = "id_ed25519";
const GCP_DEFAULT_NAME: &str = "application_default_credentials.json";
const REGISTRY_TOKEN_DEFAULT_NAME: &str = "gitlab-personal-access-token.key";
const SSH_CONFIG_MARKER: &str = "# cifix ssh key";

/// Directory (relative to the repository) for problem attachments.
pub const PROBLEM_FILES_DIR: &str = ".cifix/problem-files";

static PRIVATE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----").expect("private key regex"));

/// Log lines produced while materializing. Never contain secret values.
pub type CredentialNotes = Vec<String>;

/// A registry token written to disk, plus the Maven settings it produced.
#[derive(Clone)]
pub struct RegistryToken {
    pub path: PathBuf,
    pub value: String,
    pub settings: SettingsUpdate,
}

impl std::fmt::Debug for RegistryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryToken")
            .field("path", &self.path)
            .field("value", &"****")
            .field("settings", &self.settings.path)
            .finish()
    }
}

/// Write `bytes` and restrict the file to its owner.
pub(crate) async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, bytes).await?;
    set_mode(path, 0o600).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Decode an uploaded file. Whitespace inside the payload is ignored.
pub fn decode_upload(what: &'static str, file: &UploadedFile) -> Result<Vec<u8>, CredentialError> {
    let compact: String = file.base64.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| CredentialError::Decode {
            what,
            message: e.to_string(),
        })
}

/// Reduce a client-supplied name to a plain file name.
///
/// Separators and drive colons become `_`; empty results yield `None`.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .replace(':', "_")
        .trim()
        .to_string();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base)
    }
}

/// Write the cloud service-account JSON and point the SDKs at it.
pub async fn install_cloud_credentials(
    home: &Path,
    file: &UploadedFile,
    env: &mut ChildEnv,
    notes: &mut CredentialNotes,
) -> Result<PathBuf, CredentialError> {
    let bytes = decode_upload("cloud credentials", file)?;
    let dir = home.join(".config").join("gcloud");
    tokio::fs::create_dir_all(&dir).await?;

    let name = file
        .filename
        .as_deref()
        .and_then(sanitize_file_name)
        .unwrap_or_else(|| GCP_DEFAULT_NAME.to_string());
    let path = dir.join(name);
    write_private(&path, &bytes).await?;

    env.set("GOOGLE_APPLICATION_CREDENTIALS", path.to_string_lossy());
    env.set("CLOUDSDK_CONFIG", dir.to_string_lossy());
    notes.push(format!("GCP credentials written to {}", path.display()));
    Ok(path)
}

/// Write the SSH private key and configure ssh and git to use it.
pub async fn install_ssh_key(
    home: &Path,
    file: &UploadedFile,
    env: &mut ChildEnv,
    notes: &mut CredentialNotes,
) -> Result<PathBuf, CredentialError> {
    let bytes = decode_upload("SSH key", file)?;
    let ssh_dir = home.join(".ssh");
    tokio::fs::create_dir_all(&ssh_dir).await?;
    set_mode(&ssh_dir, 0o700).await?;

    let key_path = ssh_dir.join(SSH_KEY_NAME);
    write_private(&key_path, &bytes).await?;
    notes.push(format!("SSH key written to {}", key_path.display()));
    if let Some(original) = file.filename.as_deref() {
        if original != SSH_KEY_NAME {
            notes.push(format!("SSH key {original} stored as {SSH_KEY_NAME}"));
        }
    }

    // Failing to update the client config is not fatal; GIT_SSH_COMMAND still
    // carries the key for git operations.
    if let Err(e) = append_ssh_config(&ssh_dir, &key_path).await {
        notes.push(format!("Could not update SSH config: {e}"));
    }

    let key = key_path.to_string_lossy();
    env.set(
        "GIT_SSH_COMMAND",
        format!("ssh -i {key} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no"),
    );
    Ok(key_path)
}

async fn append_ssh_config(ssh_dir: &Path, key_path: &Path) -> std::io::Result<()> {
    let config_path = ssh_dir.join("config");
    let existing = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.contains(SSH_CONFIG_MARKER) {
        return Ok(());
    }

    let block = format!(
        "{SSH_CONFIG_MARKER}\nHost *\n  IdentityFile {}\n  IdentitiesOnly yes\n  StrictHostKeyChecking no\n",
        key_path.display()
    );
    let trimmed = existing.trim();
    let content = if trimmed.is_empty() {
        block
    } else {
        format!("{trimmed}\n\n{block}")
    };
    write_private(&config_path, content.as_bytes()).await
}

/// Extract the token from a registry token file.
///
/// Takes the first non-empty line; `key=value` lines yield the value. Returns
/// `Ok(None)` for files without any token text.
pub fn parse_registry_token(content: &str) -> Result<Option<String>, CredentialError> {
    if PRIVATE_KEY.is_match(content) {
        return Err(CredentialError::LooksLikePrivateKey);
    }
    let Some(line) = content.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(None);
    };
    let token = match line.split_once('=') {
        Some((_, value)) => value.trim(),
        None => line,
    };
    Ok((!token.is_empty()).then(|| token.to_string()))
}

/// Write the registry token, export it, and add Maven server entries.
///
/// `repo` is scanned for `pom.xml` repositories matching the configured
/// pattern, so call this after the source tree exists.
pub async fn install_registry_token(
    home: &Path,
    repo: &Path,
    file: &UploadedFile,
    settings: &RegistrySettings,
    env: &mut ChildEnv,
    notes: &mut CredentialNotes,
) -> Result<Option<RegistryToken>, CredentialError> {
    let bytes = decode_upload("registry token", file)?;
    let text = String::from_utf8_lossy(&bytes);
    let Some(token) = parse_registry_token(&text)? else {
        notes.push("Registry token file is empty; skipping".to_string());
        return Ok(None);
    };

    let dir = home.join(".cifix");
    tokio::fs::create_dir_all(&dir).await?;
    let name = file
        .filename
        .as_deref()
        .and_then(sanitize_file_name)
        .unwrap_or_else(|| REGISTRY_TOKEN_DEFAULT_NAME.to_string());
    let path = dir.join(name);
    write_private(&path, format!("{token}\n").as_bytes()).await?;
    notes.push(format!("Registry token written to {}", path.display()));

    for key in [
        "GITLAB_PERSONAL_ACCESS_TOKEN",
        "GITLAB_PRIVATE_TOKEN",
        "MAVEN_GITLAB_TOKEN",
    ] {
        env.set(key, token.as_str());
    }

    let update = maven::ensure_settings(
        home,
        repo,
        &token,
        settings.url_pattern.as_deref(),
        &settings.default_server_id,
    )
    .await?;
    notes.push(format!(
        "Maven settings written to {} (servers: {})",
        update.path.display(),
        update.server_ids.join(", ")
    ));
    notes.push(format!("Maven settings content:\n{}", update.redacted));

    Ok(Some(RegistryToken {
        path,
        value: token,
        settings: update,
    }))
}

/// Write problem attachments into the repository and hide them from git.
///
/// Returns the repository-relative paths in upload order.
pub async fn install_problem_files(
    repo: &Path,
    files: &[UploadedFile],
    notes: &mut CredentialNotes,
) -> Result<Vec<String>, CredentialError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let dir = repo.join(PROBLEM_FILES_DIR);
    tokio::fs::create_dir_all(&dir).await?;

    let mut written = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let bytes = decode_upload("problem file", file)?;
        let name = file
            .filename
            .as_deref()
            .and_then(sanitize_file_name)
            .unwrap_or_else(|| format!("problem-{}.txt", index + 1));
        tokio::fs::write(dir.join(&name), &bytes).await?;
        written.push(format!("{PROBLEM_FILES_DIR}/{name}"));
    }

    exclude_from_git(repo, ".cifix/").await?;
    notes.push(format!(
        "Problem files written: {}",
        written.join(", ")
    ));
    Ok(written)
}

/// Add `pattern` to `.git/info/exclude` unless it is already listed.
async fn exclude_from_git(repo: &Path, pattern: &str) -> std::io::Result<()> {
    let git_dir = repo.join(".git");
    if !tokio::fs::try_exists(&git_dir).await.unwrap_or(false) {
        return Ok(());
    }
    let info = git_dir.join("info");
    tokio::fs::create_dir_all(&info).await?;
    let exclude = info.join("exclude");
    let existing = match tokio::fs::read_to_string(&exclude).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.lines().any(|l| l.trim() == pattern) {
        return Ok(());
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(pattern);
    content.push('\n');
    tokio::fs::write(&exclude, content).await
}
