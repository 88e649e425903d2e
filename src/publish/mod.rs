// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Change collection and publication.
//!
//! After the agent finishes, the job gets its changed-file list and patch,
//! upload jobs get a result archive, and repository jobs may get a pull
//! request. Nothing in here fails a job: problems are logged and the job
//! still completes.

pub mod github;

use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::config::GithubSettings;
use crate::error::PublishError;
use crate::git::{build_auth_repo_url, github_slug, Git, GithubAuth};
use crate::job::RepositorySource;

pub use github::{CreatedPullRequest, GithubClient, PullRequestClient, PullRequestRequest};

/// Longest pull request title GitHub is sent.
pub const MAX_TITLE_CHARS: usize = 256;

const BOT_NAME: &str = "cifix bot";
const BOT_EMAIL: &str = "cifix-bot@localhost";
const TOKEN_SCOPE_HINT: &str = "check that the token has push and pull request scopes";

/// What the agent changed relative to the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub changed_files: Vec<String>,
    pub patch: String,
}

/// Diff the working tree against `baseline` (or `HEAD`).
///
/// Untracked files are registered with intent-to-add first so they show up.
/// Without a repository, or on any git failure, the result is empty.
pub async fn collect_changes(git: &Git, baseline: Option<&str>, notes: &mut Vec<String>) -> Changes {
    if !git.is_repository() {
        notes.push("No git repository; skipping diff".to_string());
        return Changes::default();
    }
    if let Err(e) = git.add_intent_to_add().await {
        notes.push(format!("Could not register untracked files: {e}"));
    }

    let base = baseline.unwrap_or("HEAD");
    let changed_files = match git.diff_name_only(base).await {
        Ok(files) => files,
        Err(e) => {
            notes.push(format!("Could not list changed files: {e}"));
            Vec::new()
        }
    };
    let patch = match git.diff(base).await {
        Ok(patch) => patch,
        Err(e) => {
            notes.push(format!("Could not generate patch: {e}"));
            String::new()
        }
    };
    Changes {
        changed_files,
        patch,
    }
}

/// `{upload stem}-modified.zip`, or `{job_id}-result.zip` without an upload name.
pub fn result_archive_name(upload_filename: Option<&str>, job_id: &str) -> String {
    match upload_filename.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let stem = Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty() && s != ".")
                .unwrap_or_else(|| "upload".to_string());
            format!("{stem}-modified.zip")
        }
        None => format!("{job_id}-result.zip"),
    }
}

/// Human-readable size, e.g. `1.5 KB`.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value >= 10.0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Zip the repository tree, skipping `.git` at any depth.
pub async fn build_result_archive(repo: &Path) -> Result<Vec<u8>, PublishError> {
    let repo = repo.to_path_buf();
    tokio::task::spawn_blocking(move || zip_tree(&repo))
        .await
        .map_err(|e| PublishError::Archive(format!("archive task failed: {e}")))?
}

fn zip_tree(root: &Path) -> Result<Vec<u8>, PublishError> {
    let archive_err = |e: zip::result::ZipError| PublishError::Archive(e.to_string());
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));

    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in files {
        let entry = entry.map_err(|e| PublishError::Archive(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative: PathBuf = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        #[allow(unused_mut)]
        let mut options = SimpleFileOptions::default();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = entry.metadata() {
                options = options.unix_permissions(meta.permissions().mode() & 0o777);
            }
        }

        writer.start_file(name, options).map_err(archive_err)?;
        let content = std::fs::read(entry.path())?;
        writer.write_all(&content)?;
    }

    Ok(writer.finish().map_err(archive_err)?.into_inner())
}

fn truncate_with_ellipsis(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars <= 1 {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

/// `{prefix}: {summary}` within [`MAX_TITLE_CHARS`]; whitespace runs collapse.
pub fn pr_title(summary: Option<&str>, prefix: &str, job_id: &str) -> String {
    let summary = summary
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty());
    let Some(summary) = summary else {
        return format!("Automated changes from sandbox job {job_id}");
    };
    let head = format!("{prefix}: ");
    let available = MAX_TITLE_CHARS.saturating_sub(head.chars().count()).max(1);
    format!("{head}{}", truncate_with_ellipsis(&summary, available))
}

/// Pull request body with the full task description and summary.
pub fn pr_body(summary: Option<&str>, task: &str, job_id: &str) -> String {
    let mut sections = vec![format!("Automated change generated by sandbox job {job_id}.")];
    if !task.trim().is_empty() {
        sections.push(format!("\n**Task description:**\n{task}"));
    }
    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        sections.push(format!("\n**Summary of changes:**\n{summary}"));
    }
    sections.join("\n")
}

/// Hint for errors that usually mean the token lacks scopes.
pub fn permission_hint(err: &PublishError) -> Option<&'static str> {
    match err {
        PublishError::Api { status: 401 | 403, .. } => Some(TOKEN_SCOPE_HINT),
        other => {
            let message = other.to_string().to_lowercase();
            (message.contains("permission denied") || message.contains("authentication failed"))
                .then_some(TOKEN_SCOPE_HINT)
        }
    }
}

/// Everything the pull request flow needs from the job.
#[derive(Debug, Clone, Copy)]
pub struct PullRequestJob<'a> {
    pub job_id: &'a str,
    pub source: &'a RepositorySource,
    pub task: &'a str,
    pub summary: Option<&'a str>,
    pub patch: &'a str,
}

/// Branch name a job pushes to.
pub fn job_branch(prefix: &str, job_id: &str) -> String {
    format!("{}/cifix-{job_id}", prefix.trim_end_matches('/'))
}

/// Open a pull request when there is something to publish and a way to do it.
///
/// Returns the pull request URL. Every skip and failure is logged.
pub async fn maybe_create_pull_request(
    job: PullRequestJob<'_>,
    auth: &GithubAuth,
    git: &Git,
    settings: &GithubSettings,
    client: &dyn PullRequestClient,
    notes: &mut Vec<String>,
) -> Option<String> {
    let Some(token) = auth.token.as_deref() else {
        notes.push("No GitHub token available; skipping pull request".to_string());
        return None;
    };
    let slug = job
        .source
        .repo_slug
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| github_slug(&job.source.repo_url));
    let Some(slug) = slug else {
        notes.push("repoSlug missing and repoUrl is not github.com; cannot open a pull request".to_string());
        return None;
    };
    if !git.is_repository() {
        notes.push("No git repository; cannot open a pull request".to_string());
        return None;
    }
    if job.patch.trim().is_empty() {
        notes.push("No changes detected; pull request not created".to_string());
        return None;
    }

    match open_pull_request(job, auth, token, &slug, git, settings, client, notes).await {
        Ok(url) => url,
        Err(e) => {
            let hint = permission_hint(&e)
                .map(|h| format!(" ({h})"))
                .unwrap_or_default();
            notes.push(format!("Failed to create pull request: {e}{hint}"));
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn open_pull_request(
    job: PullRequestJob<'_>,
    auth: &GithubAuth,
    token: &str,
    slug: &str,
    git: &Git,
    settings: &GithubSettings,
    client: &dyn PullRequestClient,
    notes: &mut Vec<String>,
) -> Result<Option<String>, PublishError> {
    let branch = job_branch(&settings.branch_prefix, job.job_id);
    let git = git.clone().with_secret(Some(token));

    git.set_identity(BOT_NAME, BOT_EMAIL).await?;
    git.checkout_branch(&branch).await?;
    git.add_all().await?;
    git.commit("cifix automated fix", false).await?;

    let remote = build_auth_repo_url(&job.source.repo_url, Some(token), &auth.username);
    git.set_remote_url("origin", &remote).await?;
    git.push("origin", &branch).await?;
    notes.push(format!("Pushed branch {branch}"));

    let request = PullRequestRequest {
        title: pr_title(job.summary, &settings.branch_prefix, job.job_id),
        head: branch,
        base: job.source.branch.clone(),
        body: pr_body(job.summary, job.task, job.job_id),
    };
    let created = client.create_pull_request(token, slug, &request).await?;
    match created.html_url {
        Some(url) => {
            notes.push(format!("Pull request created at {url}"));
            Ok(Some(url))
        }
        None => {
            notes.push("Pull request created but the API returned no URL".to_string());
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::github::MockPullRequestClient;
    use super::*;
    use crate::config::SandboxConfig;
    use crate::workspace::ChildEnv;
    use tempfile::tempdir;

    fn source(slug: Option<&str>) -> RepositorySource {
        RepositorySource {
            repo_url: "https://gitlab.example.com/acme/app.git".to_string(),
            branch: "main".to_string(),
            commit_hash: None,
            repo_slug: slug.map(String::from),
        }
    }

    fn auth(token: Option<&str>) -> GithubAuth {
        GithubAuth {
            token: token.map(String::from),
            username: "x-access-token".to_string(),
            source: "GITHUB_TOKEN",
        }
    }

    #[test]
    fn test_result_archive_name() {
        assert_eq!(result_archive_name(Some("project.zip"), "j1"), "project-modified.zip");
        assert_eq!(result_archive_name(Some(" dir/src.tar.zip "), "j1"), "src.tar-modified.zip");
        assert_eq!(result_archive_name(None, "j1"), "j1-result.zip");
        assert_eq!(result_archive_name(Some("  "), "j1"), "j1-result.zip");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(20 * 1024 * 1024), "20 MB");
    }

    #[test]
    fn test_pr_title() {
        assert_eq!(pr_title(None, "sandbox", "42"), "Automated changes from sandbox job 42");
        assert_eq!(pr_title(Some("  \n "), "sandbox", "42"), "Automated changes from sandbox job 42");
        assert_eq!(pr_title(Some("Fix  the\nbuild"), "sandbox", "42"), "sandbox: Fix the build");

        let long = "x".repeat(400);
        let title = pr_title(Some(&long), "sandbox", "42");
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn test_pr_body_keeps_full_text() {
        let summary = "s".repeat(1000);
        let body = pr_body(Some(&summary), "Fix the test", "42");
        assert!(body.starts_with("Automated change generated by sandbox job 42."));
        assert!(body.contains("\n\n**Task description:**\nFix the test"));
        assert!(body.contains(&format!("\n\n**Summary of changes:**\n{summary}")));
        assert!(!pr_body(None, "t", "1").contains("Summary of changes"));
    }

    #[test]
    fn test_permission_hint() {
        let api = PublishError::Api {
            status: 403,
            message: "Resource not accessible".into(),
        };
        assert!(permission_hint(&api).is_some());
        let push = PublishError::Git(crate::error::GitError::CommandFailed {
            command: "push origin b".into(),
            stderr: "remote: Permission denied to bot".into(),
        });
        assert!(permission_hint(&push).is_some());
        assert!(permission_hint(&PublishError::Network("timeout".into())).is_none());
    }

    #[test]
    fn test_job_branch() {
        assert_eq!(job_branch("sandbox", "abc"), "sandbox/cifix-abc");
        assert_eq!(job_branch("bots/", "abc"), "bots/cifix-abc");
    }

    #[tokio::test]
    async fn test_result_archive_excludes_git() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(dir.path().join("src/.git")).unwrap();
        std::fs::write(dir.path().join("src/.git/config"), "x").unwrap();
        std::fs::write(dir.path().join("README.md"), "hello world").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn f() {}").unwrap();

        let bytes = build_result_archive(dir.path()).await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["README.md", "src/lib.rs"]);

        let mut readme = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("README.md").unwrap(), &mut readme).unwrap();
        assert_eq!(readme, "hello world");
    }

    #[tokio::test]
    async fn test_collect_changes_without_repository() {
        let dir = tempdir().unwrap();
        let git = Git::new(dir.path(), ChildEnv::new());
        let mut notes = Vec::new();
        assert_eq!(collect_changes(&git, None, &mut notes).await, Changes::default());
    }

    #[tokio::test]
    async fn test_pull_request_skips() {
        let dir = tempdir().unwrap();
        let git = Git::new(dir.path(), ChildEnv::new());
        let settings = SandboxConfig::default().github;
        let mut client = MockPullRequestClient::new();
        client.expect_create_pull_request().never();

        let src = source(None);
        let job = PullRequestJob {
            job_id: "1",
            source: &src,
            task: "t",
            summary: Some("s"),
            patch: "diff",
        };

        let mut notes = Vec::new();
        assert!(maybe_create_pull_request(job, &auth(None), &git, &settings, &client, &mut notes)
            .await
            .is_none());
        assert!(notes[0].contains("No GitHub token"));

        notes.clear();
        assert!(maybe_create_pull_request(job, &auth(Some("t")), &git, &settings, &client, &mut notes)
            .await
            .is_none());
        assert!(notes[0].contains("repoSlug missing"));

        let src = source(Some("acme/app"));
        let job = PullRequestJob {
            source: &src,
            ..job
        };
        notes.clear();
        assert!(maybe_create_pull_request(job, &auth(Some("t")), &git, &settings, &client, &mut notes)
            .await
            .is_none());
        assert!(notes[0].contains("No git repository"));

        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let job = PullRequestJob { patch: "  \n", ..job };
        notes.clear();
        assert!(maybe_create_pull_request(job, &auth(Some("t")), &git, &settings, &client, &mut notes)
            .await
            .is_none());
        assert!(notes[0].contains("No changes detected"));
    }
}
