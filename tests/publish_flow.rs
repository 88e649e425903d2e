// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Clone job against a local origin, through push and the pull request API.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use tempfile::tempdir;

use cifix_sandbox::error::PublishError;
use cifix_sandbox::job::{JobSource, RepositorySource};
use cifix_sandbox::publish::{CreatedPullRequest, PullRequestClient, PullRequestRequest};
use cifix_sandbox::types::ProviderResponse;
use cifix_sandbox::{JobRequest, JobStatus, SandboxProcessor};

use common::{bare_origin, call, config, git, wait, Script};

mock! {
    pub Pulls {}

    #[async_trait]
    impl PullRequestClient for Pulls {
        async fn create_pull_request(
            &self,
            token: &str,
            slug: &str,
            request: &PullRequestRequest,
        ) -> Result<CreatedPullRequest, PublishError>;
    }
}

fn edit_script() -> Script {
    Script::new(vec![
        ProviderResponse::with_tool_calls(vec![call(
            "call_1",
            "write_file",
            json!({"path": "src/lib.txt", "content": "fixed\n"}),
        )]),
        ProviderResponse::text("Fix the library"),
    ])
}

fn clone_request(origin: &std::path::Path, id: &str) -> JobRequest {
    JobRequest::new(
        JobSource::Repository(RepositorySource {
            repo_url: origin.to_string_lossy().into_owned(),
            branch: "main".to_string(),
            commit_hash: None,
            repo_slug: Some("acme/app".to_string()),
        }),
        "Make the library say fixed",
    )
    .with_id(id)
}

#[tokio::test]
async fn test_clone_job_pushes_branch_and_opens_pull_request() {
    if !common::has_binary("git") {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempdir().unwrap();
    let origin = bare_origin(root.path(), &[("README.md", "app\n")]);
    std::fs::create_dir_all(root.path().join("work")).unwrap();

    let mut config = config(&root.path().join("work"));
    config.github.token = Some("ghp_testtoken".to_string());
    let config = Arc::new(config);

    let mut pulls = MockPulls::new();
    pulls
        .expect_create_pull_request()
        .withf(|token, slug, request| {
            token.to_string() == "ghp_testtoken"
                && slug.to_string() == "acme/app"
                && request.head == "sandbox/cifix-job-c"
                && request.base == "main"
                && request.title == "sandbox: Fix the library"
                && request.body.contains("Make the library say fixed")
        })
        .times(1)
        .returning(|_, _, _| {
            Ok(CreatedPullRequest {
                html_url: Some("https://github.com/acme/app/pull/7".to_string()),
                number: Some(7),
            })
        });

    let script = edit_script();
    let processor = SandboxProcessor::new(config, Arc::new(script), Arc::new(pulls));
    processor.submit(clone_request(&origin, "job-c")).await;
    let job = wait(&processor, "job-c").await;

    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    assert_eq!(
        job.output.pull_request_url.as_deref(),
        Some("https://github.com/acme/app/pull/7")
    );
    assert_eq!(job.output.changed_files, vec!["src/lib.txt".to_string()]);
    assert!(job.output.result_archive.is_none());
    assert!(job
        .logs
        .iter()
        .any(|l| l.contains("GitHub token from GITHUB_TOKEN")));
    assert!(!job.logs.iter().any(|l| l.contains("ghp_testtoken")));

    let pushed = git(&origin, &["show", "sandbox/cifix-job-c:src/lib.txt"]);
    assert_eq!(pushed, "fixed");
}

#[tokio::test]
async fn test_push_failure_still_completes() {
    if !common::has_binary("git") {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempdir().unwrap();
    let origin = bare_origin(root.path(), &[("README.md", "app\n")]);
    let hook = origin.join("hooks").join("pre-receive");
    std::fs::write(&hook, "#!/bin/sh\necho 'permission denied' >&2\nexit 1\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    std::fs::create_dir_all(root.path().join("work")).unwrap();

    let mut config = config(&root.path().join("work"));
    config.github.token = Some("ghp_testtoken".to_string());
    let config = Arc::new(config);

    let mut pulls = MockPulls::new();
    pulls.expect_create_pull_request().never();

    let processor = SandboxProcessor::new(config, Arc::new(edit_script()), Arc::new(pulls));
    processor.submit(clone_request(&origin, "job-c2")).await;
    let job = wait(&processor, "job-c2").await;

    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    assert_eq!(job.error, None);
    assert!(job.output.pull_request_url.is_none());
    assert!(job.output.patch.as_deref().unwrap().contains("+fixed"));
    assert!(job
        .logs
        .iter()
        .any(|l| l.contains("Failed to create pull request")));
}

#[tokio::test]
async fn test_no_token_skips_pull_request() {
    if !common::has_binary("git") {
        return;
    }
    let root = tempdir().unwrap();
    let origin = bare_origin(root.path(), &[("README.md", "app\n")]);
    std::fs::create_dir_all(root.path().join("work")).unwrap();

    let mut pulls = MockPulls::new();
    pulls.expect_create_pull_request().never();

    let config = Arc::new(config(&root.path().join("work")));
    let processor = SandboxProcessor::new(config, Arc::new(edit_script()), Arc::new(pulls));
    processor.submit(clone_request(&origin, "job-c3")).await;
    let job = wait(&processor, "job-c3").await;

    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    assert!(job.output.pull_request_url.is_none());
    assert!(job
        .logs
        .iter()
        .any(|l| l.contains("No GitHub token available; skipping pull request")));
}
