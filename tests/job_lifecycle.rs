// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end job lifecycle: upload in, patch and result archive out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use cifix_sandbox::job::{JobSource, RepositorySource, UploadSource};
use cifix_sandbox::publish::github::GithubClient;
use cifix_sandbox::types::{ProviderResponse, TokenUsage};
use cifix_sandbox::{JobRequest, JobStatus, OpenAIFactory, Profile, SandboxProcessor};

use common::{call, config, wait, zip_entries, zip_read, zip_upload, Script};

fn processor(base: &std::path::Path, script: &Script) -> SandboxProcessor {
    let config = Arc::new(config(base));
    let github = Arc::new(GithubClient::new(config.github.api_base.clone()).unwrap());
    SandboxProcessor::new(config, Arc::new(script.clone()), github)
}

fn upload_request(id: &str) -> JobRequest {
    JobRequest::new(
        JobSource::Upload(UploadSource {
            archive: zip_upload("project.zip", &[("README.md", "hello\n")]),
            branch: None,
        }),
        "Say hello to the world",
    )
    .with_id(id)
}

#[tokio::test]
async fn test_upload_job_produces_patch_and_archive() {
    if !common::has_binary("git") {
        eprintln!("git not available, skipping");
        return;
    }
    let base = tempdir().unwrap();
    let script = Script::new(vec![
        ProviderResponse::with_tool_calls(vec![call(
            "call_1",
            "write_file",
            json!({"path": "README.md", "content": "hello world\n"}),
        )])
        .with_usage(TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cached_input_tokens: 40,
            ..Default::default()
        }),
        ProviderResponse::text("done").with_usage(TokenUsage {
            input_tokens: 150,
            output_tokens: 5,
            ..Default::default()
        }),
    ]);
    let processor = processor(base.path(), &script);

    let submitted = processor.submit(upload_request("job-a")).await;
    assert_eq!(submitted.id, "job-a");
    let job = wait(&processor, "job-a").await;

    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    assert_eq!(job.error, None);
    assert_eq!(job.output.summary.as_deref(), Some("done"));
    assert_eq!(job.output.changed_files, vec!["README.md".to_string()]);
    let patch = job.output.patch.as_deref().unwrap();
    assert!(patch.contains("+hello world"), "patch: {patch}");
    assert!(job.output.pull_request_url.is_none());

    let archive = job.output.result_archive.as_ref().unwrap();
    assert_eq!(archive.name, "project-modified.zip");
    let entries = zip_entries(&archive.bytes);
    assert!(entries.contains(&"README.md".to_string()));
    assert!(!entries.iter().any(|e| e.starts_with(".git")));
    assert_eq!(zip_read(&archive.bytes, "README.md"), "hello world\n");

    assert_eq!(job.usage.prompt_tokens, 250);
    assert_eq!(job.usage.completion_tokens, 25);
    assert_eq!(job.usage.cached_prompt_tokens, 40);
    assert_eq!(job.model.as_deref(), Some(processor.config().model.default_model.as_str()));

    assert!(job.logs.iter().any(|l| l.contains("Upload job; automatic pull request skipped")));
    assert!(job.logs.iter().any(|l| l.contains("Job completed successfully")));
    assert!(job.logs.iter().any(|l| l.contains("Workspace removed")));

    // Workspace is gone and the view exposes the archive without its bytes.
    let workspace = job.workspace.clone().unwrap();
    assert!(!workspace.exists());
    let view = serde_json::to_value(job.view()).unwrap();
    assert_eq!(view["status"], "COMPLETED");
    assert_eq!(view["resultArchiveReady"], true);
    assert_eq!(view["resultArchiveName"], "project-modified.zip");
    assert!(!view.to_string().contains(&archive_b64_prefix(&archive.bytes)));
}

fn archive_b64_prefix(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .encode(bytes)
        .chars()
        .take(32)
        .collect()
}

#[tokio::test]
async fn test_economy_profile_uses_economy_model() {
    if !common::has_binary("git") {
        return;
    }
    let base = tempdir().unwrap();
    let script = Script::new(vec![ProviderResponse::text("nothing to change")]);
    let processor = processor(base.path(), &script);

    processor
        .submit(upload_request("job-eco").with_profile(Profile::Economy))
        .await;
    let job = wait(&processor, "job-eco").await;

    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    let economy = processor.config().model.economy_model.clone();
    assert_eq!(script.models.lock().unwrap().as_slice(), [economy]);
    assert!(job.logs.iter().any(|l| l.contains("Economy mode")));
    assert!(job.output.changed_files.is_empty());
}

#[tokio::test]
async fn test_duplicate_submission_keeps_first_job() {
    if !common::has_binary("git") {
        return;
    }
    let base = tempdir().unwrap();
    let script = Script::new(vec![ProviderResponse::text("done")]);
    let processor = processor(base.path(), &script);

    processor.submit(upload_request("dup")).await;
    let second = JobRequest::new(
        JobSource::Repository(RepositorySource {
            repo_url: "https://github.com/acme/other.git".to_string(),
            branch: "main".to_string(),
            commit_hash: None,
            repo_slug: None,
        }),
        "different task",
    )
    .with_id("dup");
    let existing = processor.submit(second).await;
    assert!(existing.is_upload());
    assert_eq!(existing.request.task_description, "Say hello to the world");

    let job = wait(&processor, "dup").await;
    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    assert_eq!(processor.registry().len().await, 1);
    // Only one pipeline ran.
    assert_eq!(script.models.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_api_key_fails_job() {
    let base = tempdir().unwrap();
    let config = Arc::new(config(base.path()));
    let factory = OpenAIFactory::new(None, "http://127.0.0.1:9", Duration::from_secs(1));
    let github = Arc::new(GithubClient::new(config.github.api_base.clone()).unwrap());
    let processor = SandboxProcessor::new(config, Arc::new(factory), github);

    processor.submit(upload_request("no-key")).await;
    let job = wait(&processor, "no-key").await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.as_deref().unwrap();
    assert!(error.contains("not configured"), "error: {error}");
    assert!(job.logs.iter().any(|l| l.contains("Job failed")));
    assert!(job.output.result_archive.is_none());
    assert!(!job.workspace.unwrap().exists());
}

#[tokio::test]
async fn test_corrupt_upload_fails_job() {
    let base = tempdir().unwrap();
    let script = Script::new(vec![ProviderResponse::text("unreachable")]);
    let processor = processor(base.path(), &script);

    let mut request = upload_request("bad-zip");
    if let JobSource::Upload(upload) = &mut request.source {
        upload.archive.base64 = "bm90IGEgemlw".to_string();
    }
    processor.submit(request).await;
    let job = wait(&processor, "bad-zip").await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(script.models.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_job_descriptor_from_json() {
    if !common::has_binary("git") {
        return;
    }
    let base = tempdir().unwrap();
    let script = Script::new(vec![ProviderResponse::text("done")]);
    let processor = processor(base.path(), &script);

    let upload = zip_upload("app.zip", &[("main.txt", "x")]);
    let request: JobRequest = serde_json::from_value(json!({
        "jobId": "from-json",
        "uploadedZip": {"base64": upload.base64, "filename": "app.zip"},
        "taskDescription": "noop",
        "profile": "ECONOMY",
    }))
    .unwrap();
    processor.submit(request).await;
    let job = wait(&processor, "from-json").await;

    assert_eq!(job.status, JobStatus::Completed, "logs: {:#?}", job.logs);
    assert_eq!(job.view().profile, Profile::Economy);
    assert_eq!(
        job.output.result_archive.as_ref().map(|a| a.name.as_str()),
        Some("app-modified.zip")
    );
}
