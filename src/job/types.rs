// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job descriptors, state and the serialisable view.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::Profile;
use crate::types::TokenUsage;

/// A base64 payload with an optional client-side file name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub base64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl std::fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedFile")
            .field("filename", &self.filename)
            .field("base64_len", &self.base64.len())
            .finish()
    }
}

/// A remote repository to clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySource {
    pub repo_url: String,
    pub branch: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    /// `owner/repo` for the pull request API; parsed from github.com URLs otherwise.
    #[serde(default)]
    pub repo_slug: Option<String>,
}

/// An uploaded source archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub archive: UploadedFile,
    /// Working branch created over the extracted tree.
    pub branch: Option<String>,
}

/// Where a job's source tree comes from. Exactly one variant per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Repository(RepositorySource),
    Upload(UploadSource),
}

impl JobSource {
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Upload(_))
    }
}

/// Secrets to materialize in the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub ssh_key: Option<UploadedFile>,
    #[serde(default)]
    pub gcp_credentials: Option<UploadedFile>,
    #[serde(default)]
    pub registry_token: Option<UploadedFile>,
}

/// A job as submitted.
///
/// Deserializes from the camelCase wire form where the source is given either
/// as `repoUrl`/`branch` or as `uploadedZip`, never both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "JobRequestWire")]
pub struct JobRequest {
    /// Caller-assigned id; one is generated when absent.
    pub job_id: Option<String>,
    pub source: JobSource,
    pub task_description: String,
    pub test_command: Option<String>,
    pub profile: Profile,
    /// Overrides the profile's default model.
    pub model: Option<String>,
    pub credentials: Credentials,
    pub problem_files: Vec<UploadedFile>,
}

impl JobRequest {
    pub fn new(source: JobSource, task_description: impl Into<String>) -> Self {
        Self {
            job_id: None,
            source,
            task_description: task_description.into(),
            test_command: None,
            profile: Profile::Standard,
            model: None,
            credentials: Credentials::default(),
            problem_files: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRequestWire {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    repo_url: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    commit_hash: Option<String>,
    #[serde(default)]
    repo_slug: Option<String>,
    #[serde(default)]
    uploaded_zip: Option<UploadedFile>,
    task_description: String,
    #[serde(default)]
    test_command: Option<String>,
    #[serde(default)]
    profile: Option<Profile>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    credentials: Credentials,
    #[serde(default)]
    problem_files: Vec<UploadedFile>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl TryFrom<JobRequestWire> for JobRequest {
    type Error = String;

    fn try_from(wire: JobRequestWire) -> Result<Self, Self::Error> {
        let repo_url = non_empty(wire.repo_url);
        let upload = wire.uploaded_zip.filter(|z| !z.base64.trim().is_empty());

        let source = match (repo_url, upload) {
            (Some(_), Some(_)) => {
                return Err("repoUrl and uploadedZip are mutually exclusive".to_string())
            }
            (None, None) => return Err("either repoUrl or uploadedZip is required".to_string()),
            (Some(repo_url), None) => JobSource::Repository(RepositorySource {
                repo_url,
                branch: non_empty(wire.branch).ok_or("branch is required with repoUrl")?,
                commit_hash: non_empty(wire.commit_hash),
                repo_slug: non_empty(wire.repo_slug),
            }),
            (None, Some(archive)) => JobSource::Upload(UploadSource {
                archive,
                branch: non_empty(wire.branch),
            }),
        };

        if wire.task_description.trim().is_empty() {
            return Err("taskDescription must not be empty".to_string());
        }

        Ok(Self {
            job_id: non_empty(wire.job_id),
            source,
            task_description: wire.task_description,
            test_command: non_empty(wire.test_command),
            profile: wire.profile.unwrap_or_default(),
            model: non_empty(wire.model),
            credentials: wire.credentials,
            problem_files: wire.problem_files,
        })
    }
}

/// Lifecycle state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage accumulated over every model round-trip of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub cached_prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Add one response's usage.
    pub fn add(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.input_tokens;
        self.cached_prompt_tokens += usage.cached_input_tokens;
        self.completion_tokens += usage.output_tokens;
        self.total_tokens += usage.total();
        if let Some(cost) = usage.cost {
            self.cost = Some(self.cost.unwrap_or(0.0) + cost);
        }
    }
}

/// The zip handed back for upload jobs.
#[derive(Clone, PartialEq, Eq)]
pub struct ResultArchive {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ResultArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultArchive")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// What a job produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub summary: Option<String>,
    pub changed_files: Vec<String>,
    pub patch: Option<String>,
    pub pull_request_url: Option<String>,
    pub result_archive: Option<ResultArchive>,
}

/// One job and everything known about it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub request: Arc<JobRequest>,
    pub status: JobStatus,
    /// Model actually used, once resolved.
    pub model: Option<String>,
    pub output: JobOutput,
    pub usage: Usage,
    pub error: Option<String>,
    /// Timestamped diagnostic lines, append-only.
    pub logs: Vec<String>,
    pub workspace: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `PENDING` job.
    pub fn new(id: impl Into<String>, request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            request: Arc::new(request),
            status: JobStatus::Pending,
            model: None,
            output: JobOutput::default(),
            usage: Usage::default(),
            error: None,
            logs: Vec::new(),
            workspace: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_upload(&self) -> bool {
        self.request.source.is_upload()
    }

    /// Snapshot for status queries, without credential blobs or archive bytes.
    pub fn view(&self) -> JobView {
        let request = &self.request;
        let (repo_url, branch, commit_hash, upload_filename) = match &request.source {
            JobSource::Repository(repo) => (
                Some(crate::git::redact_url_credentials(&repo.repo_url)),
                Some(repo.branch.clone()),
                repo.commit_hash.clone(),
                None,
            ),
            JobSource::Upload(upload) => (
                None,
                upload.branch.clone(),
                None,
                upload.archive.filename.clone(),
            ),
        };
        let archive = self.output.result_archive.as_ref();

        JobView {
            job_id: self.id.clone(),
            status: self.status,
            repo_url,
            branch,
            commit_hash,
            upload_filename,
            task_description: request.task_description.clone(),
            test_command: request.test_command.clone(),
            profile: request.profile,
            model: self.model.clone().or_else(|| request.model.clone()),
            summary: self.output.summary.clone(),
            changed_files: self.output.changed_files.clone(),
            patch: self.output.patch.clone(),
            pull_request_url: self.output.pull_request_url.clone(),
            result_archive_ready: archive.is_some(),
            result_archive_name: archive.map(|a| a.name.clone()),
            usage: self.usage.clone(),
            error: self.error.clone(),
            logs: self.logs.clone(),
            sandbox_path: self.workspace.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Serialisable job status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_filename: Option<String>,
    pub task_description: String,
    pub test_command: Option<String>,
    pub profile: Profile,
    pub model: Option<String>,
    pub summary: Option<String>,
    pub changed_files: Vec<String>,
    pub patch: Option<String>,
    pub pull_request_url: Option<String>,
    pub result_archive_ready: bool,
    pub result_archive_name: Option<String>,
    pub usage: Usage,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub sandbox_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
