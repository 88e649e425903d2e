// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The write handle of one job.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::watch;
use tracing::info;

use super::types::{Job, JobOutput, JobStatus};
use crate::error::JobError;
use crate::types::TokenUsage;

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Handle through which the processing task updates its job.
///
/// Only [`JobRegistry::admit`](super::JobRegistry::admit) creates one, so each
/// job has a single writer. Once the job is terminal every update is dropped.
#[derive(Debug, Clone)]
pub struct JobRun {
    id: String,
    sender: Arc<watch::Sender<Job>>,
}

impl JobRun {
    pub(super) fn new(sender: Arc<watch::Sender<Job>>) -> Self {
        let id = sender.borrow().id.clone();
        Self { id, sender }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state of the job.
    pub fn snapshot(&self) -> Job {
        self.sender.borrow().clone()
    }

    /// Apply `f` unless the job is already terminal. Returns whether it ran.
    pub fn update(&self, f: impl FnOnce(&mut Job)) -> bool {
        self.sender.send_if_modified(|job| {
            if job.status.is_terminal() {
                return false;
            }
            f(job);
            job.updated_at = Utc::now();
            true
        })
    }

    /// Append a timestamped line to the job log and mirror it to tracing.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(job_id = %self.id, "{message}");
        self.update(|job| {
            job.logs.push(format!("[{}] {message}", timestamp(Utc::now())));
        });
    }

    pub fn log_all(&self, lines: impl IntoIterator<Item = String>) {
        for line in lines {
            self.log(line);
        }
    }

    pub fn set_running(&self) {
        self.update(|job| job.status = JobStatus::Running);
    }

    pub fn set_model(&self, model: &str) {
        self.update(|job| job.model = Some(model.to_string()));
    }

    pub fn set_workspace(&self, path: PathBuf) {
        self.update(|job| job.workspace = Some(path));
    }

    pub fn add_usage(&self, usage: &TokenUsage) {
        self.update(|job| job.usage.add(usage));
    }

    pub fn set_output(&self, output: JobOutput) {
        self.update(|job| job.output = output);
    }

    pub fn complete(&self) -> bool {
        self.update(|job| job.status = JobStatus::Completed)
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(|job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
        })
    }

    /// Move the job to its terminal state from the pipeline result.
    ///
    /// Returns the recorded outcome, or `None` when something else (the
    /// staleness check, a task abort) already ended the job.
    pub fn settle(&self, result: Result<(), JobError>) -> Option<bool> {
        let success = result.is_ok();
        let recorded = match result {
            Ok(()) => self.complete(),
            Err(e) => self.fail(e.to_string()),
        };
        recorded.then_some(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::types::{JobRequest, JobSource, RepositorySource};

    fn run(id: &str) -> JobRun {
        let job = Job::new(
            id,
            JobRequest::new(
                JobSource::Repository(RepositorySource {
                    repo_url: "https://github.com/acme/app.git".into(),
                    branch: "main".into(),
                    commit_hash: None,
                    repo_slug: None,
                }),
                "task",
            ),
        );
        let (sender, _) = watch::channel(job);
        JobRun::new(Arc::new(sender))
    }

    #[test]
    fn test_settle_records_outcome() {
        let ok = run("ok");
        ok.set_running();
        assert_eq!(ok.settle(Ok(())), Some(true));
        assert_eq!(ok.snapshot().status, JobStatus::Completed);

        let failed = run("failed");
        failed.set_running();
        assert_eq!(
            failed.settle(Err(JobError::Internal("stopped".into()))),
            Some(false)
        );
        assert_eq!(failed.snapshot().status, JobStatus::Failed);
    }

    #[test]
    fn test_settle_after_external_failure_is_ignored() {
        let run = run("late");
        run.set_running();
        assert!(run.fail("job timed out"));

        assert_eq!(run.settle(Ok(())), None);
        let job = run.snapshot();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("job timed out"));
    }
}
