// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-job pipeline.
//!
//! workspace -> credentials -> source -> attachments -> agent loop ->
//! changes -> result archive or pull request -> cleanup.
//!
//! Any stage error fails the job once, at the end of [`SandboxProcessor::process`].
//! Publication problems are only logged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use super::registry::{Admission, JobRegistry};
use super::run::JobRun;
use super::types::{Job, JobOutput, JobRequest, JobSource, ResultArchive};
use crate::acquire::{clone_repository, extract_upload};
use crate::agent::{Agent, AgentCallbacks, AgentOptions, SandboxBrief};
use crate::budget::ContextBudget;
use crate::config::SandboxConfig;
use crate::credentials::{
    install_cloud_credentials, install_problem_files, install_registry_token, install_ssh_key,
};
use crate::error::{JobError, PublishError};
use crate::git::{resolve_github_auth, Git, GithubAuth};
use crate::guard::PathGuard;
use crate::providers::OpenAIFactory;
use crate::publish::{
    build_result_archive, collect_changes, format_bytes, maybe_create_pull_request,
    result_archive_name, GithubClient, PullRequestClient, PullRequestJob,
};
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{SharedProviderFactory, TokenUsage};
use crate::workspace::{Retention, Workspace};

/// Runs submitted jobs, each on its own task.
#[derive(Clone)]
pub struct SandboxProcessor {
    config: Arc<SandboxConfig>,
    registry: Arc<JobRegistry>,
    providers: SharedProviderFactory,
    pull_requests: Arc<dyn PullRequestClient>,
}

impl std::fmt::Debug for SandboxProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxProcessor")
            .field("base_dir", &self.config.workspace.base_dir)
            .finish_non_exhaustive()
    }
}

impl SandboxProcessor {
    pub fn new(
        config: Arc<SandboxConfig>,
        providers: SharedProviderFactory,
        pull_requests: Arc<dyn PullRequestClient>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new(config.job_stale_timeout));
        Self {
            config,
            registry,
            providers,
            pull_requests,
        }
    }

    /// Processor wired to the OpenAI-compatible endpoint and the GitHub API.
    pub fn from_config(config: Arc<SandboxConfig>) -> Result<Self, PublishError> {
        let providers = Arc::new(OpenAIFactory::from_settings(&config.model));
        let github = Arc::new(GithubClient::new(config.github.api_base.clone())?);
        Ok(Self::new(config, providers, github))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Accept a job and schedule it.
    ///
    /// A known id returns the existing job untouched and schedules nothing.
    pub async fn submit(&self, request: JobRequest) -> Job {
        let id = request
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.registry.admit(Job::new(id, request)).await {
            Admission::Existing(job) => {
                info!(job_id = %job.id, status = %job.status, "duplicate submission ignored");
                job
            }
            Admission::Accepted(run) => {
                let snapshot = run.snapshot();
                let watcher = run.clone();
                let processor = self.clone();
                let worker = tokio::spawn(async move { processor.process(run).await });
                tokio::spawn(async move {
                    if let Err(e) = worker.await {
                        warn!(job_id = %watcher.id(), "job task aborted: {e}");
                        if watcher.fail(format!("job task aborted: {e}")) {
                            #[cfg(feature = "telemetry")]
                            GLOBAL_METRICS.record_job(false);
                        }
                    }
                });
                snapshot
            }
        }
    }

    /// Current snapshot of a job.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.registry.get(id).await
    }

    /// Wait until a job is terminal, re-checking staleness every `poll`.
    pub async fn wait(&self, id: &str, poll: Duration) -> Option<Job> {
        let mut updates = self.registry.subscribe(id).await?;
        loop {
            let job = self.registry.get(id).await?;
            if job.status.is_terminal() {
                return Some(job);
            }
            let _ = tokio::time::timeout(poll, updates.changed()).await;
        }
    }

    /// Run one job to a terminal state.
    pub async fn process(&self, run: JobRun) {
        let start = Instant::now();
        run.set_running();
        let request = run.snapshot().request;
        let model = self
            .config
            .model_for(request.profile, request.model.as_deref());
        run.set_model(&model);

        let base_dir = &self.config.workspace.base_dir;
        run.log(format!("Preparing workspace under {}", base_dir.display()));
        let workspace =
            match Workspace::allocate(base_dir, run.id(), self.config.workspace.keep).await {
                Ok(ws) => ws,
                Err(e) => {
                    let err = JobError::Workspace(e);
                    run.log(format!("Job failed: {err}"));
                    self.finish(&run, Err(err), start);
                    return;
                }
            };
        run.set_workspace(workspace.root().to_path_buf());
        run.log(format!("Workspace created at {}", workspace.root().display()));
        run.log(format!("Profile {} selected; model {model}", request.profile));
        if request.profile.is_economy() {
            let limits = self.config.limits(request.profile);
            run.log(format!(
                "Economy mode: task limit={}, tool output limit={}, http_get limit={}",
                limits.task_chars, limits.tool_string_chars, limits.http_body_chars
            ));
        }

        let result = self.run_pipeline(&run, &request, &workspace, &model).await;
        match &result {
            Ok(()) => run.log("Job completed successfully"),
            Err(e) => run.log(format!("Job failed: {e}")),
        }

        run.log(format!("Cleaning up workspace {}", workspace.root().display()));
        match workspace.finish().await {
            Retention::Kept(path) => run.log(format!("Workspace kept at {}", path.display())),
            Retention::Removed => run.log("Workspace removed"),
            Retention::RemoveFailed(message) => {
                run.log(format!("Failed to remove workspace: {message}"))
            }
        }

        self.finish(&run, result, start);
    }

    fn finish(&self, run: &JobRun, result: Result<(), JobError>, start: Instant) {
        let Some(success) = run.settle(result) else {
            warn!(job_id = %run.id(), "job already ended before the pipeline finished");
            return;
        };

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_job(success);
            GLOBAL_METRICS.record_operation("job.process", start.elapsed());
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        info!(job_id = %run.id(), success, "job finished");
    }

    async fn run_pipeline(
        &self,
        run: &JobRun,
        request: &JobRequest,
        workspace: &Workspace,
        model: &str,
    ) -> Result<(), JobError> {
        let home = workspace.home();
        let repo = workspace.repo_dir();
        let mut env = workspace.child_env();
        let mut notes = Vec::new();
        let credentials = &request.credentials;

        if let Some(file) = &credentials.gcp_credentials {
            let result = install_cloud_credentials(home, file, &mut env, &mut notes).await;
            run.log_all(notes.drain(..));
            result?;
        } else {
            env.set(
                "CLOUDSDK_CONFIG",
                home.join(".config").join("gcloud").to_string_lossy(),
            );
        }
        if let Some(file) = &credentials.ssh_key {
            let result = install_ssh_key(home, file, &mut env, &mut notes).await;
            run.log_all(notes.drain(..));
            result?;
        }

        let (baseline, auth): (Option<String>, Option<GithubAuth>) = match &request.source {
            JobSource::Upload(upload) => {
                let result = extract_upload(upload, repo, &env, &mut notes).await;
                run.log_all(notes.drain(..));
                (result?, None)
            }
            JobSource::Repository(source) => {
                let auth = resolve_github_auth(&self.config.github, &source.repo_url);
                if auth.token.is_some() {
                    run.log(format!(
                        "GitHub token from {} will be used for clone, push and pull request",
                        auth.source
                    ));
                } else {
                    run.log("No GitHub token configured; authenticated operations may fail");
                }
                let result =
                    clone_repository(source, &auth, workspace.root(), repo, &env, &mut notes).await;
                run.log_all(notes.drain(..));
                (result?, Some(auth))
            }
        };
        match &baseline {
            Some(commit) => run.log(format!("Baseline commit {commit}")),
            None => run.log("No baseline commit; diff will be empty"),
        }

        let result = install_problem_files(repo, &request.problem_files, &mut notes).await;
        run.log_all(notes.drain(..));
        let problem_files = result?;

        if let Some(file) = &credentials.registry_token {
            let result = install_registry_token(
                home,
                repo,
                file,
                &self.config.registry,
                &mut env,
                &mut notes,
            )
            .await;
            run.log_all(notes.drain(..));
            result?;
        }

        let provider = self.providers.create(model)?;
        let budget = ContextBudget::new(request.profile, self.config.limits(request.profile).clone());
        let guard = PathGuard::new(repo).map_err(JobError::Workspace)?;
        let ctx = ToolContext::new(guard, env.clone(), &self.config, budget)
            .map_err(|e| JobError::Internal(format!("tool setup failed: {e}")))?;

        let log_run = run.clone();
        let usage_run = run.clone();
        let mut agent = Agent::new(AgentOptions {
            provider,
            tool_registry: ToolRegistry::new(ctx),
            callbacks: AgentCallbacks {
                on_log: Some(Arc::new(move |line: &str| log_run.log(line))),
                on_usage: Some(Arc::new(move |usage: &TokenUsage| usage_run.add_usage(usage))),
                on_tool_result: None,
            },
        });

        run.log(format!("Starting model interaction ({model})"));
        let brief = SandboxBrief {
            root: repo.to_path_buf(),
            test_command: request.test_command.clone(),
            profile: request.profile,
            problem_files,
        };
        let outcome = agent.run(&brief, &request.task_description).await?;
        run.log(format!(
            "Agent finished after {} round-trips and {} tool calls ({} failed)",
            outcome.stats.iterations, outcome.stats.tool_call_count, outcome.stats.tool_error_count
        ));

        let git = Git::new(repo, env.clone());
        let changes = collect_changes(&git, baseline.as_deref(), &mut notes).await;
        run.log_all(notes.drain(..));
        run.log(format!("{} files changed", changes.changed_files.len()));

        let mut output = JobOutput {
            summary: Some(outcome.summary),
            changed_files: changes.changed_files,
            patch: Some(changes.patch),
            ..JobOutput::default()
        };
        run.set_output(output.clone());

        match (&request.source, auth) {
            (JobSource::Upload(upload), _) => {
                match build_result_archive(repo).await {
                    Ok(bytes) => {
                        let name =
                            result_archive_name(upload.archive.filename.as_deref(), run.id());
                        run.log(format!(
                            "Result archive {name} created ({})",
                            format_bytes(bytes.len())
                        ));
                        output.result_archive = Some(ResultArchive { name, bytes });
                    }
                    Err(e) => run.log(format!("Failed to build result archive: {e}")),
                }
                run.log("Upload job; automatic pull request skipped");
            }
            (JobSource::Repository(source), Some(auth)) => {
                let pr_job = PullRequestJob {
                    job_id: run.id(),
                    source,
                    task: &request.task_description,
                    summary: output.summary.as_deref(),
                    patch: output.patch.as_deref().unwrap_or_default(),
                };
                let url = maybe_create_pull_request(
                    pr_job,
                    &auth,
                    &git,
                    &self.config.github,
                    self.pull_requests.as_ref(),
                    &mut notes,
                )
                .await;
                run.log_all(notes.drain(..));
                output.pull_request_url = url;
            }
            (JobSource::Repository(_), None) => {}
        }

        run.set_output(output);
        Ok(())
    }
}
