// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory job registry.
//!
//! Each job lives in a `watch` channel. The processing task is the only
//! writer through its [`JobRun`]; readers get snapshots. A terminal snapshot
//! is never overwritten.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::warn;

use super::run::JobRun;
use super::types::{Job, JobStatus};
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Outcome of [`JobRegistry::admit`].
#[derive(Debug)]
pub enum Admission {
    /// First submission of this id; the caller owns processing.
    Accepted(JobRun),
    /// The id already exists; its current snapshot.
    Existing(Job),
}

#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<watch::Sender<Job>>>>,
    stale_after: Duration,
}

impl JobRegistry {
    /// `stale_after` is how long a `RUNNING` job may go without an update.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            stale_after,
        }
    }

    /// Register a job unless its id is taken.
    pub async fn admit(&self, job: Job) -> Admission {
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.get(&job.id) {
            return Admission::Existing(existing.borrow().clone());
        }
        let id = job.id.clone();
        let (sender, _) = watch::channel(job);
        let sender = Arc::new(sender);
        jobs.insert(id, sender.clone());
        Admission::Accepted(JobRun::new(sender))
    }

    /// Current snapshot, after the staleness check.
    pub async fn get(&self, id: &str) -> Option<Job> {
        let sender = self.jobs.read().await.get(id).cloned()?;
        self.expire_if_stale(&sender);
        let job = sender.borrow().clone();
        Some(job)
    }

    /// Receiver that sees every update of a job.
    pub async fn subscribe(&self, id: &str) -> Option<watch::Receiver<Job>> {
        self.jobs.read().await.get(id).map(|s| s.subscribe())
    }

    /// Snapshots of all jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let senders: Vec<_> = self.jobs.read().await.values().cloned().collect();
        let mut jobs: Vec<Job> = senders
            .iter()
            .map(|s| {
                self.expire_if_stale(s);
                s.borrow().clone()
            })
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Force a `RUNNING` job with no recent update into `FAILED`.
    fn expire_if_stale(&self, sender: &watch::Sender<Job>) {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        sender.send_if_modified(|job| {
            if job.status != JobStatus::Running {
                return false;
            }
            let now = Utc::now();
            if now.signed_duration_since(job.updated_at) <= stale_after {
                return false;
            }
            let message = format!(
                "job timed out: no progress for more than {}s",
                self.stale_after.as_secs()
            );
            warn!(job_id = %job.id, "{message}");
            job.logs.push(format!("[{}] {message}", super::run::timestamp(now)));
            job.status = JobStatus::Failed;
            job.error = Some(message);
            job.updated_at = now;
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.record_job(false);
            true
        });
    }
}
