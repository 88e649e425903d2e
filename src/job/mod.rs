// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job lifecycle.
//!
//! `PENDING -> RUNNING -> COMPLETED | FAILED`. Submission registers a pending
//! job and spawns its processing task; the task owns the only [`JobRun`] and
//! drives the job to a terminal state. Reads go through the [`JobRegistry`],
//! which fails `RUNNING` jobs that stopped making progress.
//!
//! # Example
//!
//! ```rust,ignore
//! use cifix_sandbox::job::{JobRequest, SandboxProcessor};
//!
//! let processor = SandboxProcessor::from_config(config)?;
//! let job = processor.submit(request).await;
//! let done = processor.wait(&job.id, Duration::from_secs(5)).await;
//! ```

mod processor;
mod registry;
mod run;
mod types;

pub use processor::SandboxProcessor;
pub use registry::{Admission, JobRegistry};
pub use run::JobRun;
pub use types::{
    Credentials, Job, JobOutput, JobRequest, JobSource, JobStatus, JobView, RepositorySource,
    ResultArchive, UploadSource, UploadedFile, Usage,
};
