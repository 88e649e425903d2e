// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! cifix sandbox - runs automated code-fix jobs in throwaway workspaces.
//!
//! A job names a git repository (or carries a zip upload) and a task. The
//! processor prepares an isolated workspace, installs the job's credentials,
//! fetches the source, lets a model edit it through a small set of guarded
//! tools, and hands back the diff, a result archive or a pull request.
//!
//! # Architecture
//!
//! - [`job`] - Job types, the in-memory registry and the processing pipeline
//! - [`workspace`] - Per-job directories and the child-process environment
//! - [`credentials`] - SSH key, cloud credentials, registry token and attachments
//! - [`acquire`] - Repository clone and zip upload extraction
//! - [`agent`] - The model/tool loop
//! - [`tools`] - Tool handlers and registry
//! - [`guard`] - Path containment and outbound URL checks
//! - [`budget`] - Context-size caps per cost profile
//! - [`git`] - Git subprocess wrapper and credential-safe URL helpers
//! - [`publish`] - Change collection, result archives and pull requests
//! - [`providers`] - OpenAI-compatible chat-completions client
//! - [`types`] - Transcript, tool schema and provider traits
//! - [`config`] - Configuration loading
//! - [`error`] - Error types
//! - [`telemetry`] - Tracing and metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cifix_sandbox::{config::load_config, JobRequest, SandboxProcessor};
//!
//! let config = Arc::new(load_config(None)?);
//! let processor = SandboxProcessor::from_config(config)?;
//! let job = processor.submit(serde_json::from_str::<JobRequest>(body)?).await;
//! ```

pub mod acquire;
pub mod agent;
pub mod budget;
pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod guard;
pub mod job;
pub mod providers;
pub mod publish;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod workspace;

// Re-export commonly used types at crate root
pub use budget::Profile;
pub use config::{load_config, SandboxConfig};
pub use error::{
    AcquireError, ConfigError, CredentialError, GitError, GuardError, JobError, ProviderError,
    PublishError, Result, ToolError,
};
pub use job::{Job, JobRequest, JobStatus, JobView, SandboxProcessor};
pub use providers::OpenAIFactory;
pub use types::{BoxedProvider, Provider, ProviderFactory, ProviderResponse, TokenUsage};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
