// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the sandbox job processor.
//!
//! Each concern gets its own `thiserror` enum. Tool errors never escape the
//! agent loop (they are handed back to the model as data); everything else
//! funnels into [`JobError`] and is recorded once on the job.

use thiserror::Error;

/// Errors that can occur while talking to the model inference endpoint.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::NetworkError(_))
    }
}

/// Containment violations raised by the path and network guards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("path must not be empty")]
    EmptyPath,

    #[error("path escapes the sandbox root: {0}")]
    OutsideRoot(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("only http and https URLs are allowed, got {0}")]
    UnsupportedScheme(String),

    #[error("requests to local or private network addresses are blocked: {0}")]
    BlockedHost(String),

    #[error("could not resolve host {0}")]
    Unresolvable(String),
}

/// Errors that can occur during tool execution.
///
/// These are always converted into an `{"error": ...}` tool output.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File is not valid UTF-8: {0}")]
    InvalidEncoding(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Security violation: {0}")]
    SecurityViolation(#[from] GuardError),
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors raised while writing uploaded secrets into the workspace.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("{what} is not valid base64: {message}")]
    Decode { what: &'static str, message: String },

    #[error("registry token looks like a private key; upload the personal access token instead")]
    LooksLikePrivateKey,

    #[error("registry token file is empty")]
    EmptyToken,

    #[error("invalid registry URL pattern: {0}")]
    Pattern(String),

    #[error("failed to write credential: {0}")]
    Io(#[from] std::io::Error),
}

/// A git subprocess failure. Messages are redacted before construction.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(String),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

/// Errors while materializing the source tree.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("corrupt archive: {0}")]
    Archive(String),

    #[error("archive entry escapes the destination directory: {0}")]
    ZipSlip(String),

    #[error("invalid git ref: {0}")]
    InvalidRef(String),

    #[error("failed to extract archive: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors during change collection or pull request publication.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to build result archive: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fatal pipeline error. Recorded as `job.error`, moves the job to `FAILED`.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("workspace setup failed: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("{0}")]
    Internal(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
