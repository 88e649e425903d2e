// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandboxed tools the model can call.
//!
//! # Architecture
//!
//! - [`ToolKind`] - the closed set of tools, one variant per tool name
//! - [`ToolInvocation`] - a call parsed into typed arguments for its kind
//! - [`ToolRegistry`] - holds the per-job [`ToolContext`] and dispatches
//!   invocations with an exhaustive match
//! - Individual handlers in the [`handlers`] module
//!
//! Every handler failure becomes a `{"error": message}` output; nothing a tool
//! does can fail the job.
//!
//! # Example
//!
//! ```rust,ignore
//! use cifix_sandbox::tools::{ToolContext, ToolRegistry};
//!
//! let registry = ToolRegistry::new(ToolContext::new(guard, env, &config, budget)?);
//! let result = registry.dispatch(&call).await;
//! ```

pub mod handlers;
pub mod registry;

pub use registry::{error_output, DispatchResult, ToolContext, ToolNotes, ToolRegistry};

use serde::Deserialize;

use crate::error::ToolError;
use crate::types::ToolDefinition;

use handlers::{http_get, read_file, run_shell, write_file};

/// The tools exposed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    RunShell,
    ReadFile,
    WriteFile,
    HttpGet,
}

impl ToolKind {
    /// Every tool, in the order definitions are sent to the model.
    pub const ALL: [ToolKind; 4] = [
        ToolKind::RunShell,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::HttpGet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RunShell => "run_shell",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::HttpGet => "http_get",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name.trim())
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Self::RunShell => run_shell::definition(),
            Self::ReadFile => read_file::definition(),
            Self::WriteFile => write_file::definition(),
            Self::HttpGet => http_get::definition(),
        }
    }
}

/// Definitions for every tool.
pub fn definitions() -> Vec<ToolDefinition> {
    ToolKind::ALL.iter().map(ToolKind::definition).collect()
}

/// A tool call with its arguments parsed for the tool's kind.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    RunShell(run_shell::RunShellArgs),
    ReadFile(read_file::ReadFileArgs),
    WriteFile(write_file::WriteFileArgs),
    HttpGet(http_get::HttpGetArgs),
}

impl ToolInvocation {
    /// Resolve the tool name and parse its arguments.
    pub fn parse(name: &str, input: &serde_json::Value) -> Result<Self, ToolError> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        Ok(match kind {
            ToolKind::RunShell => Self::RunShell(parse_arguments(input)?),
            ToolKind::ReadFile => Self::ReadFile(parse_arguments(input)?),
            ToolKind::WriteFile => Self::WriteFile(parse_arguments(input)?),
            ToolKind::HttpGet => Self::HttpGet(parse_arguments(input)?),
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::RunShell(_) => ToolKind::RunShell,
            Self::ReadFile(_) => ToolKind::ReadFile,
            Self::WriteFile(_) => ToolKind::WriteFile,
            Self::HttpGet(_) => ToolKind::HttpGet,
        }
    }
}

/// Parse JSON arguments into a typed struct.
///
/// Models occasionally send the argument object as a JSON-encoded string;
/// that form is unwrapped first.
pub fn parse_arguments<T>(arguments: &serde_json::Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    let decoded;
    let value = match arguments {
        serde_json::Value::String(raw) => {
            decoded = serde_json::from_str::<serde_json::Value>(raw).map_err(|err| {
                ToolError::InvalidInput(format!("arguments are not valid JSON: {err}"))
            })?;
            &decoded
        }
        other => other,
    };
    T::deserialize(value)
        .map_err(|err| ToolError::InvalidInput(format!("Failed to parse arguments: {err}")))
}
