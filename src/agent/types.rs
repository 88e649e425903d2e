// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent types and callbacks.

use std::path::PathBuf;
use std::sync::Arc;

use crate::budget::Profile;
use crate::tools::{DispatchResult, ToolRegistry};
use crate::types::{BoxedProvider, Message, TokenUsage};

/// What the model is told about its sandbox.
#[derive(Debug, Clone)]
pub struct SandboxBrief {
    /// Repository root the tools are confined to.
    pub root: PathBuf,
    /// Suggested test command, if the caller supplied one.
    pub test_command: Option<String>,
    pub profile: Profile,
    /// Auxiliary attachments, relative to `root`.
    pub problem_files: Vec<String>,
}

/// Statistics for one agent run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Model round-trips.
    pub iterations: usize,
    /// Number of tool calls executed.
    pub tool_call_count: usize,
    /// Tool calls that came back as `{"error": ...}`.
    pub tool_error_count: usize,
    /// Usage summed over every round-trip.
    pub usage: TokenUsage,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Result of a completed agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Text of the final tool-call-free response.
    pub summary: String,
    pub stats: RunStats,
}

/// Callbacks for agent events.
///
/// Uses `Arc` so the job runner can hand the same closures to every stage.
#[derive(Clone, Default)]
pub struct AgentCallbacks {
    /// Called with each diagnostic line for the job log.
    pub on_log: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Called with the usage of every model response.
    pub on_usage: Option<Arc<dyn Fn(&TokenUsage) + Send + Sync>>,
    /// Called after each tool call completes (call id, result).
    pub on_tool_result: Option<Arc<dyn Fn(&str, &DispatchResult) + Send + Sync>>,
}

impl std::fmt::Debug for AgentCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCallbacks")
            .field("on_log", &self.on_log.is_some())
            .field("on_usage", &self.on_usage.is_some())
            .field("on_tool_result", &self.on_tool_result.is_some())
            .finish()
    }
}

/// Options for creating an agent.
pub struct AgentOptions {
    /// Model provider to use.
    pub provider: BoxedProvider,
    /// Tools bound to this job's workspace.
    pub tool_registry: ToolRegistry,
    /// Event callbacks.
    pub callbacks: AgentCallbacks,
}

/// Internal state of the agent.
#[derive(Debug, Default)]
pub struct AgentState {
    /// Conversation transcript, system message first.
    pub messages: Vec<Message>,
    /// Current iteration.
    pub current_iteration: usize,
}
