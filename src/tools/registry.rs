// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool dispatch.
//!
//! - [`ToolContext`] carries everything a handler may touch for one job
//! - [`ToolRegistry`] parses a model call into a [`ToolInvocation`] and runs it
//! - [`DispatchResult`] is the JSON output plus the log lines the handler produced

use std::time::{Duration, Instant};

use serde_json::{json, Value};

#[cfg(feature = "telemetry")]
use tracing::{debug, info_span, Instrument};

use crate::budget::ContextBudget;
use crate::config::{SandboxConfig, ShellSettings};
use crate::error::ToolError;
use crate::guard::PathGuard;
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
use crate::types::{ToolCall, ToolDefinition};
use crate::workspace::ChildEnv;

use super::handlers::{http_get, read_file, run_shell, write_file};
use super::{ToolInvocation, ToolKind};

/// Per-job state shared by all tool handlers.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub guard: PathGuard,
    pub env: ChildEnv,
    pub shell: ShellSettings,
    pub http_timeout: Duration,
    pub budget: ContextBudget,
    pub http: reqwest::Client,
}

impl ToolContext {
    pub fn new(
        guard: PathGuard,
        env: ChildEnv,
        config: &SandboxConfig,
        budget: ContextBudget,
    ) -> Result<Self, ToolError> {
        Ok(Self {
            guard,
            env,
            shell: config.shell.clone(),
            http_timeout: config.http.timeout,
            budget,
            http: http_get::build_client(config.http.timeout)?,
        })
    }
}

/// Lines a handler wants recorded in the job log.
pub type ToolNotes = Vec<String>;

/// Dispatches tool calls for one job.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    ctx: ToolContext,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        super::definitions()
    }

    /// Run one tool call. Never fails: errors become `{"error": message}`.
    ///
    /// When the `telemetry` feature is enabled, this method is instrumented
    /// with tracing spans and records metrics.
    pub async fn dispatch(&self, call: &ToolCall) -> DispatchResult {
        let mut notes = ToolNotes::new();
        let tool_name = ToolKind::from_name(&call.name)
            .map(|k| k.name().to_string())
            .unwrap_or_else(|| call.name.clone());

        #[cfg(feature = "telemetry")]
        debug!(tool = %tool_name, "Executing tool");

        let start = Instant::now();
        let result = match ToolInvocation::parse(&call.name, &call.input) {
            Ok(invocation) => {
                #[cfg(feature = "telemetry")]
                let result = self
                    .execute(invocation, &mut notes)
                    .instrument(info_span!("tool_execute", tool = %tool_name))
                    .await;

                #[cfg(not(feature = "telemetry"))]
                let result = self.execute(invocation, &mut notes).await;

                result
            }
            Err(err) => Err(err),
        };
        let duration = start.elapsed();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tool(&tool_name, duration, result.is_ok());

        match result {
            Ok(output) => {
                #[cfg(feature = "telemetry")]
                debug!(
                    tool = %tool_name,
                    duration_ms = duration.as_secs_f64() * 1000.0,
                    "Tool execution succeeded"
                );
                DispatchResult {
                    tool_name,
                    output,
                    notes,
                    duration,
                    is_error: false,
                }
            }
            Err(err) => {
                #[cfg(feature = "telemetry")]
                debug!(
                    tool = %tool_name,
                    duration_ms = duration.as_secs_f64() * 1000.0,
                    error = %err,
                    "Tool execution failed"
                );
                DispatchResult {
                    tool_name,
                    output: error_output(&err),
                    notes,
                    duration,
                    is_error: true,
                }
            }
        }
    }

    async fn execute(&self, invocation: ToolInvocation, notes: &mut ToolNotes) -> Result<Value, ToolError> {
        match invocation {
            ToolInvocation::RunShell(args) => run_shell::execute(args, &self.ctx, notes).await,
            ToolInvocation::ReadFile(args) => read_file::execute(args, &self.ctx, notes).await,
            ToolInvocation::WriteFile(args) => write_file::execute(args, &self.ctx, notes).await,
            ToolInvocation::HttpGet(args) => http_get::execute(args, &self.ctx, notes).await,
        }
    }
}

/// The structured error handed back to the model.
pub fn error_output(err: &ToolError) -> Value {
    json!({ "error": err.to_string() })
}

/// Result of dispatching a tool call.
#[derive(Debug)]
pub struct DispatchResult {
    /// Name of the tool that was called
    pub tool_name: String,
    /// JSON output, or `{"error": ...}`
    pub output: Value,
    /// Job-log lines produced while running
    pub notes: ToolNotes,
    pub duration: Duration,
    pub is_error: bool,
}
