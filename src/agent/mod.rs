// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent module - the model tool-calling loop.
//!
//! send transcript -> receive response -> run tool calls in order -> repeat,
//! until a response arrives with no tool calls. Its text is the job summary.
//!
//! # Example
//!
//! ```rust,ignore
//! use cifix_sandbox::agent::{Agent, AgentCallbacks, AgentOptions, SandboxBrief};
//!
//! let mut agent = Agent::new(AgentOptions {
//!     provider,
//!     tool_registry,
//!     callbacks: AgentCallbacks::default(),
//! });
//! let outcome = agent.run(&brief, "Fix the failing test in FooTest").await?;
//! println!("{}", outcome.summary);
//! ```

mod prompt;
mod types;

pub use prompt::system_prompt;
pub use types::{AgentCallbacks, AgentOptions, AgentOutcome, AgentState, RunStats, SandboxBrief};

use std::collections::HashSet;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;

#[cfg(feature = "telemetry")]
use tracing::debug;

use crate::budget::truncate;
use crate::error::ProviderError;
use crate::tools::ToolRegistry;
use crate::types::{BoxedProvider, ContentBlock, Message, MessageContent, Role, ToolCall};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Characters kept in log previews of arguments and results.
const LOG_PREVIEW_CHARS: usize = 240;

/// Longest call id echoed back to the model endpoint.
const MAX_CALL_ID_CHARS: usize = 64;

static INVALID_ID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("static regex"));

/// Normalize a model-issued call id into `[a-zA-Z0-9_-]+`, falling back to
/// `call_{index}` when nothing usable remains.
pub fn normalize_call_id(raw: &str, index: usize) -> String {
    let cleaned = INVALID_ID_CHARS.replace_all(raw.trim(), "_");
    let cleaned: String = cleaned.chars().take(MAX_CALL_ID_CHARS).collect();
    if cleaned.trim_matches('_').is_empty() {
        format!("call_{index}")
    } else {
        cleaned
    }
}

/// Normalize every call id in one response, keeping them distinct so each
/// tool output pairs with exactly one call. A collision gets `_{index}`.
pub fn unique_call_ids<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(index, id)| {
            let base = normalize_call_id(id, index);
            let mut candidate = base.clone();
            let mut attempt = 0;
            while seen.contains(&candidate) {
                let suffix = if attempt == 0 {
                    format!("_{index}")
                } else {
                    format!("_{index}_{attempt}")
                };
                let keep = MAX_CALL_ID_CHARS.saturating_sub(suffix.len());
                candidate = format!("{}{suffix}", base.chars().take(keep).collect::<String>());
                attempt += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Drives one job's conversation with the model.
pub struct Agent {
    provider: BoxedProvider,
    tool_registry: ToolRegistry,
    callbacks: AgentCallbacks,
    state: AgentState,
}

impl Agent {
    pub fn new(options: AgentOptions) -> Self {
        Self {
            provider: options.provider,
            tool_registry: options.tool_registry,
            callbacks: options.callbacks,
            state: AgentState::default(),
        }
    }

    /// The transcript so far.
    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    fn log(&self, line: impl AsRef<str>) {
        if let Some(ref on_log) = self.callbacks.on_log {
            on_log(line.as_ref());
        }
    }

    /// Seed the transcript with the system and task messages.
    fn seed(&mut self, brief: &SandboxBrief, task: &str) {
        let budget = &self.tool_registry.context().budget;
        let task = budget.truncate_task(task);
        if task.was_truncated() {
            self.log(format!(
                "task description truncated to {} chars (omitted {} chars, profile={})",
                budget.limits().task_chars,
                task.omitted,
                budget.profile().as_str()
            ));
        }

        self.state.messages.clear();
        self.state.current_iteration = 0;
        self.state.messages.push(Message::system(system_prompt(brief)));
        self.state.messages.push(Message::user(task.text));
    }

    /// Run the loop until the model answers without tool calls.
    ///
    /// There is no iteration cap; a stuck job is reclaimed by the registry's
    /// staleness check. Tool failures never end the loop; only a provider
    /// error does.
    pub async fn run(
        &mut self,
        brief: &SandboxBrief,
        task: &str,
    ) -> Result<AgentOutcome, ProviderError> {
        let start = Instant::now();
        let mut stats = RunStats::default();
        let tools = self.tool_registry.definitions();

        self.seed(brief, task);
        self.log(format!(
            "model loop started (model={}, profile={}); waiting for tool calls",
            self.provider.model(),
            brief.profile.as_str()
        ));

        let summary = loop {
            self.state.current_iteration += 1;
            stats.iterations += 1;

            self.log(format!(
                "sending {} messages to the model (tools={})",
                self.state.messages.len(),
                tools.len()
            ));
            let response = self.provider.chat(&self.state.messages, &tools).await?;

            if let Some(ref usage) = response.usage {
                stats.usage.accumulate(usage);
                if let Some(ref on_usage) = self.callbacks.on_usage {
                    on_usage(usage);
                }
            }

            let ids = unique_call_ids(response.tool_calls.iter().map(|c| c.id.as_str()));
            let calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .zip(ids)
                .map(|(call, id)| ToolCall {
                    id,
                    name: call.name.clone(),
                    input: call.input.clone(),
                })
                .collect();

            self.log(format!(
                "model returned {} tool calls (calls=[{}], text=\"{}\")",
                calls.len(),
                calls
                    .iter()
                    .map(|c| format!("{}(callId={})", c.name, c.id))
                    .collect::<Vec<_>>()
                    .join(", "),
                truncate(&response.content, LOG_PREVIEW_CHARS).text
            ));

            if calls.is_empty() {
                if !response.content.is_empty() {
                    self.state
                        .messages
                        .push(Message::assistant(response.content.clone()));
                }
                self.log(format!(
                    "final summary from model: \"{}\"",
                    truncate(&response.content, LOG_PREVIEW_CHARS).text
                ));
                break response.content;
            }

            let mut blocks = Vec::with_capacity(calls.len() + 1);
            if !response.content.is_empty() {
                blocks.push(ContentBlock::text(&response.content));
            }
            for call in &calls {
                blocks.push(ContentBlock::tool_use(&call.id, &call.name, call.input.clone()));
            }
            self.state.messages.push(Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(blocks),
            });

            let mut outputs = Vec::with_capacity(calls.len());
            for call in &calls {
                outputs.push(self.execute_tool(call, &mut stats).await);
            }
            self.state.messages.extend(outputs);
        };

        stats.duration_ms = start.elapsed().as_millis() as u64;

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_operation("agent.run", start.elapsed());
            debug!(
                iterations = stats.iterations,
                tool_calls = stats.tool_call_count,
                "Agent loop finished"
            );
        }

        self.log("model finished without further tool calls");
        Ok(AgentOutcome { summary, stats })
    }

    /// Run one call and build its paired output message.
    async fn execute_tool(&self, call: &ToolCall, stats: &mut RunStats) -> Message {
        self.log(format!(
            "running tool {} (callId={}, args={})",
            call.name,
            call.id,
            truncate(&call.input.to_string(), LOG_PREVIEW_CHARS).text
        ));

        let result = self.tool_registry.dispatch(call).await;
        for note in &result.notes {
            self.log(note);
        }

        stats.tool_call_count += 1;
        if result.is_error {
            stats.tool_error_count += 1;
            let message = result.output["error"].as_str().unwrap_or("unknown error");
            self.log(format!("tool {} failed: {message}", result.tool_name));
        } else {
            self.log(format!(
                "tool {} result (callId={}, {}ms): {}",
                result.tool_name,
                call.id,
                result.duration.as_millis(),
                truncate(&result.output.to_string(), LOG_PREVIEW_CHARS).text
            ));
        }

        let budget = &self.tool_registry.context().budget;
        let prepared = budget.prepare_tool_output(&result.output);
        if prepared.truncated_fields > 0 {
            self.log(format!(
                "tool output for {} truncated {} string fields at {} chars",
                call.id,
                prepared.truncated_fields,
                budget.limits().tool_string_chars
            ));
        }
        if let Some(omitted) = prepared.serialized_omitted {
            self.log(format!(
                "serialized tool output for {} truncated at {} chars (omitted {omitted} chars)",
                call.id,
                budget.limits().tool_serialized_chars
            ));
        }

        if let Some(ref on_tool_result) = self.callbacks.on_tool_result {
            on_tool_result(&call.id, &result);
        }

        Message::tool_output(&call.id, prepared.text, result.is_error)
    }
}
