// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context budget policy.
//!
//! Two cost profiles each carry four caps (task text, per-string tool output,
//! serialized tool output, HTTP body). Anything over a cap keeps a prefix and
//! ends with `... [truncated N chars]`, where `N` is exactly what was cut.
//! All lengths are in characters, not bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProfileLimits;

const NOTICE_PREFIX: &str = "... [truncated ";
const NOTICE_SUFFIX: &str = " chars]";

/// Cost profile selected per job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Profile {
    #[default]
    Standard,
    Economy,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::Economy => "ECONOMY",
        }
    }

    pub fn is_economy(&self) -> bool {
        matches!(self, Self::Economy)
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smallest cap that still fits a truncation notice for any realistic input.
pub const MIN_CAP: usize = 64;

/// A string that went through a cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    /// Characters dropped; zero when the input fit.
    pub omitted: usize,
}

impl Truncated {
    pub fn was_truncated(&self) -> bool {
        self.omitted > 0
    }
}

/// Cap `text` at `cap` characters, appending a notice with the omitted count.
///
/// The notice is sized from the input length so the result never exceeds the
/// cap. Re-applying with the same cap is a no-op.
pub fn truncate(text: &str, cap: usize) -> Truncated {
    let len = text.chars().count();
    if len <= cap {
        return Truncated {
            text: text.to_string(),
            omitted: 0,
        };
    }

    let notice_len = NOTICE_PREFIX.len() + NOTICE_SUFFIX.len() + digits(len);
    let keep = cap.saturating_sub(notice_len);
    let omitted = len - keep;

    let mut out: String = text.chars().take(keep).collect();
    out.push_str(NOTICE_PREFIX);
    out.push_str(&omitted.to_string());
    out.push_str(NOTICE_SUFFIX);
    Truncated { text: out, omitted }
}

fn digits(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// Tool output ready to hand back to the model.
#[derive(Debug, Clone)]
pub struct PreparedOutput {
    pub text: String,
    /// Number of string leaves that hit the per-string cap.
    pub truncated_fields: usize,
    /// Characters cut from the serialized form, if it hit the serialized cap.
    pub serialized_omitted: Option<usize>,
}

/// Caps for one job, chosen once from its profile.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    profile: Profile,
    limits: ProfileLimits,
}

impl ContextBudget {
    pub fn new(profile: Profile, limits: ProfileLimits) -> Self {
        Self { profile, limits }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn limits(&self) -> &ProfileLimits {
        &self.limits
    }

    pub fn truncate_task(&self, task: &str) -> Truncated {
        truncate(task, self.limits.task_chars)
    }

    pub fn truncate_http_body(&self, body: &str) -> Truncated {
        truncate(body, self.limits.http_body_chars)
    }

    /// Cap every string leaf, serialize, then cap the serialized text.
    pub fn prepare_tool_output(&self, value: &Value) -> PreparedOutput {
        let mut truncated_fields = 0;
        let capped = cap_strings(value, self.limits.tool_string_chars, &mut truncated_fields);
        let serialized = serde_json::to_string(&capped).unwrap_or_else(|_| capped.to_string());
        let result = truncate(&serialized, self.limits.tool_serialized_chars);
        PreparedOutput {
            serialized_omitted: result.was_truncated().then_some(result.omitted),
            text: result.text,
            truncated_fields,
        }
    }
}

fn cap_strings(value: &Value, cap: usize, count: &mut usize) -> Value {
    match value {
        Value::String(s) => {
            let t = truncate(s, cap);
            if t.was_truncated() {
                *count += 1;
            }
            Value::String(t.text)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| cap_strings(v, cap, count)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), cap_strings(v, cap, count)))
                .collect(),
        ),
        other => other.clone(),
    }
}
