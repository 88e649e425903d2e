// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration types.
//!
//! [`SandboxConfig`] is the fully resolved, immutable configuration. It is built
//! once at startup and shared as `Arc<SandboxConfig>`. [`ConfigFile`] is the
//! optional on-disk layer; every field is optional and secrets are not accepted
//! from files.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::Profile;

/// Default model for standard jobs.
pub const DEFAULT_MODEL: &str = "gpt-5-codex";

/// Default model for economy jobs.
pub const DEFAULT_ECONOMY_MODEL: &str = "gpt-4.1-mini";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default GitHub REST endpoint.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Size caps for one cost profile, in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLimits {
    pub task_chars: usize,
    pub tool_string_chars: usize,
    pub tool_serialized_chars: usize,
    pub http_body_chars: usize,
}

impl ProfileLimits {
    pub const STANDARD: Self = Self {
        task_chars: 12_000,
        tool_string_chars: 12_000,
        tool_serialized_chars: 60_000,
        http_body_chars: 20_000,
    };

    pub const ECONOMY: Self = Self {
        task_chars: 6_000,
        tool_string_chars: 6_000,
        tool_serialized_chars: 15_000,
        http_body_chars: 8_000,
    };

    /// Clamp each cap to the corresponding cap in `ceiling`.
    pub fn clamped_to(&self, ceiling: &ProfileLimits) -> Self {
        Self {
            task_chars: self.task_chars.min(ceiling.task_chars),
            tool_string_chars: self.tool_string_chars.min(ceiling.tool_string_chars),
            tool_serialized_chars: self.tool_serialized_chars.min(ceiling.tool_serialized_chars),
            http_body_chars: self.http_body_chars.min(ceiling.http_body_chars),
        }
    }

    pub(crate) fn fields(&self) -> [(&'static str, usize); 4] {
        [
            ("taskChars", self.task_chars),
            ("toolStringChars", self.tool_string_chars),
            ("toolSerializedChars", self.tool_serialized_chars),
            ("httpBodyChars", self.http_body_chars),
        ]
    }
}

/// Where workspaces live and whether they survive the job.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub base_dir: PathBuf,
    pub keep: bool,
}

/// Model endpoint settings.
#[derive(Clone)]
pub struct ModelSettings {
    pub default_model: String,
    pub economy_model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("default_model", &self.default_model)
            .field("economy_model", &self.economy_model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// `run_shell` limits.
#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub timeout: Duration,
    /// Floor applied to known long-running build tools.
    pub build_tool_timeout: Duration,
    /// Per-stream capture cap.
    pub max_output_bytes: usize,
}

/// `http_get` limits.
#[derive(Debug, Clone)]
pub struct HttpToolSettings {
    pub timeout: Duration,
}

/// Source-hosting credentials and PR conventions.
#[derive(Clone)]
pub struct GithubSettings {
    pub api_base: String,
    pub clone_token: Option<String>,
    pub token: Option<String>,
    pub pr_token: Option<String>,
    pub clone_username: String,
    pub branch_prefix: String,
}

impl fmt::Debug for GithubSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |t: &Option<String>| t.as_ref().map(|_| "***");
        f.debug_struct("GithubSettings")
            .field("api_base", &self.api_base)
            .field("clone_token", &mask(&self.clone_token))
            .field("token", &mask(&self.token))
            .field("pr_token", &mask(&self.pr_token))
            .field("clone_username", &self.clone_username)
            .field("branch_prefix", &self.branch_prefix)
            .finish()
    }
}

/// Package registry (Maven) integration.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Regex matched against `<url>` of pom repositories to collect server ids.
    pub url_pattern: Option<String>,
    /// Server id used when no pom repository matches.
    pub default_server_id: String,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub workspace: WorkspaceSettings,
    pub model: ModelSettings,
    pub standard: ProfileLimits,
    pub economy: ProfileLimits,
    pub shell: ShellSettings,
    pub http: HttpToolSettings,
    pub github: GithubSettings,
    pub registry: RegistrySettings,
    /// RUNNING jobs untouched for longer than this are failed on read.
    pub job_stale_timeout: Duration,
}

impl SandboxConfig {
    /// Caps for a profile.
    pub fn limits(&self, profile: Profile) -> &ProfileLimits {
        match profile {
            Profile::Standard => &self.standard,
            Profile::Economy => &self.economy,
        }
    }

    /// Model for a job: explicit override, else the profile's model.
    pub fn model_for(&self, profile: Profile, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            Some(model) => model.to_string(),
            None if profile.is_economy() => self.model.economy_model.clone(),
            None => self.model.default_model.clone(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceSettings {
                base_dir: std::env::temp_dir(),
                keep: false,
            },
            model: ModelSettings {
                default_model: DEFAULT_MODEL.to_string(),
                economy_model: DEFAULT_ECONOMY_MODEL.to_string(),
                api_key: None,
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
                request_timeout: Duration::from_secs(600),
            },
            standard: ProfileLimits::STANDARD,
            economy: ProfileLimits::ECONOMY,
            shell: ShellSettings {
                timeout: Duration::from_millis(300_000),
                build_tool_timeout: Duration::from_millis(900_000),
                max_output_bytes: 5 * 1024 * 1024,
            },
            http: HttpToolSettings {
                timeout: Duration::from_millis(15_000),
            },
            github: GithubSettings {
                api_base: DEFAULT_GITHUB_API_URL.to_string(),
                clone_token: None,
                token: None,
                pr_token: None,
                clone_username: "x-access-token".to_string(),
                branch_prefix: "sandbox".to_string(),
            },
            registry: RegistrySettings {
                url_pattern: None,
                default_server_id: "gitlab-maven".to_string(),
            },
            job_stale_timeout: Duration::from_millis(6 * 60 * 60 * 1000),
        }
    }
}

/// Partial limits as they appear in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLimitsPartial {
    pub task_chars: Option<usize>,
    pub tool_string_chars: Option<usize>,
    pub tool_serialized_chars: Option<usize>,
    pub http_body_chars: Option<usize>,
}

/// On-disk configuration layer (JSON or YAML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub workspace_dir: Option<PathBuf>,
    pub keep_workspace: Option<bool>,
    pub model: Option<String>,
    pub economy_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub model_timeout_ms: Option<u64>,
    pub standard: Option<ProfileLimitsPartial>,
    pub economy: Option<ProfileLimitsPartial>,
    pub shell_timeout_ms: Option<u64>,
    pub shell_build_timeout_ms: Option<u64>,
    pub shell_max_buffer_bytes: Option<usize>,
    pub http_timeout_ms: Option<u64>,
    pub job_stale_timeout_ms: Option<u64>,
    pub github_api_url: Option<String>,
    pub branch_prefix: Option<String>,
    pub registry_url_pattern: Option<String>,
    pub registry_server_id: Option<String>,
}
