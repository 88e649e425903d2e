// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading.
//!
//! Layers, lowest to highest precedence: built-in defaults, an optional JSON or
//! YAML file, then environment variables. Economy caps are clamped to the
//! standard caps after all layers are applied.

use std::path::Path;
use std::time::Duration;

use crate::budget::MIN_CAP;
use crate::error::ConfigError;

use super::types::{
    ConfigFile, ProfileLimits, ProfileLimitsPartial, SandboxConfig, DEFAULT_ECONOMY_MODEL,
    DEFAULT_MODEL,
};

/// Load configuration from an optional file plus the process environment.
pub fn load_config(file: Option<&Path>) -> Result<SandboxConfig, ConfigError> {
    load_config_with(file, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup (used by tests).
pub fn load_config_with<F>(file: Option<&Path>, env: F) -> Result<SandboxConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SandboxConfig::default();
    let mut economy_model_set = false;

    if let Some(path) = file {
        let layer = load_config_file(path)?;
        economy_model_set = layer.economy_model.is_some();
        apply_file(&mut config, layer);
    }

    let env = EnvLookup(env);
    economy_model_set |= env.string("CIFIX_MODEL_ECONOMY").is_some();
    apply_env(&mut config, &env)?;

    if !economy_model_set && config.model.default_model != DEFAULT_MODEL {
        config.model.economy_model = config.model.default_model.clone();
    }

    config.economy = config.economy.clamped_to(&config.standard);
    validate(&config)?;
    Ok(config)
}

/// Load a configuration file (JSON or YAML by extension).
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

fn apply_file(config: &mut SandboxConfig, file: ConfigFile) {
    if let Some(dir) = file.workspace_dir {
        config.workspace.base_dir = dir;
    }
    if let Some(keep) = file.keep_workspace {
        config.workspace.keep = keep;
    }
    if let Some(model) = file.model {
        config.model.default_model = model;
    }
    if let Some(model) = file.economy_model {
        config.model.economy_model = model;
    }
    if let Some(url) = file.openai_base_url {
        config.model.base_url = url;
    }
    if let Some(ms) = file.model_timeout_ms {
        config.model.request_timeout = Duration::from_millis(ms);
    }
    if let Some(partial) = file.standard {
        merge_limits(&mut config.standard, partial);
    }
    if let Some(partial) = file.economy {
        merge_limits(&mut config.economy, partial);
    }
    if let Some(ms) = file.shell_timeout_ms {
        config.shell.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.shell_build_timeout_ms {
        config.shell.build_tool_timeout = Duration::from_millis(ms);
    }
    if let Some(bytes) = file.shell_max_buffer_bytes {
        config.shell.max_output_bytes = bytes;
    }
    if let Some(ms) = file.http_timeout_ms {
        config.http.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.job_stale_timeout_ms {
        config.job_stale_timeout = Duration::from_millis(ms);
    }
    if let Some(url) = file.github_api_url {
        config.github.api_base = url;
    }
    if let Some(prefix) = file.branch_prefix {
        config.github.branch_prefix = prefix;
    }
    if file.registry_url_pattern.is_some() {
        config.registry.url_pattern = file.registry_url_pattern;
    }
    if let Some(id) = file.registry_server_id {
        config.registry.default_server_id = id;
    }
}

fn merge_limits(target: &mut ProfileLimits, partial: ProfileLimitsPartial) {
    if let Some(v) = partial.task_chars {
        target.task_chars = v;
    }
    if let Some(v) = partial.tool_string_chars {
        target.tool_string_chars = v;
    }
    if let Some(v) = partial.tool_serialized_chars {
        target.tool_serialized_chars = v;
    }
    if let Some(v) = partial.http_body_chars {
        target.http_body_chars = v;
    }
}

fn apply_env<F>(config: &mut SandboxConfig, env: &EnvLookup<F>) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env.string("SANDBOX_WORKDIR") {
        config.workspace.base_dir = dir.into();
    }
    if let Some(keep) = env.bool("SANDBOX_KEEP_WORKSPACE")? {
        config.workspace.keep = keep;
    }

    if let Some(model) = env.string("CIFIX_MODEL") {
        config.model.default_model = model;
    }
    if let Some(model) = env.string("CIFIX_MODEL_ECONOMY") {
        config.model.economy_model = model;
    }
    if let Some(url) = env.string("OPENAI_BASE_URL") {
        config.model.base_url = url;
    }
    config.model.api_key = match env.string("OPENAI_API_KEY") {
        Some(key) => Some(key),
        None => match env.string("OPENAI_API_KEY_FILE") {
            Some(path) => Some(read_key_file(&path)?),
            None => config.model.api_key.take(),
        },
    };

    let standard = &mut config.standard;
    env.set_positive("TASK_DESCRIPTION_MAX_CHARS", &mut standard.task_chars)?;
    env.set_positive("TOOL_OUTPUT_STRING_LIMIT", &mut standard.tool_string_chars)?;
    env.set_positive("TOOL_OUTPUT_SERIALIZED_LIMIT", &mut standard.tool_serialized_chars)?;
    env.set_positive("HTTP_TOOL_MAX_RESPONSE_CHARS", &mut standard.http_body_chars)?;

    let economy = &mut config.economy;
    env.set_positive("ECONOMY_TASK_DESCRIPTION_MAX_CHARS", &mut economy.task_chars)?;
    env.set_positive("ECONOMY_TOOL_OUTPUT_STRING_LIMIT", &mut economy.tool_string_chars)?;
    env.set_positive("ECONOMY_TOOL_OUTPUT_SERIALIZED_LIMIT", &mut economy.tool_serialized_chars)?;
    env.set_positive("ECONOMY_HTTP_TOOL_MAX_RESPONSE_CHARS", &mut economy.http_body_chars)?;

    if let Some(ms) = env.positive::<u64>("HTTP_TOOL_TIMEOUT_MS")? {
        config.http.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = env.positive::<u64>("RUN_SHELL_TIMEOUT_MS")? {
        config.shell.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = env.positive::<u64>("RUN_SHELL_BUILD_TIMEOUT_MS")? {
        config.shell.build_tool_timeout = Duration::from_millis(ms);
    }
    env.set_positive("RUN_SHELL_MAX_BUFFER_BYTES", &mut config.shell.max_output_bytes)?;
    if let Some(ms) = env.positive::<u64>("JOB_STALE_TIMEOUT_MS")? {
        config.job_stale_timeout = Duration::from_millis(ms);
    }

    if let Some(url) = env.string("GITHUB_API_URL") {
        config.github.api_base = url.trim_end_matches('/').to_string();
    }
    config.github.clone_token = env.string("GITHUB_CLONE_TOKEN").or(config.github.clone_token.take());
    config.github.token = env.string("GITHUB_TOKEN").or(config.github.token.take());
    config.github.pr_token = env.string("GITHUB_PR_TOKEN").or(config.github.pr_token.take());
    if let Some(user) = env.string("GITHUB_CLONE_USERNAME") {
        config.github.clone_username = user;
    }
    if let Some(prefix) = env.string("CIFIX_BRANCH_PREFIX") {
        config.github.branch_prefix = prefix;
    }
    if let Some(pattern) = env.string("MAVEN_REGISTRY_URL_PATTERN") {
        config.registry.url_pattern = Some(pattern);
    }

    Ok(())
}

fn read_key_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("OPENAI_API_KEY_FILE {path}: {e}")))?;
    let key = content.trim();
    if key.is_empty() {
        return Err(ConfigError::invalid("OPENAI_API_KEY_FILE", "file is empty"));
    }
    Ok(key.to_string())
}

fn validate(config: &SandboxConfig) -> Result<(), ConfigError> {
    for (profile, limits) in [("standard", &config.standard), ("economy", &config.economy)] {
        for (name, value) in limits.fields() {
            if value < MIN_CAP {
                return Err(ConfigError::invalid(
                    format!("{profile}.{name}"),
                    format!("must be at least {MIN_CAP}, got {value}"),
                ));
            }
        }
    }
    if config.model.default_model.trim().is_empty() {
        return Err(ConfigError::invalid("model", "must not be empty"));
    }
    if config.github.branch_prefix.trim().is_empty() {
        return Err(ConfigError::invalid("branchPrefix", "must not be empty"));
    }
    Ok(())
}

/// Typed access to an environment lookup.
struct EnvLookup<F>(F);

impl<F> EnvLookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::invalid(key, format!("expected a boolean, got '{raw}'"))),
        }
    }

    fn positive<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
    {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        match raw.parse::<T>() {
            Ok(v) if v > T::default() => Ok(Some(v)),
            _ => Err(ConfigError::invalid(
                key,
                format!("expected a positive integer, got '{raw}'"),
            )),
        }
    }

    fn set_positive(&self, key: &str, target: &mut usize) -> Result<(), ConfigError> {
        if let Some(v) = self.positive(key)? {
            *target = v;
        }
        Ok(())
    }
}
