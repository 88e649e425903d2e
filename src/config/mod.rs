// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandbox configuration.
//!
//! Configuration is resolved once at startup with precedence
//! (environment > config file > defaults) and then shared read-only:
//! - Config file: optional JSON or YAML, camelCase keys, no secrets
//! - Environment: tunables, model credentials and source-hosting tokens

mod loader;
mod types;

pub use loader::{load_config, load_config_file, load_config_with};

pub use types::{
    ConfigFile, GithubSettings, HttpToolSettings, ModelSettings, ProfileLimits,
    ProfileLimitsPartial, RegistrySettings, SandboxConfig, ShellSettings, WorkspaceSettings,
    DEFAULT_ECONOMY_MODEL, DEFAULT_GITHUB_API_URL, DEFAULT_MODEL, DEFAULT_OPENAI_BASE_URL,
};
