// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model inference providers.
//!
//! Jobs never build providers directly. The processor holds a
//! [`SharedProviderFactory`](crate::types::SharedProviderFactory) and asks it
//! for a provider once the job's model is known:
//!
//! ```rust,ignore
//! use cifix_sandbox::providers::OpenAIFactory;
//! use cifix_sandbox::types::ProviderFactory;
//!
//! let factory = OpenAIFactory::from_settings(&config.model);
//! let provider = factory.create("gpt-4.1-mini")?;
//! let response = provider.chat(&messages, &tools).await?;
//! ```

pub mod openai;

pub use openai::OpenAIProvider;

use std::time::Duration;

use crate::config::ModelSettings;
use crate::error::ProviderError;
use crate::types::{BoxedProvider, ProviderFactory};

/// Builds [`OpenAIProvider`]s against one endpoint with one key.
#[derive(Clone)]
pub struct OpenAIFactory {
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl OpenAIFactory {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self::new(
            settings.api_key.clone(),
            settings.base_url.clone(),
            settings.request_timeout,
        )
    }
}

impl std::fmt::Debug for OpenAIFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIFactory")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderFactory for OpenAIFactory {
    fn create(&self, model: &str) -> Result<BoxedProvider, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProviderError::NotConfigured(
                    "OPENAI_API_KEY is not set; cannot call the model".to_string(),
                )
            })?;
        let provider = OpenAIProvider::new(api_key, model, &self.base_url, self.timeout)?;
        Ok(Box::new(provider))
    }
}
