// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! GitHub REST client for opening pull requests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PublishError;

const USER_AGENT: &str = concat!("cifix-sandbox/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST /repos/{slug}/pulls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreatedPullRequest {
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub number: Option<u64>,
}

/// The source-hosting API used to open pull requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PullRequestClient: Send + Sync {
    async fn create_pull_request(
        &self,
        token: &str,
        slug: &str,
        request: &PullRequestRequest,
    ) -> Result<CreatedPullRequest, PublishError>;
}

/// [`PullRequestClient`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(api_base: impl Into<String>) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PublishError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn pulls_url(&self, slug: &str) -> String {
        format!("{}/repos/{}/pulls", self.api_base, slug)
    }
}

#[async_trait]
impl PullRequestClient for GithubClient {
    async fn create_pull_request(
        &self,
        token: &str,
        slug: &str,
        request: &PullRequestRequest,
    ) -> Result<CreatedPullRequest, PublishError> {
        let response = self
            .client
            .post(self.pulls_url(slug))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(request)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                "unknown GitHub API error".to_string()
            } else {
                text.trim().to_string()
            };
            return Err(PublishError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<CreatedPullRequest>()
            .await
            .map_err(|e| PublishError::Network(format!("invalid pull request response: {e}")))
    }
}
