// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP GET tool handler.
//!
//! Fetches public documentation pages. Every URL goes through the network
//! guard before the first byte is sent, redirects are re-checked hop by hop,
//! and credentials the model tries to attach are dropped.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::guard::{ensure_resolves_public, is_blocked_host, validate_public_url, PublicResolver};
use crate::tools::registry::{ToolContext, ToolNotes};
use crate::types::{InputSchema, ToolDefinition};

const MAX_REDIRECTS: usize = 5;
const USER_AGENT: &str = concat!("cifix-sandbox/", env!("CARGO_PKG_VERSION"));

/// Headers the model may never set.
const STRIPPED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie"];

/// Arguments for the http_get tool.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpGetArgs {
    /// Absolute http(s) URL.
    pub url: String,

    /// Extra request headers. Non-string values are ignored.
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        "http_get",
        "Fetch a public http(s) URL, e.g. library documentation. Local and private addresses are blocked.",
    )
    .with_schema(
        InputSchema::new()
            .with_property(
                "url",
                json!({
                    "type": "string",
                    "description": "Absolute http or https URL"
                }),
            )
            .with_property(
                "headers",
                json!({
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Optional request headers"
                }),
            )
            .with_required(&["url"]),
    )
}

/// Build the client used for tool fetches.
///
/// Redirect targets are checked against the same host rules as the original
/// URL, and every DNS lookup goes through [`PublicResolver`], so a public page
/// cannot bounce the request onto the local network by name either.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ToolError> {
    let policy = redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (limit {MAX_REDIRECTS})"));
        }
        let url = attempt.url();
        if !matches!(url.scheme(), "http" | "https") {
            let scheme = url.scheme().to_string();
            return attempt.error(format!("redirect to unsupported scheme {scheme}"));
        }
        match url.host_str() {
            Some(host) if !is_blocked_host(host) => attempt.follow(),
            Some(host) => {
                let host = host.to_string();
                attempt.error(format!("redirect to blocked host {host}"))
            }
            None => attempt.error("redirect without host"),
        }
    });

    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(policy)
        .dns_resolver(Arc::new(PublicResolver))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ToolError::Http(format!("failed to build HTTP client: {e}")))
}

#[cfg_attr(feature = "telemetry", instrument(skip(args, ctx, notes), fields(url = %args.url, status)))]
pub async fn execute(
    args: HttpGetArgs,
    ctx: &ToolContext,
    notes: &mut ToolNotes,
) -> Result<Value, ToolError> {
    let url = validate_public_url(&args.url)?;
    ensure_resolves_public(&url).await?;

    let (headers, dropped) = request_headers(args.headers.as_ref());
    for name in dropped {
        notes.push(format!("http_get: dropped {name} header"));
    }

    let max_chars = ctx.budget.limits().http_body_chars;
    notes.push(format!(
        "http_get: {url} (timeoutMs={}, maxResponseChars={max_chars})",
        ctx.http_timeout.as_millis()
    ));

    let response = ctx
        .http
        .get(url.clone())
        .headers(headers)
        .send()
        .await
        .map_err(|e| request_error(e, ctx.http_timeout))?;

    let status = response.status();
    let final_url = response.url().to_string();
    let response_headers: Map<String, Value> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
        })
        .collect();

    let body = response
        .text()
        .await
        .map_err(|e| request_error(e, ctx.http_timeout))?;
    let body = ctx.budget.truncate_http_body(&body);
    if body.was_truncated() {
        notes.push(format!(
            "http_get response truncated: omitted {} chars",
            body.omitted
        ));
    }

    #[cfg(feature = "telemetry")]
    {
        tracing::Span::current().record("status", status.as_u16());
        debug!(url = %final_url, status = status.as_u16(), "HTTP fetch complete");
    }

    Ok(json!({
        "url": final_url,
        "status": status.as_u16(),
        "statusText": status.canonical_reason().unwrap_or(""),
        "headers": response_headers,
        "body": body.text,
        "truncated": body.was_truncated(),
    }))
}

/// Turn model-supplied headers into a header map, dropping credentials and
/// anything that is not a valid string header. Returns the dropped names.
fn request_headers(raw: Option<&Map<String, Value>>) -> (HeaderMap, Vec<String>) {
    let mut headers = HeaderMap::new();
    let mut dropped = Vec::new();
    for (name, value) in raw.into_iter().flatten() {
        if STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            dropped.push(name.clone());
            continue;
        }
        let Value::String(value) = value else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => dropped.push(name.clone()),
        }
    }
    (headers, dropped)
}

fn request_error(err: reqwest::Error, timeout: Duration) -> ToolError {
    if err.is_timeout() {
        ToolError::Http(format!("request timed out after {}ms", timeout.as_millis()))
    } else if err.is_redirect() {
        ToolError::Http(format!("redirect rejected: {err}"))
    } else {
        ToolError::Http(err.to_string())
    }
}
