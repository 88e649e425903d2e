// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Read file tool handler.
//!
//! Returns the file as UTF-8 text. Only as many bytes as the context budget
//! could ever hand back are read; the budget then applies its usual cap.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::tools::registry::{ToolContext, ToolNotes};
use crate::types::{InputSchema, ToolDefinition};

use super::resolve_path;

/// Most bytes one UTF-8 character can take.
const MAX_CHAR_BYTES: u64 = 4;

/// Arguments for the read_file tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileArgs {
    /// Path relative to the repository root.
    pub path: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition::new("read_file", "Read a UTF-8 text file from the repository.").with_schema(
        InputSchema::new()
            .with_property(
                "path",
                json!({
                    "type": "string",
                    "description": "File path relative to the repository root"
                }),
            )
            .with_required(&["path"]),
    )
}

#[cfg_attr(feature = "telemetry", instrument(skip(args, ctx, notes), fields(path, bytes)))]
pub async fn execute(
    args: ReadFileArgs,
    ctx: &ToolContext,
    notes: &mut ToolNotes,
) -> Result<Value, ToolError> {
    let path = resolve_path(ctx, &args.path, notes)?;
    let rel = ctx.guard.relative(&path);

    #[cfg(feature = "telemetry")]
    tracing::Span::current().record("path", rel.as_str());

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| read_error(e, &path, &rel))?;
    let metadata = file.metadata().await.map_err(|e| read_error(e, &path, &rel))?;
    if metadata.is_dir() {
        return Err(ToolError::InvalidInput(format!("{rel} is a directory")));
    }

    // One character past the string cap, so the budget still marks the cut.
    let limit = (ctx.budget.limits().tool_string_chars as u64 + 1) * MAX_CHAR_BYTES;
    let mut bytes = Vec::new();
    file.take(limit)
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| read_error(e, &path, &rel))?;

    let partial = metadata.len() > bytes.len() as u64;
    let content = decode_utf8(bytes, partial).ok_or_else(|| ToolError::InvalidEncoding(rel.clone()))?;
    if partial {
        notes.push(format!(
            "read_file: {rel} is {} bytes, read the first {limit}",
            metadata.len()
        ));
    }

    #[cfg(feature = "telemetry")]
    {
        tracing::Span::current().record("bytes", content.len());
        debug!(path = %rel, bytes = content.len(), partial, "File read complete");
    }

    if partial {
        Ok(json!({ "path": rel, "content": content, "totalBytes": metadata.len() }))
    } else {
        Ok(json!({ "path": rel, "content": content }))
    }
}

fn read_error(e: std::io::Error, path: &Path, rel: &str) -> ToolError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ToolError::FileNotFound(rel.to_string()),
        std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(rel.to_string()),
        _ if path.is_dir() => ToolError::InvalidInput(format!("{rel} is a directory")),
        _ => ToolError::IoError(format!("failed to read {rel}: {e}")),
    }
}

/// Decode as UTF-8. A prefix of a longer file may end inside a character;
/// that trailing fragment is dropped instead of failing the read.
fn decode_utf8(bytes: Vec<u8>, partial: bool) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) if partial && e.utf8_error().error_len().is_none() => {
            let valid = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).ok()
        }
        Err(_) => None,
    }
}
