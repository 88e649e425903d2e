// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Write file tool handler.
//!
//! Replaces the whole file, creating parent directories as needed.

use serde::Deserialize;
use serde_json::{json, Value};

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::tools::registry::{ToolContext, ToolNotes};
use crate::types::{InputSchema, ToolDefinition};

use super::resolve_path;

/// Arguments for the write_file tool.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteFileArgs {
    /// Path relative to the repository root.
    pub path: String,

    /// Full new content of the file.
    #[serde(default)]
    pub content: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        "write_file",
        "Write a UTF-8 text file in the repository, replacing its content. Parent directories are created.",
    )
    .with_schema(
        InputSchema::new()
            .with_property(
                "path",
                json!({
                    "type": "string",
                    "description": "File path relative to the repository root"
                }),
            )
            .with_property(
                "content",
                json!({
                    "type": "string",
                    "description": "Complete file content"
                }),
            )
            .with_required(&["path", "content"]),
    )
}

#[cfg_attr(feature = "telemetry", instrument(skip(args, ctx, notes), fields(path, bytes = args.content.len())))]
pub async fn execute(
    args: WriteFileArgs,
    ctx: &ToolContext,
    notes: &mut ToolNotes,
) -> Result<Value, ToolError> {
    let path = resolve_path(ctx, &args.path, notes)?;
    let rel = ctx.guard.relative(&path);
    if path.as_path() == ctx.guard.root() {
        return Err(ToolError::InvalidInput(
            "path must name a file, not the repository root".to_string(),
        ));
    }

    #[cfg(feature = "telemetry")]
    tracing::Span::current().record("path", rel.as_str());

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, args.content.as_bytes()).await?;
    notes.push(format!("write_file: {rel}"));

    #[cfg(feature = "telemetry")]
    debug!(path = %rel, bytes = args.content.len(), "File written");

    Ok(json!({
        "status": "ok",
        "path": rel,
        "bytes": args.content.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handlers::test_support;
    use tempfile::tempdir;

    fn args(path: &str, content: &str) -> WriteFileArgs {
        WriteFileArgs {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempdir().unwrap();
        let ctx = test_support::standard(dir.path());
        let mut notes = Vec::new();

        let out = execute(args("src/main/java/App.java", "class App {}"), &ctx, &mut notes)
            .await
            .unwrap();
        assert_eq!(out["status"], "ok");
        assert_eq!(out["path"], "src/main/java/App.java");
        assert_eq!(out["bytes"], 12);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/main/java/App.java")).unwrap(),
            "class App {}"
        );
        assert_eq!(notes, vec!["write_file: src/main/java/App.java".to_string()]);
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        let ctx = test_support::standard(dir.path());
        let mut notes = Vec::new();

        execute(args("README.md", "hello world"), &ctx, &mut notes)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "hello world"
        );
    }

    #[tokio::test]
    async fn test_write_rejects_escape() {
        let dir = tempdir().unwrap();
        let inner = dir.path().join("repo");
        std::fs::create_dir(&inner).unwrap();
        let ctx = test_support::standard(&inner);
        let mut notes = Vec::new();

        let err = execute(args("../pwned.txt", "x"), &ctx, &mut notes)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityViolation(_)));
        assert!(!dir.path().join("pwned.txt").exists());
        assert!(notes.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_rejects_dangling_link_out_of_root() {
        let dir = tempdir().unwrap();
        let inner = dir.path().join("repo");
        std::fs::create_dir(&inner).unwrap();
        std::os::unix::fs::symlink("../escaped.txt", inner.join("link")).unwrap();
        let ctx = test_support::standard(&inner);
        let mut notes = Vec::new();

        let err = execute(args("link", "x"), &ctx, &mut notes)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityViolation(_)));
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn test_write_rejects_root() {
        let dir = tempdir().unwrap();
        let ctx = test_support::standard(dir.path());
        let mut notes = Vec::new();

        let err = execute(args(".", "x"), &ctx, &mut notes).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
