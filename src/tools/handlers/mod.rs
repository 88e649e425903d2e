// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool handler implementations.
//!
//! Each module exposes `definition()`, its argument struct and
//! `execute(args, ctx, notes)`.

pub mod http_get;
pub mod read_file;
pub mod run_shell;
pub mod write_file;

use std::path::PathBuf;

use crate::error::ToolError;
use crate::guard::sanitize_requested_path;

use super::registry::{ToolContext, ToolNotes};

/// Resolve a model-supplied path, noting when stray quoting was stripped.
pub(crate) fn resolve_path(
    ctx: &ToolContext,
    requested: &str,
    notes: &mut ToolNotes,
) -> Result<PathBuf, ToolError> {
    let sanitized = sanitize_requested_path(requested);
    if !sanitized.is_empty() && sanitized != requested {
        notes.push(format!(
            "normalized requested path from \"{requested}\" to \"{sanitized}\""
        ));
    }
    Ok(ctx.guard.resolve(requested)?)
}
