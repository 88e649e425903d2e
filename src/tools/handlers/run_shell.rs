// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `run_shell` tool handler.
//!
//! Spawns an argument vector (never a shell string) inside the sandbox root.
//! Each output stream is captured up to a byte cap; the rest is drained and
//! dropped. A timeout kills the process and is reported as `timedOut: true`.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument, warn};

use crate::error::ToolError;
use crate::tools::registry::{ToolContext, ToolNotes};
use crate::types::{InputSchema, ToolDefinition};

use super::resolve_path;

/// Build tools that routinely run longer than the default timeout.
const BUILD_TOOLS: &[&str] = &["mvn", "mvnw", "gradle", "gradlew"];

/// How long to wait for output pipes after the process exits. Background
/// grandchildren can keep them open indefinitely.
const READER_GRACE: Duration = Duration::from_secs(5);

const GREP_GUIDANCE: &str =
    "grep -R detected. Use rg <pattern> <path> for recursive searches in the sandbox.";

/// Arguments for the run_shell tool.
#[derive(Debug, Clone, Deserialize)]
pub struct RunShellArgs {
    /// Program and arguments.
    pub command: Vec<String>,

    /// Working directory relative to the sandbox root (default: root).
    #[serde(default)]
    pub cwd: Option<String>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition::new(
        "run_shell",
        "Run a command inside the repository sandbox. The command is an argument vector, not a shell string.",
    )
    .with_schema(
        InputSchema::new()
            .with_property(
                "command",
                json!({
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Program followed by its arguments, e.g. [\"mvn\", \"-q\", \"test\"]"
                }),
            )
            .with_property(
                "cwd",
                json!({
                    "type": "string",
                    "description": "Working directory relative to the repository root"
                }),
            )
            .with_required(&["command", "cwd"]),
    )
}

#[cfg_attr(
    feature = "telemetry",
    instrument(skip(args, ctx, notes), fields(command, cwd, timeout_ms, exit_code))
)]
pub async fn execute(
    args: RunShellArgs,
    ctx: &ToolContext,
    notes: &mut ToolNotes,
) -> Result<Value, ToolError> {
    let mut command: Vec<String> = args.command.iter().map(|p| p.trim().to_string()).collect();
    if command.first().map_or(true, |p| p.is_empty()) {
        return Err(ToolError::InvalidInput(
            "command must be a non-empty array of strings".to_string(),
        ));
    }

    let cwd = resolve_path(ctx, args.cwd.as_deref().unwrap_or("."), notes)?;
    match tokio::fs::metadata(&cwd).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(ToolError::InvalidInput(format!(
                "cwd is not a directory: {}",
                ctx.guard.relative(&cwd)
            )))
        }
        Err(_) => {
            return Err(ToolError::FileNotFound(format!(
                "cwd does not exist: {}",
                ctx.guard.relative(&cwd)
            )))
        }
    }

    if is_recursive_grep(&command) {
        if command.len() <= 2 {
            notes.push(GREP_GUIDANCE.to_string());
            return Err(ToolError::InvalidInput(GREP_GUIDANCE.to_string()));
        }
        let rewritten: Vec<String> = std::iter::once("rg".to_string())
            .chain(command[2..].iter().cloned())
            .collect();
        notes.push(format!(
            "grep -R detected; using rg for recursive search: {} -> {}",
            command.join(" "),
            rewritten.join(" ")
        ));
        command = rewritten;
    }

    let timeout = effective_timeout(&command[0], ctx);
    if timeout > ctx.shell.timeout {
        notes.push(format!(
            "{} detected; extending timeout to {}ms",
            program_name(&command[0]),
            timeout.as_millis()
        ));
    }
    let cap = ctx.shell.max_output_bytes;
    let joined = command.join(" ");
    notes.push(format!(
        "run_shell: {joined} (cwd={}, timeoutMs={}, maxBufferBytes={cap})",
        ctx.guard.relative(&cwd),
        timeout.as_millis()
    ));

    #[cfg(feature = "telemetry")]
    {
        let span = tracing::Span::current();
        span.record("command", joined.as_str());
        span.record("cwd", ctx.guard.relative(&cwd).as_str());
        span.record("timeout_ms", timeout.as_millis() as u64);
    }

    let result = run_command(&command, &cwd, ctx, timeout, cap).await?;

    if result.timed_out {
        notes.push(format!(
            "run_shell hit the {}ms timeout; process killed",
            timeout.as_millis()
        ));
        #[cfg(feature = "telemetry")]
        warn!(command = %joined, "Command timed out");
    }
    if result.stdout.truncated || result.stderr.truncated {
        notes.push(format!("run_shell output truncated at {cap} bytes per stream"));
    }
    notes.push(format!(
        "run_shell finished (code={}, signal={}, timedOut={})",
        result.exit_code.map_or("none".to_string(), |c| c.to_string()),
        result.signal.as_deref().unwrap_or("none"),
        result.timed_out
    ));

    #[cfg(feature = "telemetry")]
    {
        if let Some(code) = result.exit_code {
            tracing::Span::current().record("exit_code", code);
        }
        debug!(exit_code = ?result.exit_code, "Command executed");
    }

    Ok(json!({
        "stdout": result.stdout.text(),
        "stderr": result.stderr.text(),
        "exitCode": result.exit_code,
        "signal": result.signal,
        "timedOut": result.timed_out,
        "stdoutTruncated": result.stdout.truncated,
        "stderrTruncated": result.stderr.truncated,
    }))
}

fn is_recursive_grep(command: &[String]) -> bool {
    command.len() >= 2 && command[0] == "grep" && command[1] == "-R"
}

fn program_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

/// The configured timeout, raised to the build-tool floor for known build tools.
fn effective_timeout(program: &str, ctx: &ToolContext) -> Duration {
    if BUILD_TOOLS.contains(&program_name(program)) {
        ctx.shell.timeout.max(ctx.shell.build_tool_timeout)
    } else {
        ctx.shell.timeout
    }
}

/// Bytes kept from one output stream.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

struct ShellResult {
    stdout: Captured,
    stderr: Captured,
    exit_code: Option<i32>,
    signal: Option<String>,
    timed_out: bool,
}

async fn run_command(
    command: &[String],
    cwd: &Path,
    ctx: &ToolContext,
    timeout: Duration,
    cap: usize,
) -> Result<ShellResult, ToolError> {
    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    ctx.env.apply(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ToolError::ExecutionFailed(format!("command not found: {}", command[0]))
        }
        _ => ToolError::ExecutionFailed(format!("failed to start {}: {e}", command[0])),
    })?;

    let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s, cap)));
    let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s, cap)));

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (status?, false),
        Err(_) => {
            // start_kill fails only if the child already exited.
            let _ = child.start_kill();
            (child.wait().await?, true)
        }
    };

    Ok(ShellResult {
        stdout: collect(stdout_task).await,
        stderr: collect(stderr_task).await,
        exit_code: status.code(),
        signal: exit_signal(&status),
        timed_out,
    })
}

/// Read a stream to EOF, keeping at most `cap` bytes.
async fn read_capped<R>(mut reader: R, cap: usize) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    captured
}

async fn collect(task: Option<JoinHandle<Captured>>) -> Captured {
    let Some(mut task) = task else {
        return Captured::default();
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(_)) => Captured::default(),
        Err(_) => {
            task.abort();
            Captured {
                bytes: Vec::new(),
                truncated: true,
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| {
        match sig {
            1 => "SIGHUP",
            2 => "SIGINT",
            3 => "SIGQUIT",
            6 => "SIGABRT",
            9 => "SIGKILL",
            11 => "SIGSEGV",
            13 => "SIGPIPE",
            15 => "SIGTERM",
            other => return format!("SIG{other}"),
        }
        .to_string()
    })
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}
