// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for the sandbox CLI.
//!
//! Logs go to stderr. Stdout is reserved for the job view JSON so it can be
//! piped into other tools.

use std::io::{self, IsTerminal};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::metrics::MetricsSnapshot;

/// Filter used when `RUST_LOG` is unset: our own events at info, dependencies at warn.
pub const DEFAULT_DIRECTIVE: &str = "cifix_sandbox=info,warn";

/// Filter for `--debug` runs.
pub const DEBUG_DIRECTIVE: &str = "cifix_sandbox=debug,info";

const REPORT_TARGET: &str = "cifix_sandbox::metrics";

/// How the process logs.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Directive applied when `RUST_LOG` is unset or invalid.
    pub default_directive: String,

    /// Span enter/close events plus file and line on every event.
    pub verbose: bool,

    pub ansi_colors: bool,

    /// Log job outcomes and latencies when the guard is dropped.
    pub report_on_drop: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: DEFAULT_DIRECTIVE.to_string(),
            verbose: false,
            ansi_colors: io::stderr().is_terminal(),
            report_on_drop: false,
        }
    }
}

impl TelemetryConfig {
    /// Verbose logging with a metrics report at exit.
    pub fn debug() -> Self {
        Self {
            default_directive: DEBUG_DIRECTIVE.to_string(),
            verbose: true,
            report_on_drop: true,
            ..Self::default()
        }
    }
}

/// Picks the filter directive: a parseable `RUST_LOG` wins, then the config default.
fn resolve_directive(env: Option<&str>, default: &str) -> String {
    match env.map(str::trim) {
        Some(directive) if !directive.is_empty() && EnvFilter::try_new(directive).is_ok() => {
            directive.to_string()
        }
        _ => default.to_string(),
    }
}

/// Held for the lifetime of the process.
pub struct TelemetryGuard {
    report: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.report {
            log_report(&super::GLOBAL_METRICS.snapshot());
        }
    }
}

fn log_report(snapshot: &MetricsSnapshot) {
    let report = snapshot.format_report();
    if snapshot.jobs_failed > 0 {
        tracing::warn!(
            target: REPORT_TARGET,
            jobs_completed = snapshot.jobs_completed,
            jobs_failed = snapshot.jobs_failed,
            "\n{report}"
        );
    } else {
        tracing::info!(
            target: REPORT_TARGET,
            jobs_completed = snapshot.jobs_completed,
            jobs_failed = snapshot.jobs_failed,
            "\n{report}"
        );
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = resolve_directive(env.as_deref(), &config.default_directive);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let span_events = if config.verbose {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_file(config.verbose)
        .with_line_number(config.verbose)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.verbose {
        registry.with(fmt_layer).try_init()
    } else {
        registry.with(fmt_layer.compact()).try_init()
    };
    installed.map_err(|e| io::Error::other(e.to_string()))?;

    Ok(TelemetryGuard {
        report: config.report_on_drop,
    })
}
