// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics.
//!
//! - **Tracing**: structured logs; every job-log line is mirrored with a `job_id` field
//! - **Metrics**: tool and pipeline latencies, token totals, job outcomes
//!
//! Initialize once at startup:
//!
//! ```rust,ignore
//! use cifix_sandbox::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Record paths, commands, URLs and sizes as span fields. Never record
//! credentials, tokens or file contents.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics, GLOBAL_METRICS};
