// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for the sandbox.
//!
//! Tool latencies, pipeline operation latencies, token totals and job outcomes.
//! Everything is process-local; a snapshot can be logged at shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    tools: RwLock<HashMap<String, ToolMetrics>>,
    operations: RwLock<HashMap<String, OperationMetrics>>,
    prompt_tokens: AtomicU64,
    cached_prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            prompt_tokens: AtomicU64::new(0),
            cached_prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one tool dispatch.
    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools
            .entry(name.to_string())
            .or_insert_with(ToolMetrics::new)
            .record(duration, success);
    }

    /// Record a named pipeline operation (`provider.chat`, `job.process`, ...).
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    /// Record token usage from one model round-trip.
    pub fn record_tokens(&self, prompt: u64, cached_prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.cached_prompt_tokens.fetch_add(cached_prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// Record a job reaching a terminal state.
    pub fn record_job(&self, success: bool) {
        let counter = if success {
            &self.jobs_completed
        } else {
            &self.jobs_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self.tools.read().unwrap_or_else(PoisonError::into_inner).clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            cached_prompt_tokens: self.cached_prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool counters.
#[derive(Debug, Clone)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    fn new() -> Self {
        Self {
            invocations: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        }
    }

    fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if !success {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        match u32::try_from(self.invocations) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
        }
    }
}

/// Latency distribution for a pipeline operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.histogram.record(duration);
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bounds in milliseconds; the last count slot is overflow.
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bound of the bucket holding the `p`th percentile.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }
        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0;
        for (i, count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let bound = self
                    .bounds_ms
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.bounds_ms.last().copied().unwrap_or(0) * 10);
                return Duration::from_millis(bound);
            }
        }
        Duration::ZERO
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Model round-trips and shell commands are slow; bucket from 10ms to 10min.
        Self::with_bounds(vec![10, 100, 1_000, 10_000, 60_000, 600_000])
    }
}

/// Point-in-time copy of all metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub prompt_tokens: u64,
    pub cached_prompt_tokens: u64,
    pub completion_tokens: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Human-readable summary, one line per tool and operation.
    pub fn format_report(&self) -> String {
        let mut lines = vec![
            format!("uptime {:.2?}", self.uptime),
            format!(
                "jobs: {} completed, {} failed",
                self.jobs_completed, self.jobs_failed
            ),
            format!(
                "tokens: {} prompt ({} cached), {} completion",
                self.prompt_tokens, self.cached_prompt_tokens, self.completion_tokens
            ),
        ];

        let mut tools: Vec<_> = self.tools.iter().collect();
        tools.sort_by(|a, b| a.0.cmp(b.0));
        for (name, m) in tools {
            lines.push(format!(
                "tool {name}: {} calls, {} failed, avg {:.2?}, max {:.2?}",
                m.invocations,
                m.failures,
                m.avg_duration(),
                m.max_duration
            ));
        }

        let mut ops: Vec<_> = self.operations.iter().collect();
        ops.sort_by(|a, b| a.0.cmp(b.0));
        for (name, m) in ops {
            lines.push(format!(
                "op {name}: {} runs, p50 {:.2?}, p99 {:.2?}",
                m.count,
                m.histogram.percentile(50.0),
                m.histogram.percentile(99.0)
            ));
        }

        lines.join("\n")
    }
}
