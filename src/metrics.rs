//! In-memory task metrics for one process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Default)]
struct TaskMetrics {
    total: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_max_ms: AtomicU64,
}

static TASK_METRICS: OnceLock<TaskMetrics> = OnceLock::new();

fn metrics() -> &'static TaskMetrics {
    TASK_METRICS.get_or_init(TaskMetrics::default)
}

/// How a task ended, as far as the counters care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// Refused because of caller input
    Rejected,
    Failed,
}

pub fn record_task(duration_ms: f64, outcome: TaskOutcome) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.total.fetch_add(1, Ordering::Relaxed);
    match outcome {
        TaskOutcome::Succeeded => {}
        TaskOutcome::Rejected => {
            metrics.rejected.fetch_add(1, Ordering::Relaxed);
        }
        TaskOutcome::Failed => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    metrics
        .duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .duration_max_ms
        .fetch_max(duration_ms, Ordering::Relaxed);
}

/// A worker call that did not answer within the request timeout
pub fn record_timeout() {
    metrics().timeouts.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetricsSnapshot {
    pub total: u64,
    pub failed: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<u64>,
}

pub fn snapshot() -> TaskMetricsSnapshot {
    let metrics = metrics();
    let total = metrics.total.load(Ordering::Relaxed);
    let duration_total = metrics.duration_total_ms.load(Ordering::Relaxed);
    let max_ms = metrics.duration_max_ms.load(Ordering::Relaxed);

    TaskMetricsSnapshot {
        total,
        failed: metrics.failed.load(Ordering::Relaxed),
        rejected: metrics.rejected.load(Ordering::Relaxed),
        timeouts: metrics.timeouts.load(Ordering::Relaxed),
        avg_ms: (total > 0).then(|| duration_total as f64 / total as f64),
        max_ms: (max_ms > 0).then_some(max_ms),
    }
}
