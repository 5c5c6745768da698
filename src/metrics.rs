// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The parent process is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `retail_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: customer, order
//! - `status`: synced, failed, skipped, success, error

use ::metrics::{counter, histogram};
use std::time::Duration;

/// Record rows that finished processing with the given status.
pub fn record_rows(entity: &str, status: &str, count: u64) {
    counter!(
        "retail_sync_rows_total",
        "entity" => entity.to_string(),
        "status" => status.to_string()
    )
    .increment(count);
}

/// Record one chunk extraction and its row count.
pub fn record_chunk(entity: &str, rows: usize) {
    counter!(
        "retail_sync_chunks_total",
        "entity" => entity.to_string()
    )
    .increment(1);
    histogram!(
        "retail_sync_chunk_rows",
        "entity" => entity.to_string()
    )
    .record(rows as f64);
}

/// Record one delivery flush attempt outcome.
pub fn record_flush(events: usize, duration: Duration, status: &str) {
    counter!(
        "retail_sync_flushes_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "retail_sync_flush_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
    histogram!("retail_sync_flush_batch_size").record(events as f64);
}

/// Record a completed sync run.
pub fn record_run(entity: &str, duration: Duration) {
    counter!(
        "retail_sync_runs_total",
        "entity" => entity.to_string()
    )
    .increment(1);
    histogram!(
        "retail_sync_run_seconds",
        "entity" => entity.to_string()
    )
    .record(duration.as_secs_f64());
}
