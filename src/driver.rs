// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync driver.
//!
//! The [`SyncDriver`] orchestrates one entity type's run:
//! extraction → validation → transformation → delivery → acknowledgment,
//! chunk by chunk, until a short chunk signals the last page.
//!
//! ```text
//! FETCHING → PROCESSING_ROW (×N) → FLUSHING → ACKNOWLEDGING → (FETCHING | DONE)
//! ```
//!
//! Rows are acknowledged (marked synced in the source store) only after the
//! destination confirmed their batch; acknowledgment never precedes
//! delivery. A flush that exhausts its retry budget fails its batch only:
//! every row in it is recorded as failed and the run continues with the
//! next rows.
//!
//! # Concurrency
//!
//! One driver runs one entity type sequentially on the calling task. Two
//! drivers for *different* entity types may run concurrently, but run the
//! customer sync to completion before the order sync when the destination
//! resolves order events against previously identified profiles.
//! Concurrent runs against the *same* entity type are not safe: two
//! drivers racing the same unsynced predicate can double-process a row,
//! and exactly-once then rests solely on the destination's message-id
//! dedup. Keep a single active run per entity type.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::batch::FlushReason;
use crate::config::SyncConfig;
use crate::delivery::DeliveryClient;
use crate::event::Event;
use crate::failure::{FailureRecorder, FailureSummary};
use crate::record::{EntityKind, ErrorCategory, EventKind};
use crate::store::{FailureStore, SourceStore, StoreError};
use crate::{metrics, transform, validate};

/// Per-run counters, reported to the caller once per sync invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Rows examined
    pub total: u64,
    /// Rows delivered and acknowledged
    pub synced: u64,
    /// Rows that failed transformation or delivery
    pub failed: u64,
    /// Rows rejected by validation
    pub skipped: u64,
}

pub struct SyncDriver {
    source: Arc<dyn SourceStore>,
    failure_store: Arc<dyn FailureStore>,
    failures: FailureRecorder,
    delivery: DeliveryClient,
    chunk_size: usize,
    since: Option<DateTime<Utc>>,
}

impl SyncDriver {
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceStore>,
        failure_store: Arc<dyn FailureStore>,
        delivery: DeliveryClient,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            failures: FailureRecorder::new(failure_store.clone()),
            failure_store,
            delivery,
            chunk_size: config.chunk_size,
            since: config.since,
        }
    }

    /// Sync unsynced customers as identify events.
    pub async fn sync_customers(&mut self) -> Result<SyncOutcome, StoreError> {
        self.failure_store.ensure_schema().await?;

        let started = Instant::now();
        let mut outcome = SyncOutcome::default();
        let mut cursor: Option<String> = None;

        loop {
            let chunk = self
                .source
                .fetch_unsynced_customers(cursor.as_deref(), self.since, self.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }
            let fetched = chunk.len();
            metrics::record_chunk(EntityKind::Customer.as_str(), fetched);
            info!(
                rows = fetched,
                examined = outcome.total,
                "processing customer chunk"
            );
            cursor = chunk.last().map(|c| c.sid.clone());

            for customer in &chunk {
                outcome.total += 1;

                if let Err(reason) = validate::validate_customer(customer) {
                    warn!(sid = %customer.sid, %reason, "skipping invalid customer");
                    self.failures
                        .record(
                            EntityKind::Customer,
                            &customer.sid,
                            EventKind::Identify,
                            &reason.to_string(),
                            ErrorCategory::Validation,
                            None,
                        )
                        .await;
                    outcome.skipped += 1;
                    continue;
                }

                let event = transform::customer_identify(customer);
                if let Some(reason) = self.delivery.send(event, customer.sid.clone()) {
                    self.flush_and_ack(EntityKind::Customer, reason, &mut outcome)
                        .await;
                }
            }

            self.flush_and_ack(EntityKind::Customer, FlushReason::ChunkEnd, &mut outcome)
                .await;

            // A short chunk is the last page.
            if fetched < self.chunk_size {
                break;
            }
        }

        self.finish_run(EntityKind::Customer, &outcome, started);
        Ok(outcome)
    }

    /// Sync unsynced orders as purchase events.
    pub async fn sync_orders(&mut self) -> Result<SyncOutcome, StoreError> {
        self.failure_store.ensure_schema().await?;

        let started = Instant::now();
        let mut outcome = SyncOutcome::default();
        let mut cursor: Option<String> = None;

        loop {
            let chunk = self
                .source
                .fetch_unsynced_orders(cursor.as_deref(), self.since, self.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }
            let fetched = chunk.len();
            metrics::record_chunk(EntityKind::Order.as_str(), fetched);
            info!(
                rows = fetched,
                examined = outcome.total,
                "processing order chunk"
            );
            cursor = chunk.last().map(|o| o.sid.clone());

            for order in &chunk {
                outcome.total += 1;

                if let Err(reason) = validate::validate_order(order) {
                    warn!(sid = %order.sid, %reason, "skipping invalid order");
                    self.failures
                        .record(
                            EntityKind::Order,
                            &order.sid,
                            EventKind::Track,
                            &reason.to_string(),
                            ErrorCategory::Validation,
                            None,
                        )
                        .await;
                    outcome.skipped += 1;
                    continue;
                }

                let items = match self.source.fetch_line_items(&order.sid).await {
                    Ok(items) => items,
                    Err(e) => {
                        error!(sid = %order.sid, error = %e, "failed to fetch line items");
                        self.failures
                            .record(
                                EntityKind::Order,
                                &order.sid,
                                EventKind::Track,
                                &e.to_string(),
                                ErrorCategory::Transient,
                                None,
                            )
                            .await;
                        outcome.failed += 1;
                        continue;
                    }
                };

                let event = transform::order_track(order, &items);
                if let Some(reason) = self.delivery.send(event, order.sid.clone()) {
                    self.flush_and_ack(EntityKind::Order, reason, &mut outcome)
                        .await;
                }
            }

            self.flush_and_ack(EntityKind::Order, FlushReason::ChunkEnd, &mut outcome)
                .await;

            if fetched < self.chunk_size {
                break;
            }
        }

        self.finish_run(EntityKind::Order, &outcome, started);
        Ok(outcome)
    }

    /// Flush the delivery buffer, then acknowledge exactly the rows the
    /// destination confirmed. A failed flush records its whole batch as
    /// failed and the run continues.
    async fn flush_and_ack(
        &mut self,
        entity: EntityKind,
        reason: FlushReason,
        outcome: &mut SyncOutcome,
    ) {
        match self.delivery.flush(reason).await {
            Ok(row_ids) => {
                if row_ids.is_empty() {
                    return;
                }
                outcome.synced += row_ids.len() as u64;

                if self.delivery.is_dry_run() {
                    info!(rows = row_ids.len(), entity = %entity, "dry run: would deliver and acknowledge");
                    return;
                }

                let acked = match entity {
                    EntityKind::Customer => self.source.mark_customers_synced(&row_ids).await,
                    EntityKind::Order => self.source.mark_orders_synced(&row_ids).await,
                };
                if let Err(e) = acked {
                    // Delivered but not marked: the next run re-delivers
                    // these rows and the destination dedups by message id.
                    warn!(
                        entity = %entity,
                        rows = row_ids.len(),
                        error = %e,
                        "acknowledgment failed after delivery"
                    );
                }
            }
            Err(failed) => {
                let category = failed.error.category();
                error!(
                    entity = %entity,
                    rows = failed.rows.len(),
                    error = %failed.error,
                    "flush failed after retries, recording batch as failed"
                );
                for (row_id, event) in &failed.rows {
                    self.failures
                        .record(
                            entity,
                            row_id,
                            event.kind(),
                            &failed.error.to_string(),
                            category,
                            event_payload_json(event),
                        )
                        .await;
                }
                outcome.failed += failed.rows.len() as u64;
            }
        }
    }

    fn finish_run(&self, entity: EntityKind, outcome: &SyncOutcome, started: Instant) {
        metrics::record_rows(entity.as_str(), "synced", outcome.synced);
        metrics::record_rows(entity.as_str(), "failed", outcome.failed);
        metrics::record_rows(entity.as_str(), "skipped", outcome.skipped);
        metrics::record_run(entity.as_str(), started.elapsed());
        info!(
            entity = %entity,
            total = outcome.total,
            synced = outcome.synced,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "sync complete"
        );
    }

    /// Unresolved failure counts for run reporting.
    pub async fn failure_summary(&self) -> Result<FailureSummary, StoreError> {
        self.failure_store.unresolved_summary().await
    }

    /// Apply the 30-day failure retention policy.
    pub async fn purge_expired_failures(&self) -> Result<u64, StoreError> {
        self.failure_store.purge_expired().await
    }
}

fn event_payload_json(event: &Event) -> Option<String> {
    serde_json::to_string(event).ok()
}
