//! Delivery of buffered events to the destination ingestion API.
//!
//! The [`DeliveryClient`] buffers outgoing events via [`send`](DeliveryClient::send)
//! and pushes them through a [`Transport`] on [`flush`](DeliveryClient::flush),
//! retrying transient failures with exponential backoff. Error category is
//! fixed at the point the destination call is made, never inferred later.

pub mod memory;
pub mod segment;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::batch::{DeliveryBatch, FlushReason};
use crate::event::Event;
use crate::record::ErrorCategory;
use crate::resilience::retry::{retry_if, RetryConfig};

/// A delivery failure, classified at the call site.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// 4xx-class: the destination rejected the batch. Never retried.
    #[error("destination rejected batch ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// 5xx-class: the destination is unhealthy. Retried.
    #[error("destination unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },
    /// Connection-level failure. Retried.
    #[error("network error: {0}")]
    Network(String),
    /// The request timed out. Retried.
    #[error("request timed out: {0}")]
    Timeout(String),
}

impl DeliveryError {
    /// Classify an HTTP status that was not a success.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        if (400..500).contains(&status) {
            Self::Rejected { status, message }
        } else {
            Self::Unavailable { status, message }
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected { .. } => ErrorCategory::Permanent,
            Self::Unavailable { .. } | Self::Network(_) | Self::Timeout(_) => {
                ErrorCategory::Transient
            }
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// One shot at delivering a set of events.
///
/// Implementations classify every failure into a [`DeliveryError`] variant
/// from the actual status code or transport error kind.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError>;

    /// True when the transport performs no real delivery.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Transport used when no destination credential is configured.
/// Reports success without any network I/O.
pub struct DryRunTransport;

#[async_trait]
impl Transport for DryRunTransport {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError> {
        debug!(count = events.len(), "dry run: skipping delivery");
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// A batch that could not be delivered after exhausting the retry budget.
#[derive(Debug)]
pub struct FailedFlush {
    pub error: DeliveryError,
    /// The source-row ids and events of the failed batch, in send order.
    pub rows: Vec<(String, Event)>,
}

/// Buffers outgoing events and flushes them with retry/backoff.
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    batch: DeliveryBatch,
    retry: RetryConfig,
}

impl DeliveryClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, batch_size: usize, retry: RetryConfig) -> Self {
        Self {
            transport,
            batch: DeliveryBatch::new(batch_size),
            retry,
        }
    }

    /// Build a client from configuration: a Segment transport when a write
    /// key is present, the dry-run transport otherwise.
    pub fn from_config(config: &crate::config::SyncConfig) -> Result<Self, DeliveryError> {
        let transport: Arc<dyn Transport> = match config.write_key.as_deref() {
            Some(key) if !key.is_empty() => {
                Arc::new(segment::SegmentTransport::new(&config.endpoint, key)?)
            }
            _ => {
                warn!("no destination write key configured, running in dry-run mode");
                Arc::new(DryRunTransport)
            }
        };
        Ok(Self::new(
            transport,
            config.batch_size,
            RetryConfig::delivery(),
        ))
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.transport.is_dry_run()
    }

    /// Number of buffered events awaiting flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Buffer an event for the given source row.
    /// Returns a flush reason when the batch-size threshold is hit.
    pub fn send(&mut self, event: Event, row_id: String) -> Option<FlushReason> {
        self.batch.push(event, row_id)
    }

    /// Deliver the buffered batch, blocking until the destination
    /// acknowledges or the retry budget is exhausted.
    ///
    /// On success, returns the source-row ids covered by this flush (the
    /// caller acknowledges exactly these). On failure, the batch's rows are
    /// handed back in the [`FailedFlush`] for failure bookkeeping; the
    /// buffer is empty either way.
    pub async fn flush(&mut self, reason: FlushReason) -> Result<Vec<String>, FailedFlush> {
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }

        let (row_ids, events) = self.batch.take();
        debug!(count = events.len(), reason = ?reason, "flushing delivery batch");
        let started = Instant::now();

        let outcome = retry_if(
            "deliver_batch",
            &self.retry,
            DeliveryError::is_retryable,
            || self.transport.deliver(&events),
        )
        .await;

        match outcome {
            Ok(()) => {
                crate::metrics::record_flush(events.len(), started.elapsed(), "success");
                Ok(row_ids)
            }
            Err(error) => {
                crate::metrics::record_flush(events.len(), started.elapsed(), "error");
                Err(FailedFlush {
                    error,
                    rows: row_ids.into_iter().zip(events).collect(),
                })
            }
        }
    }
}
