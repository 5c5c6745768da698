//! Failure bookkeeping.
//!
//! The [`FailureRecorder`] appends rejected and failed records to durable
//! failure storage. Recording is best-effort: a failure to record a failure
//! is logged and swallowed, because it must never abort a sync run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use crate::record::{EntityKind, ErrorCategory, EventKind, FailedEvent};
use crate::store::FailureStore;

/// Error messages are truncated to this length before storage.
pub const ERROR_MESSAGE_MAX: usize = 1000;
/// Raw payloads are truncated to this length before storage.
pub const PAYLOAD_MAX: usize = 10_000;
/// Failure rows older than this are purged.
pub const RETENTION_DAYS: i64 = 30;

/// Truncate at a char boundary at or below `max` bytes.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Best-effort writer of [`FailedEvent`] rows.
#[derive(Clone)]
pub struct FailureRecorder {
    store: Arc<dyn FailureStore>,
}

impl FailureRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn FailureStore>) -> Self {
        Self { store }
    }

    /// Record one failure. Never returns an error.
    pub async fn record(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        event_kind: EventKind,
        error_message: &str,
        category: ErrorCategory,
        payload: Option<String>,
    ) {
        let failure = FailedEvent {
            entity_kind,
            entity_id: entity_id.to_string(),
            event_kind,
            error_message: truncate(error_message, ERROR_MESSAGE_MAX),
            category,
            payload: payload.map(|p| truncate(&p, PAYLOAD_MAX)),
            created_at: Utc::now(),
            retry_count: 0,
            resolved: false,
        };

        if let Err(e) = self.store.record(&failure).await {
            error!(
                entity = %entity_kind,
                entity_id,
                error = %e,
                "failed to record failed event"
            );
        }
    }
}

/// Unresolved failure counts, for run reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSummary {
    pub total_unresolved: u64,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub by_entity: HashMap<EntityKind, u64>,
}

impl FailureSummary {
    /// Fold one aggregation row into the summary. Unknown entity or
    /// category strings are logged and skipped.
    pub fn add(&mut self, entity: &str, category: &str, count: u64) {
        let (Some(entity), Some(category)) =
            (EntityKind::parse(entity), ErrorCategory::parse(category))
        else {
            warn!(entity, category, "unknown failure grouping, skipping");
            return;
        };
        self.total_unresolved += count;
        *self.by_category.entry(category).or_default() += count;
        *self.by_entity.entry(entity).or_default() += count;
    }
}
