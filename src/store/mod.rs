//! Source-store and failure-store seams.
//!
//! The sync driver only sees these traits; the production implementation is
//! [`sql::SqlStore`], and [`memory::InMemoryStore`] backs the tests.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::failure::FailureSummary;
use crate::record::{CustomerRecord, FailedEvent, LineItem, OrderRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("row decode failed: {0}")]
    Decode(String),
}

/// Chunked, keyset-paginated access to the unsynced source rows.
///
/// Fetches return up to `limit` rows where the synced flag is unset, with
/// `sid` strictly greater than `after` (when given), ordered by `sid`. The
/// cursor makes one run visit each row exactly once even when rows fail and
/// stay unsynced. `since`, when set, narrows extraction to rows created
/// after the watermark.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn fetch_unsynced_customers(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CustomerRecord>, StoreError>;

    async fn fetch_unsynced_orders(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<OrderRecord>, StoreError>;

    /// Line items for one order, keyed by the parent row's `sid`.
    async fn fetch_line_items(&self, order_sid: &str) -> Result<Vec<LineItem>, StoreError>;

    /// Mark exactly the given customer rows as synced.
    async fn mark_customers_synced(&self, sids: &[String]) -> Result<(), StoreError>;

    /// Mark exactly the given order rows as synced.
    async fn mark_orders_synced(&self, sids: &[String]) -> Result<(), StoreError>;
}

/// Durable bookkeeping for records that could not be delivered.
#[async_trait]
pub trait FailureStore: Send + Sync {
    /// Create the failure table if absent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Append one failure row.
    async fn record(&self, failure: &FailedEvent) -> Result<(), StoreError>;

    /// Unresolved failure counts grouped by entity kind and category.
    async fn unresolved_summary(&self) -> Result<FailureSummary, StoreError>;

    /// Delete failures older than the retention window.
    /// Returns the number of rows removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}
