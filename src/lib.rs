//! # Retail Sync Engine
//!
//! Moves customer and order records from a SQL analytical store into a
//! Segment-compatible event-ingestion API, exactly once per record, with
//! durable tracking of failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Chunked Extraction                      │
//! │  • Keyset-paginated reads of unsynced rows (SourceStore)   │
//! │  • One typed decode step at the store boundary             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Validation and Transformation                  │
//! │  • Per-record admissibility checks                         │
//! │  • Identify traits / purchase events, empty values omitted │
//! │  • Deterministic message ids (SHA-256 of entity reference) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (DeliveryBatch, flush by count)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Delivery                             │
//! │  • Batch POST to the destination ingestion API             │
//! │  • Retry/backoff on transient failures, 4xx never retried  │
//! │  • Dry-run transport when no write key is configured       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Acknowledgment                          │
//! │  • Flushed rows marked synced in the source store          │
//! │  • Failed batches recorded durably (failed_events)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use retail_sync_engine::{DeliveryClient, SqlStore, SyncConfig, SyncDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::from_env();
//!
//!     let store = Arc::new(
//!         SqlStore::connect(config.database_url.as_deref().unwrap_or("sqlite:retail.db"))
//!             .await?,
//!     );
//!     // Dry-run transport when no write key is configured.
//!     let delivery = DeliveryClient::from_config(&config)?;
//!
//!     let mut driver = SyncDriver::new(store.clone(), store, delivery, &config);
//!
//!     // Customers first: order events resolve against identified profiles.
//!     let customers = driver.sync_customers().await?;
//!     let orders = driver.sync_orders().await?;
//!     println!("customers: {customers:?}, orders: {orders:?}");
//!
//!     let failures = driver.failure_summary().await?;
//!     println!("unresolved failures: {}", failures.total_unresolved);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`driver`]: the [`SyncDriver`] chunk loop
//! - [`store`]: source and failure stores (SQL, in-memory)
//! - [`delivery`]: delivery client, transports, error taxonomy
//! - [`transform`] / [`validate`]: record shaping and admissibility
//! - [`batch`]: bounded event accumulation
//! - [`resilience`]: retry with exponential backoff
//! - [`failure`]: durable failure bookkeeping

pub mod batch;
pub mod config;
pub mod delivery;
pub mod driver;
pub mod event;
pub mod failure;
pub mod idempotency;
pub mod metrics;
pub mod record;
pub mod resilience;
pub mod store;
pub mod transform;
pub mod validate;

pub use batch::{DeliveryBatch, FlushReason};
pub use config::SyncConfig;
pub use delivery::memory::RecordingTransport;
pub use delivery::segment::SegmentTransport;
pub use delivery::{DeliveryClient, DeliveryError, DryRunTransport, FailedFlush, Transport};
pub use driver::{SyncDriver, SyncOutcome};
pub use event::{Event, EventPayload};
pub use failure::{FailureRecorder, FailureSummary};
pub use idempotency::message_id;
pub use record::{
    CustomerRecord, EntityKind, ErrorCategory, EventKind, FailedEvent, LineItem, OrderRecord,
};
pub use resilience::retry::RetryConfig;
pub use store::memory::InMemoryStore;
pub use store::sql::SqlStore;
pub use store::{FailureStore, SourceStore, StoreError};
pub use validate::{validate_customer, validate_order, ValidationError};
