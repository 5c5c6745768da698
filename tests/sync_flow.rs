//! End-to-end sync driver tests.
//!
//! These run the full chunk loop against the in-memory store and scripted
//! transports, so no external backends are required.
//!
//! # Test Organization
//! - `chunking_*` - extraction pagination and termination
//! - `batching_*` - flush thresholds and acknowledgment coverage
//! - `failure_*`  - retry, classification, failure bookkeeping
//! - `order_*`    - purchase event shaping

use std::sync::Arc;
use std::time::Duration;

use retail_sync_engine::{
    idempotency, CustomerRecord, DeliveryClient, DeliveryError, DryRunTransport, EntityKind,
    ErrorCategory, EventKind, InMemoryStore, LineItem, OrderRecord, RecordingTransport,
    RetryConfig, SyncConfig, SyncDriver, SyncOutcome, Transport,
};

// =============================================================================
// Helpers
// =============================================================================

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        factor: 2.0,
    }
}

fn customer(n: usize) -> CustomerRecord {
    CustomerRecord {
        sid: format!("{n:06}"),
        cust_id: Some(format!("CU-{n}")),
        email: Some(format!("customer{n}@example.com")),
        ..Default::default()
    }
}

fn sale_order(sid: &str, total: f64) -> OrderRecord {
    OrderRecord {
        sid: sid.into(),
        doc_no: Some(format!("D-{sid}")),
        buyer_id: Some(format!("CU-{sid}")),
        sale_total: total,
        has_sale: true,
        ..Default::default()
    }
}

fn seed_customers(store: &InMemoryStore, count: usize) {
    for n in 1..=count {
        store.insert_customer(customer(n));
    }
}

fn driver(
    store: &Arc<InMemoryStore>,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    chunk_size: usize,
) -> SyncDriver {
    let config = SyncConfig {
        batch_size,
        chunk_size,
        ..Default::default()
    };
    let delivery = DeliveryClient::new(transport, batch_size, fast_retry());
    SyncDriver::new(store.clone(), store.clone(), delivery, &config)
}

// =============================================================================
// Chunking
// =============================================================================

#[tokio::test]
async fn chunking_1250_rows_takes_exactly_three_fetches() {
    let store = Arc::new(InMemoryStore::new());
    seed_customers(&store, 1250);
    let transport = Arc::new(RecordingTransport::new());

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    // 500 + 500 + 250; the short third chunk ends the run
    assert_eq!(store.customer_fetch_count(), 3);
    assert_eq!(
        outcome,
        SyncOutcome {
            total: 1250,
            synced: 1250,
            failed: 0,
            skipped: 0
        }
    );
    assert_eq!(store.synced_customer_count(), 1250);
    assert_eq!(transport.delivered_count(), 1250);
}

#[tokio::test]
async fn chunking_empty_store_is_a_single_fetch_noop() {
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(RecordingTransport::new());

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::default());
    assert_eq!(store.customer_fetch_count(), 1);
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test]
async fn chunking_second_run_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    seed_customers(&store, 120);
    let transport = Arc::new(RecordingTransport::new());

    let first = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();
    assert_eq!(first.synced, 120);

    let second = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    // everything was acknowledged, so the second run sees nothing
    assert_eq!(second, SyncOutcome::default());
    assert_eq!(transport.delivered_count(), 120);
}

#[tokio::test]
async fn chunking_dry_run_terminates_without_acknowledging() {
    let store = Arc::new(InMemoryStore::new());
    seed_customers(&store, 10);

    let outcome = driver(&store, Arc::new(DryRunTransport), 4, 5)
        .sync_customers()
        .await
        .unwrap();

    assert_eq!(outcome.synced, 10);
    // nothing marked synced and no acknowledgment calls issued
    assert_eq!(store.synced_customer_count(), 0);
    assert!(store.ack_history().is_empty());
    // cursor pagination still terminates: 5 + 5 + empty
    assert_eq!(store.customer_fetch_count(), 3);
}

// =============================================================================
// Batching and acknowledgment
// =============================================================================

#[tokio::test]
async fn batching_250_rows_flush_three_times_with_exact_ack_coverage() {
    let store = Arc::new(InMemoryStore::new());
    seed_customers(&store, 250);
    let transport = Arc::new(RecordingTransport::new());

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    let batches = transport.batches();
    assert_eq!(
        batches.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![100, 100, 50]
    );
    assert_eq!(outcome.synced, 250);

    // each acknowledgment call covers exactly the ids of its batch
    let acks = store.ack_history();
    assert_eq!(acks.len(), 3);
    for (batch, ack) in batches.iter().zip(&acks) {
        let batch_ids: Vec<&str> = batch.iter().map(|e| e.user_id()).collect();
        let ack_ids: Vec<&str> = ack.iter().map(String::as_str).collect();
        assert_eq!(batch_ids, ack_ids);
    }
}

#[tokio::test]
async fn batching_validation_failures_are_skipped_and_recorded() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_customer(CustomerRecord::default()); // empty sid
    store.insert_customer(CustomerRecord {
        sid: "000002".into(),
        email: Some("not-an-address".into()),
        ..Default::default()
    });
    store.insert_customer(customer(3));
    let transport = Arc::new(RecordingTransport::new());

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SyncOutcome {
            total: 3,
            synced: 1,
            failed: 0,
            skipped: 2
        }
    );
    assert_eq!(transport.delivered_count(), 1);

    let failures = store.failures();
    assert_eq!(failures.len(), 2);
    for failure in &failures {
        assert_eq!(failure.category, ErrorCategory::Validation);
        assert_eq!(failure.entity_kind, EntityKind::Customer);
        assert_eq!(failure.event_kind, EventKind::Identify);
    }
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn failure_transient_error_retries_with_stable_message_id() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_customer(customer(1));
    let transport = Arc::new(RecordingTransport::new());
    transport.push_failure(DeliveryError::Unavailable {
        status: 503,
        message: "service unavailable".into(),
    });

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    // attempt 1 failed, attempt 2 succeeded; no failure recorded
    assert_eq!(transport.attempts(), 2);
    assert_eq!(outcome.synced, 1);
    assert!(store.failures().is_empty());
    assert!(store.is_customer_synced("000001"));

    // the resend carried the same deterministic message id
    let batches = transport.batches();
    assert_eq!(
        batches[0][0].message_id,
        idempotency::message_id(EntityKind::Customer, "000001", "identify")
    );
}

#[tokio::test]
async fn failure_permanent_error_records_once_with_zero_retries() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_customer(customer(1));
    let transport = Arc::new(RecordingTransport::new());
    transport.fail_always(DeliveryError::Rejected {
        status: 400,
        message: "invalid write key".into(),
    });

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    // exactly one attempt: 4xx is never retried
    assert_eq!(transport.attempts(), 1);
    assert_eq!(outcome.failed, 1);
    assert!(!store.is_customer_synced("000001"));

    let failures = store.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category, ErrorCategory::Permanent);
    assert_eq!(failures[0].entity_id, "000001");
    // the event payload is kept for debugging
    assert!(failures[0].payload.as_deref().unwrap().contains("identify"));
}

#[tokio::test]
async fn failure_failed_batch_does_not_stop_the_run() {
    let store = Arc::new(InMemoryStore::new());
    seed_customers(&store, 250);
    let transport = Arc::new(RecordingTransport::new());
    // first flush fails permanently; later flushes succeed
    transport.push_failure(DeliveryError::Rejected {
        status: 422,
        message: "malformed batch".into(),
    });

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_customers()
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SyncOutcome {
            total: 250,
            synced: 150,
            failed: 100,
            skipped: 0
        }
    );
    assert_eq!(store.failures().len(), 100);
    assert_eq!(store.synced_customer_count(), 150);
    // only the two successful batches were recorded
    assert_eq!(
        transport
            .batches()
            .iter()
            .map(Vec::len)
            .collect::<Vec<_>>(),
        vec![100, 50]
    );
}

#[tokio::test]
async fn failure_summary_aggregates_unresolved_rows() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_customer(CustomerRecord::default()); // validation skip
    store.insert_order(OrderRecord {
        sid: "D1".into(),
        ..Default::default()
    }); // no flags: validation skip
    let transport = Arc::new(RecordingTransport::new());

    let mut d = driver(&store, transport, 100, 500);
    d.sync_customers().await.unwrap();
    d.sync_orders().await.unwrap();

    let summary = d.failure_summary().await.unwrap();
    assert_eq!(summary.total_unresolved, 2);
    assert_eq!(summary.by_category[&ErrorCategory::Validation], 2);
    assert_eq!(summary.by_entity[&EntityKind::Customer], 1);
    assert_eq!(summary.by_entity[&EntityKind::Order], 1);
}

// =============================================================================
// Orders
// =============================================================================

#[tokio::test]
async fn order_sale_produces_order_completed_with_rounded_revenue() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_order(sale_order("9000", 120.504));
    store.insert_line_items(
        "9000",
        vec![LineItem {
            product_id: "P1".into(),
            sku: Some("SKU-1".into()),
            description: Some("Widget".into()),
            unit_price: 60.25,
            quantity: 2,
            ..Default::default()
        }],
    );
    let transport = Arc::new(RecordingTransport::new());

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_orders()
        .await
        .unwrap();

    assert_eq!(outcome.synced, 1);
    assert!(store.is_order_synced("9000"));

    let batches = transport.batches();
    let event = &batches[0][0];
    assert_eq!(event.event_name(), Some("Order Completed"));
    assert_eq!(event.user_id(), "CU-9000");
    let value = serde_json::to_value(event).unwrap();
    assert_eq!(value["properties"]["revenue"], 120.5);
    assert_eq!(value["properties"]["orderId"], "D-9000");
    assert_eq!(value["properties"]["products"][0]["sku"], "SKU-1");
}

#[tokio::test]
async fn order_return_produces_order_refunded_with_absolute_revenue() {
    let store = Arc::new(InMemoryStore::new());
    let mut order = sale_order("9001", -45.67);
    order.has_sale = false;
    order.has_return = true;
    store.insert_order(order);
    let transport = Arc::new(RecordingTransport::new());

    driver(&store, transport.clone(), 100, 500)
        .sync_orders()
        .await
        .unwrap();

    let batches = transport.batches();
    let event = &batches[0][0];
    assert_eq!(event.event_name(), Some("Order Refunded"));
    let value = serde_json::to_value(event).unwrap();
    assert_eq!(value["properties"]["revenue"], 45.67);
}

#[tokio::test]
async fn order_without_flags_is_never_delivered() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_order(OrderRecord {
        sid: "9002".into(),
        buyer_id: Some("CU-1".into()),
        ..Default::default()
    });
    let transport = Arc::new(RecordingTransport::new());

    let outcome = driver(&store, transport.clone(), 100, 500)
        .sync_orders()
        .await
        .unwrap();

    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.synced, 0);
    assert_eq!(transport.attempts(), 0);
    assert!(!store.is_order_synced("9002"));

    let failures = store.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category, ErrorCategory::Validation);
}

#[tokio::test]
async fn order_rerun_after_full_ack_processes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_order(sale_order("9100", 10.0));
    store.insert_order(sale_order("9101", 20.0));
    let transport = Arc::new(RecordingTransport::new());

    let mut d = driver(&store, transport.clone(), 100, 500);
    let first = d.sync_orders().await.unwrap();
    assert_eq!(first.synced, 2);

    let second = d.sync_orders().await.unwrap();
    assert_eq!(second, SyncOutcome::default());
    assert_eq!(transport.delivered_count(), 2);
}
