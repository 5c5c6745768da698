//! In-memory store for driver tests.
//!
//! Mirrors the SQL store's semantics: keyset-ordered fetches over an
//! unsynced predicate, explicit-id acknowledgment, append-only failure
//! rows. Also keeps call histories so tests can assert exactly how many
//! extraction and acknowledgment calls a run issued.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{FailureStore, SourceStore, StoreError};
use crate::failure::{FailureSummary, RETENTION_DAYS};
use crate::record::{CustomerRecord, FailedEvent, LineItem, OrderRecord};

#[derive(Default)]
pub struct InMemoryStore {
    customers: RwLock<BTreeMap<String, (CustomerRecord, bool)>>,
    orders: RwLock<BTreeMap<String, (OrderRecord, bool)>>,
    line_items: DashMap<String, Vec<LineItem>>,
    failures: RwLock<Vec<FailedEvent>>,
    customer_fetches: AtomicUsize,
    order_fetches: AtomicUsize,
    ack_calls: RwLock<Vec<Vec<String>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_customer(&self, customer: CustomerRecord) {
        self.customers
            .write()
            .insert(customer.sid.clone(), (customer, false));
    }

    pub fn insert_order(&self, order: OrderRecord) {
        self.orders.write().insert(order.sid.clone(), (order, false));
    }

    pub fn insert_line_items(&self, order_sid: &str, items: Vec<LineItem>) {
        self.line_items.insert(order_sid.to_string(), items);
    }

    #[must_use]
    pub fn is_customer_synced(&self, sid: &str) -> bool {
        self.customers
            .read()
            .get(sid)
            .map(|(_, synced)| *synced)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_order_synced(&self, sid: &str) -> bool {
        self.orders
            .read()
            .get(sid)
            .map(|(_, synced)| *synced)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn synced_customer_count(&self) -> usize {
        self.customers
            .read()
            .values()
            .filter(|(_, synced)| *synced)
            .count()
    }

    /// How many chunk fetches each entity saw.
    #[must_use]
    pub fn customer_fetch_count(&self) -> usize {
        self.customer_fetches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn order_fetch_count(&self) -> usize {
        self.order_fetches.load(Ordering::SeqCst)
    }

    /// Every acknowledgment call, in order, with the exact ids it covered.
    #[must_use]
    pub fn ack_history(&self) -> Vec<Vec<String>> {
        self.ack_calls.read().clone()
    }

    /// Snapshot of recorded failures.
    #[must_use]
    pub fn failures(&self) -> Vec<FailedEvent> {
        self.failures.read().clone()
    }

    fn fetch_unsynced<T: Clone>(
        map: &BTreeMap<String, (T, bool)>,
        after: Option<&str>,
        limit: usize,
        created_at: impl Fn(&T) -> Option<DateTime<Utc>>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<T> {
        map.iter()
            .filter(|(sid, _)| after.map_or(true, |cursor| sid.as_str() > cursor))
            .filter(|(_, (_, synced))| !*synced)
            .filter(|(_, (record, _))| {
                since.map_or(true, |watermark| {
                    created_at(record).map_or(false, |t| t > watermark)
                })
            })
            .take(limit)
            .map(|(_, (record, _))| record.clone())
            .collect()
    }
}

#[async_trait]
impl SourceStore for InMemoryStore {
    async fn fetch_unsynced_customers(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CustomerRecord>, StoreError> {
        self.customer_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Self::fetch_unsynced(
            &self.customers.read(),
            after,
            limit,
            |c| c.created_at,
            since,
        ))
    }

    async fn fetch_unsynced_orders(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        self.order_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Self::fetch_unsynced(
            &self.orders.read(),
            after,
            limit,
            |o| o.created_at,
            since,
        ))
    }

    async fn fetch_line_items(&self, order_sid: &str) -> Result<Vec<LineItem>, StoreError> {
        Ok(self
            .line_items
            .get(order_sid)
            .map(|items| items.value().clone())
            .unwrap_or_default())
    }

    async fn mark_customers_synced(&self, sids: &[String]) -> Result<(), StoreError> {
        self.ack_calls.write().push(sids.to_vec());
        let mut customers = self.customers.write();
        for sid in sids {
            if let Some((_, synced)) = customers.get_mut(sid) {
                *synced = true;
            }
        }
        Ok(())
    }

    async fn mark_orders_synced(&self, sids: &[String]) -> Result<(), StoreError> {
        self.ack_calls.write().push(sids.to_vec());
        let mut orders = self.orders.write();
        for sid in sids {
            if let Some((_, synced)) = orders.get_mut(sid) {
                *synced = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FailureStore for InMemoryStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record(&self, failure: &FailedEvent) -> Result<(), StoreError> {
        self.failures.write().push(failure.clone());
        Ok(())
    }

    async fn unresolved_summary(&self) -> Result<FailureSummary, StoreError> {
        let mut summary = FailureSummary::default();
        for failure in self.failures.read().iter().filter(|f| !f.resolved) {
            summary.add(failure.entity_kind.as_str(), failure.category.as_str(), 1);
        }
        Ok(summary)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(RETENTION_DAYS);
        let mut failures = self.failures.write();
        let before = failures.len();
        failures.retain(|f| f.created_at >= cutoff);
        Ok((before - failures.len()) as u64)
    }
}
