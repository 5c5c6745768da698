// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL implementation of the source and failure stores.
//!
//! Works against SQLite or MySQL through sqlx's `Any` driver. The source
//! tables (`customers`, `documents`, `document_items`) are owned by the
//! loading pipeline; this store only reads them and flips their
//! `synced_to_segment` flag. The `failed_events` table is owned here and
//! created on demand.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver reads MySQL TEXT columns as bytes, so every text read
//! goes through a String-then-bytes fallback. Timestamps are stored as
//! BIGINT epoch milliseconds for the same reason.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::info;

use super::{FailureStore, SourceStore, StoreError};
use crate::failure::{FailureSummary, RETENTION_DAYS};
use crate::record::{CustomerRecord, FailedEvent, LineItem, OrderRecord};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

// Statements with an IN list are chunked to stay under packet limits.
const MARK_SYNCED_CHUNK: usize = 500;

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn connect(connection_string: &str) -> Result<Self, StoreError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        Ok(Self { pool, is_sqlite })
    }

    /// Get a clone of the connection pool for sharing with collaborators.
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn mark_synced(&self, table: &str, sids: &[String]) -> Result<(), StoreError> {
        if sids.is_empty() {
            return Ok(());
        }

        for chunk in sids.chunks(MARK_SYNCED_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE {table} SET synced_to_segment = 1 WHERE sid IN ({placeholders})"
            );

            retry("sql_mark_synced", &RetryConfig::query(), || async {
                let mut query = sqlx::query(&sql);
                for sid in chunk {
                    query = query.bind(sid.as_str());
                }
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(())
            })
            .await?;
        }

        info!(table, rows = sids.len(), "marked rows synced");
        Ok(())
    }
}

/// Read a text column, trying String first (SQLite TEXT) then bytes
/// (MySQL TEXT via the Any driver). NULL and empty both map to None.
fn text_col(row: &AnyRow, name: &str) -> Option<String> {
    row.try_get::<String, _>(name)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(name)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .filter(|s| !s.is_empty())
}

fn int_col(row: &AnyRow, name: &str) -> i64 {
    row.try_get::<i64, _>(name).unwrap_or(0)
}

fn float_col(row: &AnyRow, name: &str) -> f64 {
    row.try_get::<f64, _>(name)
        .unwrap_or_else(|_| int_col(row, name) as f64)
}

fn flag_col(row: &AnyRow, name: &str) -> bool {
    int_col(row, name) != 0
}

fn timestamp_col(row: &AnyRow, name: &str) -> Option<DateTime<Utc>> {
    row.try_get::<i64, _>(name)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn required_sid(row: &AnyRow) -> Result<String, StoreError> {
    row.try_get::<String, _>("sid")
        .or_else(|_| {
            row.try_get::<Vec<u8>, _>("sid").map(|bytes| {
                String::from_utf8_lossy(&bytes).into_owned()
            })
        })
        .map_err(|e| StoreError::Decode(format!("missing sid column: {e}")))
}

fn decode_customer(row: &AnyRow) -> Result<CustomerRecord, StoreError> {
    Ok(CustomerRecord {
        sid: required_sid(row)?,
        cust_id: text_col(row, "cust_id"),
        first_name: text_col(row, "first_name"),
        last_name: text_col(row, "last_name"),
        email: text_col(row, "email"),
        marketing_opt_in: flag_col(row, "marketing_flag"),
        loyalty_opt_in: flag_col(row, "lty_opt_in"),
        loyalty_points: int_col(row, "lty_balance"),
        total_transactions: int_col(row, "total_transactions"),
        sale_item_count: int_col(row, "sale_item_count"),
        return_item_count: int_col(row, "return_item_count"),
        ytd_spend: float_col(row, "ytd_sale"),
        created_at: timestamp_col(row, "created_at"),
    })
}

fn decode_order(row: &AnyRow) -> Result<OrderRecord, StoreError> {
    Ok(OrderRecord {
        sid: required_sid(row)?,
        doc_no: text_col(row, "doc_no"),
        buyer_id: text_col(row, "bt_cuid"),
        buyer_email: text_col(row, "bt_email"),
        ship_email: text_col(row, "st_email"),
        sale_total: float_col(row, "sale_total_amt"),
        subtotal: float_col(row, "sale_subtotal"),
        tax: float_col(row, "sale_total_tax_amt"),
        discount: float_col(row, "total_discount_amt"),
        shipping: float_col(row, "shipping_amt"),
        sold_qty: int_col(row, "sold_qty"),
        return_qty: int_col(row, "return_qty"),
        currency: text_col(row, "currency_name"),
        payment_method: text_col(row, "tender_name"),
        store_code: text_col(row, "store_code"),
        ship_method: text_col(row, "ship_method"),
        has_sale: flag_col(row, "has_sale"),
        has_return: flag_col(row, "has_return"),
        created_at: timestamp_col(row, "created_at"),
    })
}

fn decode_line_item(row: &AnyRow) -> LineItem {
    LineItem {
        product_id: text_col(row, "invn_item_sid").unwrap_or_default(),
        sku: text_col(row, "alu"),
        description: text_col(row, "description"),
        category: text_col(row, "dcs_code"),
        brand: text_col(row, "vend_code"),
        unit_price: float_col(row, "price"),
        quantity: int_col(row, "qty").max(1),
    }
}

fn chunk_query(select: &str, after: Option<&str>, since: Option<DateTime<Utc>>) -> String {
    let mut sql = String::from(select);
    if after.is_some() {
        sql.push_str(" AND sid > ?");
    }
    if since.is_some() {
        sql.push_str(" AND created_at > ?");
    }
    sql.push_str(" ORDER BY sid LIMIT ?");
    sql
}

const CUSTOMER_SELECT: &str = "SELECT sid, cust_id, first_name, last_name, email, \
     marketing_flag, lty_opt_in, lty_balance, total_transactions, \
     sale_item_count, return_item_count, ytd_sale, created_at \
     FROM customers WHERE synced_to_segment = 0";

const ORDER_SELECT: &str = "SELECT sid, doc_no, bt_cuid, bt_email, st_email, \
     sale_total_amt, sale_subtotal, sale_total_tax_amt, total_discount_amt, \
     shipping_amt, sold_qty, return_qty, currency_name, tender_name, \
     store_code, ship_method, has_sale, has_return, created_at \
     FROM documents WHERE synced_to_segment = 0";

#[async_trait]
impl SourceStore for SqlStore {
    async fn fetch_unsynced_customers(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CustomerRecord>, StoreError> {
        let sql = chunk_query(CUSTOMER_SELECT, after, since);

        let rows = retry("sql_fetch_customers", &RetryConfig::query(), || async {
            let mut query = sqlx::query(&sql);
            if let Some(cursor) = after {
                query = query.bind(cursor);
            }
            if let Some(watermark) = since {
                query = query.bind(watermark.timestamp_millis());
            }
            query
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        rows.iter().map(decode_customer).collect()
    }

    async fn fetch_unsynced_orders(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        let sql = chunk_query(ORDER_SELECT, after, since);

        let rows = retry("sql_fetch_orders", &RetryConfig::query(), || async {
            let mut query = sqlx::query(&sql);
            if let Some(cursor) = after {
                query = query.bind(cursor);
            }
            if let Some(watermark) = since {
                query = query.bind(watermark.timestamp_millis());
            }
            query
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        rows.iter().map(decode_order).collect()
    }

    async fn fetch_line_items(&self, order_sid: &str) -> Result<Vec<LineItem>, StoreError> {
        let rows = retry("sql_fetch_line_items", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT invn_item_sid, alu, description, dcs_code, vend_code, qty, price \
                 FROM document_items WHERE doc_sid = ?",
            )
            .bind(order_sid)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        Ok(rows.iter().map(decode_line_item).collect())
    }

    async fn mark_customers_synced(&self, sids: &[String]) -> Result<(), StoreError> {
        self.mark_synced("customers", sids).await
    }

    async fn mark_orders_synced(&self, sids: &[String]) -> Result<(), StoreError> {
        self.mark_synced("documents", sids).await
    }
}

#[async_trait]
impl FailureStore for SqlStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS failed_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                error_category TEXT NOT NULL,
                payload TEXT,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                resolved INTEGER NOT NULL DEFAULT 0
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS failed_events (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                entity_type VARCHAR(32) NOT NULL,
                entity_id VARCHAR(255) NOT NULL,
                event_type VARCHAR(64) NOT NULL,
                error_message TEXT NOT NULL,
                error_category VARCHAR(16) NOT NULL,
                payload MEDIUMTEXT,
                created_at BIGINT NOT NULL,
                retry_count INT NOT NULL DEFAULT 0,
                resolved TINYINT NOT NULL DEFAULT 0,
                INDEX idx_created_at (created_at),
                INDEX idx_resolved (resolved)
            )
            "#
        };

        retry("sql_ensure_failed_events", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn record(&self, failure: &FailedEvent) -> Result<(), StoreError> {
        retry("sql_record_failure", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO failed_events \
                 (entity_type, entity_id, event_type, error_message, error_category, \
                  payload, created_at, retry_count, resolved) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(failure.entity_kind.as_str())
            .bind(failure.entity_id.as_str())
            .bind(failure.event_kind.as_str())
            .bind(failure.error_message.as_str())
            .bind(failure.category.as_str())
            .bind(failure.payload.as_deref())
            .bind(failure.created_at.timestamp_millis())
            .bind(i64::from(failure.retry_count))
            .bind(i64::from(failure.resolved))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn unresolved_summary(&self) -> Result<FailureSummary, StoreError> {
        let rows = retry("sql_failure_summary", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT entity_type, error_category, COUNT(*) AS cnt \
                 FROM failed_events WHERE resolved = 0 \
                 GROUP BY entity_type, error_category \
                 ORDER BY cnt DESC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        let mut summary = FailureSummary::default();
        for row in &rows {
            let entity = text_col(row, "entity_type").unwrap_or_default();
            let category = text_col(row, "error_category").unwrap_or_default();
            summary.add(&entity, &category, int_col(row, "cnt") as u64);
        }
        Ok(summary)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let cutoff = (Utc::now() - ChronoDuration::days(RETENTION_DAYS)).timestamp_millis();

        let removed = retry("sql_purge_failures", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM failed_events WHERE created_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map(|result| result.rows_affected())
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        if removed > 0 {
            info!(removed, "purged expired failed events");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EntityKind, ErrorCategory, EventKind};
    use std::sync::atomic::{AtomicU64, Ordering};

    static DB_SEQ: AtomicU64 = AtomicU64::new(0);

    fn sqlite_url(name: &str) -> String {
        let seq = DB_SEQ.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "retail_sync_{}_{}_{}.db",
            name,
            std::process::id(),
            seq
        ));
        format!("sqlite://{}?mode=rwc", path.display())
    }

    async fn store_with_source_tables(name: &str) -> SqlStore {
        let store = SqlStore::connect(&sqlite_url(name)).await.unwrap();

        sqlx::query(
            "CREATE TABLE customers (
                sid TEXT PRIMARY KEY,
                cust_id TEXT, first_name TEXT, last_name TEXT, email TEXT,
                marketing_flag INTEGER NOT NULL DEFAULT 0,
                lty_opt_in INTEGER NOT NULL DEFAULT 0,
                lty_balance INTEGER NOT NULL DEFAULT 0,
                total_transactions INTEGER NOT NULL DEFAULT 0,
                sale_item_count INTEGER NOT NULL DEFAULT 0,
                return_item_count INTEGER NOT NULL DEFAULT 0,
                ytd_sale REAL NOT NULL DEFAULT 0,
                created_at INTEGER,
                synced_to_segment INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&store.pool())
        .await
        .unwrap();

        sqlx::query(
            "CREATE TABLE document_items (
                doc_sid TEXT NOT NULL,
                invn_item_sid TEXT, alu TEXT, description TEXT,
                dcs_code TEXT, vend_code TEXT,
                qty INTEGER NOT NULL DEFAULT 1,
                price REAL NOT NULL DEFAULT 0
            )",
        )
        .execute(&store.pool())
        .await
        .unwrap();

        store
    }

    async fn insert_customer(store: &SqlStore, sid: &str, email: Option<&str>) {
        sqlx::query(
            "INSERT INTO customers (sid, cust_id, first_name, email, marketing_flag, \
             lty_balance, ytd_sale) VALUES (?, ?, ?, ?, 1, 50, 99.5)",
        )
        .bind(sid)
        .bind(format!("CU-{sid}"))
        .bind("Ada")
        .bind(email)
        .execute(&store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_decodes_typed_customer() {
        let store = store_with_source_tables("decode").await;
        insert_customer(&store, "100", Some("a@example.com")).await;

        let rows = store
            .fetch_unsynced_customers(None, None, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let customer = &rows[0];
        assert_eq!(customer.sid, "100");
        assert_eq!(customer.cust_id.as_deref(), Some("CU-100"));
        assert!(customer.marketing_opt_in);
        assert!(!customer.loyalty_opt_in);
        assert_eq!(customer.loyalty_points, 50);
        assert_eq!(customer.ytd_spend, 99.5);
    }

    #[tokio::test]
    async fn test_fetch_by_cursor_and_mark_synced() {
        let store = store_with_source_tables("cursor").await;
        for sid in ["001", "002", "003", "004"] {
            insert_customer(&store, sid, None).await;
        }

        let first = store
            .fetch_unsynced_customers(None, None, 2)
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|c| c.sid.as_str()).collect::<Vec<_>>(),
            vec!["001", "002"]
        );

        let second = store
            .fetch_unsynced_customers(Some("002"), None, 2)
            .await
            .unwrap();
        assert_eq!(
            second.iter().map(|c| c.sid.as_str()).collect::<Vec<_>>(),
            vec!["003", "004"]
        );

        store
            .mark_customers_synced(&["001".into(), "002".into()])
            .await
            .unwrap();

        let remaining = store
            .fetch_unsynced_customers(None, None, 10)
            .await
            .unwrap();
        assert_eq!(
            remaining.iter().map(|c| c.sid.as_str()).collect::<Vec<_>>(),
            vec!["003", "004"]
        );
    }

    #[tokio::test]
    async fn test_line_items_keyed_by_parent() {
        let store = store_with_source_tables("items").await;
        sqlx::query(
            "INSERT INTO document_items (doc_sid, invn_item_sid, alu, description, qty, price) \
             VALUES ('D1', 'P1', 'SKU-1', 'Widget', 2, 10.5), \
                    ('D2', 'P2', 'SKU-2', 'Gadget', 1, 3.0)",
        )
        .execute(&store.pool())
        .await
        .unwrap();

        let items = store.fetch_line_items("D1").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, "P1");
        assert_eq!(items[0].sku.as_deref(), Some("SKU-1"));
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].unit_price, 10.5);
    }

    #[tokio::test]
    async fn test_failed_events_record_summary_purge() {
        let store = SqlStore::connect(&sqlite_url("failures")).await.unwrap();
        store.ensure_schema().await.unwrap();
        // idempotent
        store.ensure_schema().await.unwrap();

        let mut failure = FailedEvent {
            entity_kind: EntityKind::Customer,
            entity_id: "1".into(),
            event_kind: EventKind::Identify,
            error_message: "missing required field: sid".into(),
            category: ErrorCategory::Validation,
            payload: None,
            created_at: Utc::now(),
            retry_count: 0,
            resolved: false,
        };
        store.record(&failure).await.unwrap();

        failure.entity_kind = EntityKind::Order;
        failure.event_kind = EventKind::Track;
        failure.category = ErrorCategory::Transient;
        failure.payload = Some("{\"orderId\":\"D-1\"}".into());
        store.record(&failure).await.unwrap();

        let summary = store.unresolved_summary().await.unwrap();
        assert_eq!(summary.total_unresolved, 2);
        assert_eq!(summary.by_entity[&EntityKind::Customer], 1);
        assert_eq!(summary.by_category[&ErrorCategory::Transient], 1);

        // nothing is older than the retention window yet
        assert_eq!(store.purge_expired().await.unwrap(), 0);

        // back-date one row past the window and purge again
        let expired = (Utc::now() - ChronoDuration::days(RETENTION_DAYS + 1)).timestamp_millis();
        sqlx::query("UPDATE failed_events SET created_at = ? WHERE entity_type = 'order'")
            .bind(expired)
            .execute(&store.pool())
            .await
            .unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);

        let summary = store.unresolved_summary().await.unwrap();
        assert_eq!(summary.total_unresolved, 1);
    }
}
