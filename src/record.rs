//! Domain records.
//!
//! These are the typed snapshots that flow through the sync pipeline. Rows
//! are decoded into these structures in a single step at the store boundary;
//! everything downstream (validation, transformation, delivery) works on
//! typed fields, never on raw row maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which source entity a record or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Order,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Order => "order",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Self::Customer),
            "order" => Some(Self::Order),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two destination event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Identify,
    Track,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Track => "track",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identify" => Some(Self::Identify),
            "track" => Some(Self::Track),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy.
///
/// - `Validation`: record structurally inadmissible; recorded, never retried.
/// - `Transient`: network/timeout/5xx-class; retried up to the budget.
/// - `Permanent`: 4xx-class or unclassified; recorded, not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Validation,
    Transient,
    Permanent,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validation" => Some(Self::Validation),
            "transient" => Some(Self::Transient),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer profile row, snapshotted from the source store.
///
/// The `sid` is the source system identifier and must be non-empty for the
/// record to be admissible. Mutated only by the extraction layer; the sync
/// path treats it as read-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub sid: String,
    /// External customer id (`CUST_ID` in the source system).
    pub cust_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub marketing_opt_in: bool,
    pub loyalty_opt_in: bool,
    pub loyalty_points: i64,
    pub total_transactions: i64,
    pub sale_item_count: i64,
    pub return_item_count: i64,
    pub ytd_spend: f64,
    pub created_at: Option<DateTime<Utc>>,
}

/// An order (document) row, snapshotted from the source store.
///
/// An order with neither `has_sale` nor `has_return` set is inadmissible.
/// Line items are fetched separately, keyed by `sid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub sid: String,
    pub doc_no: Option<String>,
    /// Buyer customer id (`BT_CUID`); falls back to `sid` as the
    /// destination user id.
    pub buyer_id: Option<String>,
    pub buyer_email: Option<String>,
    pub ship_email: Option<String>,
    pub sale_total: f64,
    pub subtotal: f64,
    pub tax: f64,
    pub discount: f64,
    pub shipping: f64,
    pub sold_qty: i64,
    pub return_qty: i64,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub store_code: Option<String>,
    pub ship_method: Option<String>,
    pub has_sale: bool,
    pub has_return: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    /// Destination user id: buyer id when present, otherwise the source id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self.buyer_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.sid,
        }
    }

    /// Contact email: buyer email, falling back to the alternate recipient.
    #[must_use]
    pub fn contact_email(&self) -> Option<&str> {
        self.buyer_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .or_else(|| self.ship_email.as_deref().filter(|e| !e.is_empty()))
    }
}

/// One line item of an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub unit_price: f64,
    pub quantity: i64,
}

/// A durably recorded delivery failure.
///
/// Created by the failure recorder whenever a record cannot be delivered.
/// Never mutated by the sync path itself; resolution is an external action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub event_kind: EventKind,
    pub error_message: String,
    pub category: ErrorCategory,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub resolved: bool,
}
