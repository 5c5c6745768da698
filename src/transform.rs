//! Record-to-event transformation.
//!
//! Maps source snapshots into the destination event shape. Empty and absent
//! field values are omitted from the output: the destination treats absence
//! and null differently, and omission avoids overwriting existing
//! destination traits with empty values.

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::event::{Event, EventPayload};
use crate::idempotency;
use crate::record::{CustomerRecord, EntityKind, LineItem, OrderRecord};

pub const ORDER_COMPLETED: &str = "Order Completed";
pub const ORDER_REFUNDED: &str = "Order Refunded";

/// Round a monetary amount to 2 decimal places.
#[must_use]
pub fn round2(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn insert_text(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        if !v.is_empty() {
            map.insert(key.to_string(), Value::String(v.to_string()));
        }
    }
}

/// Build the identify event for a customer profile.
pub fn customer_identify(customer: &CustomerRecord) -> Event {
    let mut traits = Map::new();
    insert_text(&mut traits, "email", customer.email.as_deref());
    insert_text(&mut traits, "firstName", customer.first_name.as_deref());
    insert_text(&mut traits, "lastName", customer.last_name.as_deref());
    insert_text(&mut traits, "customerId", customer.cust_id.as_deref());
    traits.insert("marketingOptIn".into(), json!(customer.marketing_opt_in));
    traits.insert("loyaltyOptIn".into(), json!(customer.loyalty_opt_in));
    traits.insert("loyaltyPoints".into(), json!(customer.loyalty_points));
    traits.insert("totalOrders".into(), json!(customer.total_transactions));
    traits.insert(
        "lifetimeItemsPurchased".into(),
        json!(customer.sale_item_count),
    );
    traits.insert(
        "lifetimeItemsReturned".into(),
        json!(customer.return_item_count),
    );
    traits.insert("ytdSpend".into(), json!(customer.ytd_spend));

    // Typed external-identifier reference so downstream identity resolution
    // can match on the retail customer id.
    let external_id = customer
        .cust_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .unwrap_or(&customer.sid);
    let context = json!({
        "externalIds": [{
            "id": external_id,
            "type": "retailProCustomerId",
            "collection": "users",
            "encoding": "none",
        }]
    });

    Event {
        message_id: idempotency::message_id(EntityKind::Customer, &customer.sid, "identify"),
        timestamp: Utc::now(),
        payload: EventPayload::Identify {
            user_id: customer.sid.clone(),
            traits,
            context: Some(context),
        },
    }
}

fn line_item_value(item: &LineItem) -> Value {
    let mut product = Map::new();
    product.insert("product_id".into(), Value::String(item.product_id.clone()));
    insert_text(&mut product, "sku", item.sku.as_deref());
    insert_text(&mut product, "name", item.description.as_deref());
    product.insert("price".into(), json!(round2(item.unit_price)));
    product.insert("quantity".into(), json!(item.quantity));
    insert_text(&mut product, "category", item.category.as_deref());
    insert_text(&mut product, "brand", item.brand.as_deref());
    Value::Object(product)
}

/// Build the purchase event for an order and its line items.
///
/// The sale flag takes precedence when both flags are set. Revenue is the
/// signed sale total for completions and the absolute value for refunds,
/// rounded to 2 decimal places.
pub fn order_track(order: &OrderRecord, items: &[LineItem]) -> Event {
    let (event_name, revenue) = if order.has_sale {
        (ORDER_COMPLETED, round2(order.sale_total))
    } else {
        (ORDER_REFUNDED, round2(order.sale_total.abs()))
    };

    let mut properties = Map::new();
    insert_text(&mut properties, "orderId", order.doc_no.as_deref());
    properties.insert("revenue".into(), json!(revenue));
    properties.insert("subtotal".into(), json!(round2(order.subtotal)));
    properties.insert("tax".into(), json!(round2(order.tax)));
    properties.insert("shipping".into(), json!(round2(order.shipping)));
    properties.insert("discount".into(), json!(round2(order.discount)));
    properties.insert(
        "currency".into(),
        Value::String(
            order
                .currency
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or("USD")
                .to_string(),
        ),
    );
    insert_text(&mut properties, "paymentMethod", order.payment_method.as_deref());
    insert_text(&mut properties, "storeId", order.store_code.as_deref());
    insert_text(&mut properties, "shippingMethod", order.ship_method.as_deref());
    properties.insert(
        "products".into(),
        Value::Array(items.iter().map(line_item_value).collect()),
    );

    // Contact email rides along as a trait hint on the event context, not as
    // a separate identify call.
    let context = order
        .contact_email()
        .map(|email| json!({"traits": {"email": email}}));

    Event {
        message_id: idempotency::message_id(EntityKind::Order, &order.sid, event_name),
        timestamp: Utc::now(),
        payload: EventPayload::Track {
            user_id: order.user_id().to_string(),
            event: event_name.to_string(),
            properties,
            context,
        },
    }
}
