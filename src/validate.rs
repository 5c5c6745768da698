//! Per-record admissibility checks.
//!
//! Validation runs before any side effect. A rejected record is recorded as
//! a `validation` failure and skipped; validation failures are never retried.

use thiserror::Error;

use crate::record::{CustomerRecord, OrderRecord};

/// Why a record is inadmissible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: sid")]
    MissingSourceId,
    #[error("invalid email format: {0}")]
    InvalidEmail(String),
    #[error("no user identifier available")]
    NoUserIdentifier,
    #[error("order has neither sale nor return flag")]
    NoSaleOrReturnFlag,
}

/// Check a customer row before sending an identify event.
pub fn validate_customer(customer: &CustomerRecord) -> Result<(), ValidationError> {
    if customer.sid.is_empty() {
        return Err(ValidationError::MissingSourceId);
    }

    if let Some(email) = customer.email.as_deref() {
        if !email.is_empty() && !email.contains('@') {
            return Err(ValidationError::InvalidEmail(email.to_string()));
        }
    }

    Ok(())
}

/// Check an order row before sending a purchase event.
pub fn validate_order(order: &OrderRecord) -> Result<(), ValidationError> {
    if order.sid.is_empty() {
        return Err(ValidationError::MissingSourceId);
    }

    if order.user_id().is_empty() {
        return Err(ValidationError::NoUserIdentifier);
    }

    if !order.has_sale && !order.has_return {
        return Err(ValidationError::NoSaleOrReturnFlag);
    }

    Ok(())
}
