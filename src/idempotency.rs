//! Stable idempotency keys for destination message ids.
//!
//! Retrying the same record must produce the same message id so the
//! destination can deduplicate replays. The key is a SHA-256 digest of the
//! entity reference, rendered in UUID-like groups for destination
//! compatibility.

use sha2::{Digest, Sha256};

use crate::record::EntityKind;

/// Deterministic message id for `(entity_kind, entity_id, event_type)`.
///
/// Pure function: identical inputs yield identical output across processes
/// and restarts. `event_type` discriminates the event kinds a single entity
/// can produce (e.g. `"identify"` vs a track event name).
#[must_use]
pub fn message_id(entity_kind: EntityKind, entity_id: &str, event_type: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", entity_kind.as_str(), entity_id, event_type));
    let hx = hex::encode(digest);
    format!(
        "{}-{}-{}-{}-{}",
        &hx[..8],
        &hx[8..12],
        &hx[12..16],
        &hx[16..20],
        &hx[20..32]
    )
}
