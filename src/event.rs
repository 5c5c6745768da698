//! Outgoing event wire model.
//!
//! Two event kinds exist on the destination API: *identify* (profile
//! update) and *track* (behavioral event). Both carry a deterministic
//! `messageId` for deduplication and a call-time UTC timestamp.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::record::EventKind;

/// Event body, tagged the way the destination batch API expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    Identify {
        #[serde(rename = "userId")]
        user_id: String,
        traits: Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    Track {
        #[serde(rename = "userId")]
        user_id: String,
        event: String,
        properties: Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
}

/// A single outgoing event: payload plus dedup id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Identify { .. } => EventKind::Identify,
            EventPayload::Track { .. } => EventKind::Track,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        match &self.payload {
            EventPayload::Identify { user_id, .. } | EventPayload::Track { user_id, .. } => user_id,
        }
    }

    /// Track event name; `None` for identify events.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Track { event, .. } => Some(event),
            EventPayload::Identify { .. } => None,
        }
    }
}
