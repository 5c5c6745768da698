// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP transport for a Segment-compatible batch ingestion endpoint.
//!
//! Events are posted as one JSON body to `/v1/batch`, authenticated with
//! the source write key as basic-auth username. Failures are classified
//! here, at the call site, from the response status or the transport error
//! kind.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{DeliveryError, Transport};
use crate::event::Event;

const BATCH_PATH: &str = "/v1/batch";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Transport that delivers to a Segment-compatible HTTP API.
pub struct SegmentTransport {
    http: reqwest::Client,
    endpoint: String,
    write_key: String,
}

impl SegmentTransport {
    /// Create a transport against `endpoint` (base URL without path,
    /// e.g. `https://api.segment.io`).
    pub fn new(
        endpoint: impl Into<String>,
        write_key: impl Into<String>,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }

        Ok(Self {
            http,
            endpoint,
            write_key: write_key.into(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify_transport_error(error: reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout(error.to_string())
    } else if let Some(status) = error.status() {
        DeliveryError::from_status(status.as_u16(), error.to_string())
    } else {
        DeliveryError::Network(error.to_string())
    }
}

#[async_trait]
impl Transport for SegmentTransport {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "batch": events,
            "sentAt": Utc::now(),
        });

        let response = self
            .http
            .post(format!("{}{}", self.endpoint, BATCH_PATH))
            .basic_auth(&self.write_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(count = events.len(), "batch accepted by destination");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(DeliveryError::from_status(status.as_u16(), message))
    }
}
