// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded accumulation of outgoing events.
//!
//! The [`DeliveryBatch`] collects transformed events together with the
//! source-row identifiers they correspond to, and reports when the count
//! threshold is hit. It is cleared on every flush or chunk boundary and is
//! exclusive to one active sync run.

use tracing::debug;

use crate::event::Event;

/// Why a batch was handed off for flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Event count threshold reached
    Count,
    /// End of a source chunk
    ChunkEnd,
    /// End of the sync run
    RunEnd,
}

/// Pending events paired with the source rows they came from.
pub struct DeliveryBatch {
    row_ids: Vec<String>,
    events: Vec<Event>,
    max_events: usize,
}

impl DeliveryBatch {
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            row_ids: Vec::new(),
            events: Vec::new(),
            max_events,
        }
    }

    /// Add an event, returns a flush reason if the count threshold is hit.
    pub fn push(&mut self, event: Event, row_id: String) -> Option<FlushReason> {
        self.row_ids.push(row_id);
        self.events.push(event);

        if self.events.len() >= self.max_events {
            Some(FlushReason::Count)
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take the pending batch, leaving the accumulator empty.
    pub fn take(&mut self) -> (Vec<String>, Vec<Event>) {
        let count = self.events.len();
        debug!(count, "delivery batch taken for flush");
        (
            std::mem::take(&mut self.row_ids),
            std::mem::take(&mut self.events),
        )
    }
}
