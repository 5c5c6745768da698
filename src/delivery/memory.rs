//! In-memory transports for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeliveryError, Transport};
use crate::event::Event;

/// Records every successfully delivered batch and can be scripted to fail.
///
/// Queued failures (`push_failure`) are consumed one per delivery attempt;
/// `fail_always` makes every attempt fail with a clone of the given error.
#[derive(Default)]
pub struct RecordingTransport {
    batches: Mutex<Vec<Vec<Event>>>,
    scripted_failures: Mutex<VecDeque<DeliveryError>>,
    persistent_failure: Mutex<Option<DeliveryError>>,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next delivery attempt.
    pub fn push_failure(&self, error: DeliveryError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Fail every delivery attempt from now on.
    pub fn fail_always(&self, error: DeliveryError) {
        *self.persistent_failure.lock() = Some(error);
    }

    /// Stop failing (clears `fail_always`).
    pub fn recover(&self) {
        *self.persistent_failure.lock() = None;
    }

    /// Total delivery attempts, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of every successfully delivered batch.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }

    /// Total events across all delivered batches.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.persistent_failure.lock().clone() {
            return Err(error);
        }

        self.batches.lock().push(events.to_vec());
        Ok(())
    }
}
