//! Consumer loop
//!
//! Reads batches from the consumer group until shutdown is signalled. Every
//! message is acknowledged once processed, whatever the outcome; there is no
//! redelivery and no dead-letter stream. A failed read pauses the loop for the
//! configured backoff and then reconnects.

use std::ops::AddAssign;
use std::time::Duration;

use crmsync_core::models::AssignmentEvent;
use tokio::sync::watch;

use crate::handler::{AssignmentEventHandler, HandleOutcome};
use crate::stream::{decode_fields, EventStream, StreamMessage};

/// Outcome counts for one batch, or summed over a consumer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub applied: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub failed: u64,
}

impl BatchStats {
    pub fn total(&self) -> u64 {
        self.applied + self.skipped + self.invalid + self.failed
    }
}

impl AddAssign for BatchStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.invalid += other.invalid;
        self.failed += other.failed;
    }
}

pub struct AssignmentConsumer<S> {
    stream: S,
    handler: AssignmentEventHandler,
    error_backoff: Duration,
}

impl<S: EventStream> AssignmentConsumer<S> {
    pub fn new(stream: S, handler: AssignmentEventHandler, error_backoff: Duration) -> Self {
        Self {
            stream,
            handler,
            error_backoff,
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped). Returns the
    /// outcome counts of every processed message.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> BatchStats {
        let mut totals = BatchStats::default();

        if !self.start(&mut shutdown).await {
            return totals;
        }
        tracing::info!("Assignment consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = self.stream.read_batch() => read,
            };

            match read {
                Ok(messages) => {
                    if messages.is_empty() {
                        continue;
                    }
                    let stats = self.process_batch(messages).await;
                    tracing::info!(
                        applied = stats.applied,
                        skipped = stats.skipped,
                        invalid = stats.invalid,
                        failed = stats.failed,
                        "Processed assignment event batch"
                    );
                    totals += stats;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_secs = self.error_backoff.as_secs(),
                        "Reading assignment events failed, backing off"
                    );
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                    if let Err(e) = self.stream.reconnect().await {
                        tracing::warn!(error = %e, "Reconnecting to the event stream failed");
                    }
                }
            }
        }

        tracing::info!(
            applied = totals.applied,
            skipped = totals.skipped,
            invalid = totals.invalid,
            failed = totals.failed,
            "Assignment consumer stopped"
        );
        totals
    }

    /// Ensure the consumer group exists, backing off between attempts. False if
    /// shutdown arrived first.
    async fn start(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            match self.stream.ensure_group().await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::error!(error = %e, "Creating consumer group failed, backing off");
                    if !self.pause(shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep for the error backoff. False if shutdown arrived first.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown.changed() => false,
            _ = tokio::time::sleep(self.error_backoff) => true,
        }
    }

    /// Decode, apply and acknowledge every message of a batch.
    pub async fn process_batch(&mut self, messages: Vec<StreamMessage>) -> BatchStats {
        let mut stats = BatchStats::default();

        for message in messages {
            let fields = decode_fields(&message.fields);
            match AssignmentEvent::from_fields(&fields) {
                Err(e) => {
                    stats.invalid += 1;
                    tracing::warn!(
                        message_id = %message.id,
                        error = %e,
                        "Dropping invalid assignment event"
                    );
                }
                Ok(event) => match self.handler.handle(&event).await {
                    Ok(HandleOutcome::Applied) => stats.applied += 1,
                    Ok(HandleOutcome::Skipped(reason)) => {
                        stats.skipped += 1;
                        tracing::debug!(message_id = %message.id, reason = %reason, "Assignment event skipped");
                    }
                    Err(e) => {
                        stats.failed += 1;
                        tracing::error!(
                            message_id = %message.id,
                            error = %e,
                            error_code = e.kind().as_str(),
                            "Handling assignment event failed"
                        );
                    }
                },
            }

            if let Err(e) = self.stream.ack(&message.id).await {
                tracing::warn!(message_id = %message.id, error = %e, "Acknowledging message failed");
            }
        }

        stats
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }
}
