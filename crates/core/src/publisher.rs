//! Retrying event publisher.
//!
//! The bus is at-least-once; retried publishes of one transition carry
//! the same event id (see [`crate::events`]), so delivery is effectively
//! exactly-once for de-duplicating consumers. When retries run out the
//! caller records the emission as uncertain and moves on; state has
//! already committed.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::events::LoanEvent;
use coruscant_api::BusPublisher;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
#[error("publish of {event_type} for loan {loan_id} failed after {attempts} attempts: {last_error}")]
pub struct PublishError {
    pub loan_id: String,
    pub event_type: &'static str,
    pub attempts: u32,
    pub last_error: String,
}

pub struct EventPublisher {
    bus: Arc<dyn BusPublisher>,
    topic: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn BusPublisher>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// Publish one lifecycle event, retrying with backoff until the bus
    /// acknowledges or attempts run out.
    pub async fn publish(&self, event: &LoanEvent) -> Result<(), PublishError> {
        let payload = event.to_payload();
        let event_id = event.event_id();
        let mut backoff = Backoff::new(BASE_DELAY, MAX_DELAY);
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.bus.publish(&self.topic, payload.clone()).await {
                Ok(()) => {
                    debug!(
                        loan_id = event.loan_id(),
                        event_type = event.event_type(),
                        event_id,
                        attempt,
                        "event published"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        loan_id = event.loan_id(),
                        event_type = event.event_type(),
                        event_id,
                        attempt,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        }

        Err(PublishError {
            loan_id: event.loan_id().to_string(),
            event_type: event.event_type(),
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }
}

/// Publish, and on exhausted retries record the emission as uncertain in
/// the audit log. State is already committed either way.
pub async fn publish_with_audit(
    publisher: &EventPublisher,
    store: &coruscant_store::MemoryLoanStore,
    event: &LoanEvent,
    now: chrono::DateTime<chrono::Utc>,
) {
    if let Err(e) = publisher.publish(event).await {
        warn!(loan_id = event.loan_id(), error = %e, "event delivery uncertain");
        store.append_audit(coruscant_store::AuditEntry::new(
            event.loan_id(),
            now,
            coruscant_store::AuditKind::EventEmissionUncertain {
                event_id: event.event_id(),
            },
        ));
    }
}
