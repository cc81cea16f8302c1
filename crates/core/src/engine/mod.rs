//! Liquidation engine: the bounded work queue, the worker pool, and the
//! recovery paths that re-enqueue loans after restarts or deferrals.

mod sizing;
mod worker;

pub use sizing::{next_lot, plan_lots, required_quantity};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::prices::PriceBook;
use crate::publisher::EventPublisher;
use coruscant_api::{Venue, VenueClient};
use coruscant_store::{LoanStatus, MemoryLoanStore};

/// Bounded queue of loan ids awaiting a liquidation worker.
#[derive(Clone)]
pub struct LiquidationQueue {
    tx: mpsc::Sender<String>,
}

impl LiquidationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Non-blocking enqueue. A full queue is fine: the loan is already
    /// `liquidating`, and the recovery sweep will pick it up.
    pub fn try_enqueue(&self, loan_id: &str) -> bool {
        self.tx.try_send(loan_id.to_string()).is_ok()
    }
}

/// The two venue clients, addressable by venue.
pub struct VenueClients {
    pub mos_espa: Arc<dyn VenueClient>,
    pub black_spire: Arc<dyn VenueClient>,
}

impl VenueClients {
    pub fn client_for(&self, venue: Venue) -> &Arc<dyn VenueClient> {
        match venue {
            Venue::MosEspa => &self.mos_espa,
            Venue::BlackSpire => &self.black_spire,
        }
    }
}

/// Shared dependencies for liquidation workers.
pub struct LiquidationRunner {
    pub(crate) store: Arc<MemoryLoanStore>,
    pub(crate) book: Arc<PriceBook>,
    pub(crate) publisher: Arc<EventPublisher>,
    pub(crate) venues: VenueClients,
    pub(crate) clock: Arc<dyn Clock>,
    /// Cap for the per-attempt trade backoff
    pub(crate) trade_backoff_cap: Duration,
}

impl LiquidationRunner {
    pub fn new(
        store: Arc<MemoryLoanStore>,
        book: Arc<PriceBook>,
        publisher: Arc<EventPublisher>,
        venues: VenueClients,
        clock: Arc<dyn Clock>,
        trade_backoff_cap: Duration,
    ) -> Self {
        Self {
            store,
            book,
            publisher,
            venues,
            clock,
            trade_backoff_cap,
        }
    }

    /// Spawn the worker pool over a shared job receiver. Each worker
    /// owns a unique lease identity for its lifetime.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        rx: mpsc::Receiver<String>,
    ) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        (0..count)
            .map(|index| {
                let runner = self.clone();
                let rx = rx.clone();
                let worker_id = format!("liq-{index}-{}", Uuid::new_v4());
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(loan_id) => runner.run_loan(&worker_id, &loan_id).await,
                            None => break,
                        }
                    }
                    debug!(worker_id = %worker_id, "worker stopped");
                })
            })
            .collect()
    }

    /// Re-enqueue every loan found mid-liquidation. Run once at startup.
    pub fn startup_scan(&self, queue: &LiquidationQueue) {
        let pending = self.store.loans_in_status(LoanStatus::Liquidating);
        let mut enqueued = 0usize;
        for loan in &pending {
            if queue.try_enqueue(&loan.loan_id) {
                enqueued += 1;
            }
        }
        info!(
            pending = pending.len(),
            enqueued, "startup scan for in-flight liquidations"
        );
    }

    /// Periodic sweep re-enqueueing `liquidating` loans. Workers that
    /// find the lease held elsewhere drop the job, so double enqueues
    /// are harmless.
    pub async fn run_recovery_sweep(
        self: Arc<Self>,
        queue: LiquidationQueue,
        every: Duration,
    ) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let pending = self.store.loans_in_status(LoanStatus::Liquidating);
            if pending.is_empty() {
                continue;
            }
            let mut enqueued = 0usize;
            for loan in &pending {
                if queue.try_enqueue(&loan.loan_id) {
                    enqueued += 1;
                }
            }
            debug!(pending = pending.len(), enqueued, "recovery sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_bounded() {
        let (queue, mut rx) = LiquidationQueue::new(1);
        assert!(queue.try_enqueue("L1"));
        // Full queue defers instead of blocking
        assert!(!queue.try_enqueue("L2"));

        assert_eq!(rx.recv().await.unwrap(), "L1");
        assert!(queue.try_enqueue("L2"));
    }
}
