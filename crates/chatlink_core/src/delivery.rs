//! crates/chatlink_core/src/delivery.rs
//!
//! The Proactive Delivery Scheduler: drains queued outbound messages for
//! linked accounts through the channel transport. Sequential and best-effort;
//! every processed item reaches a terminal status (`sent` or `failed`) and no
//! failed item is re-queued.

use std::sync::Arc;

use crate::ports::{ChannelTransport, ChatStore};

/// Maximum pending messages processed per cycle.
pub const DELIVERY_BATCH_SIZE: i64 = 10;

/// The scheduler piggybacks on the bridge's poll loop: one delivery cycle
/// every this many poll cycles.
pub const DELIVERY_CYCLE_INTERVAL: u64 = 30;

/// Outcome counts for one delivery cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

pub struct ProactiveDeliverer {
    store: Arc<dyn ChatStore>,
    transport: Arc<dyn ChannelTransport>,
}

impl ProactiveDeliverer {
    pub fn new(store: Arc<dyn ChatStore>, transport: Arc<dyn ChannelTransport>) -> Self {
        Self { store, transport }
    }

    /// Runs one delivery cycle. One item's failure never aborts the batch;
    /// bookkeeping errors are logged and the cycle moves on.
    pub async fn run_cycle(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let batch = match self.store.pending_proactive(DELIVERY_BATCH_SIZE).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("failed to load pending proactive messages: {e}");
                return report;
            }
        };

        for (message, chat_id) in batch {
            match self.transport.send_text(&chat_id, &message.content).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_proactive_sent(message.id).await {
                        tracing::error!(id = %message.id, "failed to mark sent: {e}");
                    } else {
                        tracing::info!(id = %message.id, chat_id, "proactive message sent");
                        report.sent += 1;
                    }
                }
                Err(e) => {
                    // Terminal: no automatic retry of failed deliveries.
                    tracing::warn!(id = %message.id, chat_id, "proactive delivery failed: {e}");
                    if let Err(mark_err) = self.store.mark_proactive_failed(message.id).await {
                        tracing::error!(id = %message.id, "failed to mark failed: {mark_err}");
                    }
                    report.failed += 1;
                }
            }
        }

        report
    }
}
