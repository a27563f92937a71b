//! Reward consumer task: drains wager events into the reward engine.
//!
//! The queue delivers at least once; the engine's `source_wager_id` guard
//! makes replays harmless, so this loop can nack freely on any failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wgr_rewards::RewardEngine;
use wgr_schemas::WagerPlacedEvent;

use crate::queue::EventQueue;

/// Pause after a failed accrual before the payload is retried.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Run the reward consumer until the handle is aborted (daemon shutdown).
pub fn spawn_reward_consumer(
    queue: Arc<EventQueue<WagerPlacedEvent>>,
    engine: Arc<RewardEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delivery = queue.recv().await;
            match engine.on_wager_event(delivery.payload(), Utc::now()) {
                Ok(outcome) => {
                    debug!(
                        source_wager_id = %delivery.payload().source_transaction_id,
                        attempts = delivery.attempts,
                        ?outcome,
                        "wager event consumed"
                    );
                    delivery.ack();
                }
                Err(err) => {
                    warn!(
                        source_wager_id = %delivery.payload().source_transaction_id,
                        attempts = delivery.attempts,
                        error = %err,
                        "accrual failed, redelivering"
                    );
                    delivery.nack();
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    })
}
