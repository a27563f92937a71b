//! Hook implementations that bridge the engines to the daemon's queue and
//! notification fan-out. Everything here only enqueues or sends on an
//! unbounded channel — nothing may block the commit path.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use wgr_events::EventQueue;
use wgr_ledger::{Micros, ProcessorHooks};
use wgr_notify::{EventEnvelope, Notifier};
use wgr_rewards::{Claim, RewardHooks};
use wgr_schemas::WagerPlacedEvent;

/// Processor-side hooks: feed the reward pipeline and the websocket fan-out.
pub struct DaemonHooks {
    queue: Arc<EventQueue<WagerPlacedEvent>>,
    notifier: Arc<Notifier>,
    house_edge_bps: HashMap<String, i64>,
    default_house_edge_bps: i64,
}

impl DaemonHooks {
    pub fn new(
        queue: Arc<EventQueue<WagerPlacedEvent>>,
        notifier: Arc<Notifier>,
        house_edge_bps: HashMap<String, i64>,
        default_house_edge_bps: i64,
    ) -> Self {
        Self {
            queue,
            notifier,
            house_edge_bps,
            default_house_edge_bps,
        }
    }
}

impl ProcessorHooks for DaemonHooks {
    fn wager_placed(&self, mut event: WagerPlacedEvent) {
        // The processor publishes without edge context; enrich from config
        // here so the consumer sees the edge that was current at wager time.
        if event.house_edge_bps.is_none() {
            let edge = self
                .house_edge_bps
                .get(&event.game_id)
                .copied()
                .unwrap_or(self.default_house_edge_bps);
            event.house_edge_bps = Some(edge);
        }
        self.queue.publish(event);
    }

    fn balance_updated(&self, account_id: Uuid, balance: Micros, currency: &str) {
        self.notifier.send_to(
            account_id,
            &EventEnvelope::BalanceUpdated {
                account_id,
                balance,
                currency: currency.to_string(),
            },
        );
    }

    fn win_recorded(&self, account_id: Uuid, round_id: &str, net: Micros, currency: &str) {
        self.notifier.send_to(
            account_id,
            &EventEnvelope::WinRecorded {
                account_id,
                round_id: round_id.to_string(),
                net_amount: net,
                currency: currency.to_string(),
            },
        );
    }
}

/// Reward-side hooks: push accrual/claim frames to connected clients.
pub struct RewardNotifyHooks {
    notifier: Arc<Notifier>,
}

impl RewardNotifyHooks {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

impl RewardHooks for RewardNotifyHooks {
    fn cashback_accrued(&self, user_id: Uuid, earned: Micros, available_total: Micros) {
        self.notifier.send_to(
            user_id,
            &EventEnvelope::CashbackAccrued {
                user_id,
                earned,
                available_total,
            },
        );
    }

    fn cashback_claimed(&self, user_id: Uuid, claim: &Claim, available_total: Micros) {
        self.notifier.send_to(
            user_id,
            &EventEnvelope::CashbackClaimed {
                user_id,
                claim_id: claim.claim_id,
                net_amount: claim.net_amount,
                available_total,
            },
        );
    }
}
