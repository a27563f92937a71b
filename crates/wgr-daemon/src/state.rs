//! Shared runtime state and background tasks for wgr-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns the
//! wiring between the engines and the periodic sweeps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use wgr_audit::{AuditTopic, AuditWriter};
use wgr_config::LoadedConfig;
use wgr_events::EventQueue;
use wgr_ledger::{LedgerStore, Micros, Processor, SessionStore};
use wgr_notify::Notifier;
use wgr_rewards::{RewardEngine, RewardPolicy, RewardStore};
use wgr_schemas::WagerPlacedEvent;

use crate::hooks::{DaemonHooks, RewardNotifyHooks};

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub config: wgr_config::CoreConfig,
    pub config_hash: String,
    /// One id per daemon process, stamped on every audit record.
    pub run_id: Uuid,

    pub ledger: Arc<LedgerStore>,
    pub sessions: Arc<SessionStore>,
    pub processor: Arc<Processor>,
    pub rewards: Arc<RewardEngine>,
    pub queue: Arc<EventQueue<WagerPlacedEvent>>,
    pub notifier: Arc<Notifier>,

    /// Latest balance the provider side reported per user, fed by the
    /// balance-report endpoint; what reconciliation compares against.
    pub provider_view: Arc<RwLock<HashMap<Uuid, Micros>>>,

    audit: Mutex<AuditWriter>,
}

impl AppState {
    pub fn new(loaded: LoadedConfig, audit: AuditWriter) -> Self {
        let run_id = Uuid::new_v4();
        let config = loaded.config;

        let notifier = Arc::new(Notifier::new());
        let queue = Arc::new(EventQueue::new());

        let ledger = Arc::new(LedgerStore::new());
        let sessions = Arc::new(SessionStore::new());
        let processor = Arc::new(Processor::new(
            Arc::clone(&ledger),
            Arc::clone(&sessions),
            Arc::new(DaemonHooks::new(
                Arc::clone(&queue),
                Arc::clone(&notifier),
                config.house_edge_bps.clone(),
                config.default_house_edge_bps,
            )),
        ));

        let rewards = Arc::new(RewardEngine::new(
            Arc::new(RewardStore::new()),
            Arc::new(RewardPolicy {
                tiers: config.tiers.clone(),
                house_edge_bps: config.house_edge_bps.clone(),
                default_house_edge_bps: config.default_house_edge_bps,
                claim_fee_bps: config.claim_fee_bps,
                earning_expiry_days: config.earning_expiry_days,
            }),
            Arc::new(RewardNotifyHooks::new(Arc::clone(&notifier))),
        ));

        Self {
            config,
            config_hash: loaded.config_hash,
            run_id,
            ledger,
            sessions,
            processor,
            rewards,
            queue,
            notifier,
            provider_view: Arc::new(RwLock::new(HashMap::new())),
            audit: Mutex::new(audit),
        }
    }

    /// Best-effort audit append. Losing a record is logged, never fatal —
    /// the money already moved and failing the request now would desync us
    /// from the provider.
    pub fn audit(&self, topic: AuditTopic, event_type: &str, payload: serde_json::Value) {
        let mut writer = self.audit.lock().expect("audit writer poisoned");
        if let Err(err) = writer.append(topic, event_type, payload) {
            warn!(error = %err, event_type, "audit append failed");
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Periodically expire due earnings.
pub fn spawn_expiry_sweep(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let expired = state.rewards.expire_sweep(Utc::now());
            if expired > 0 {
                state.audit(
                    AuditTopic::Reward,
                    "earnings_expired",
                    json!({ "count": expired }),
                );
            }
        }
    });
}

/// Periodically reconcile every user the provider has reported a balance
/// for. Small drifts heal toward the provider; large ones are audited for
/// manual review and left alone.
pub fn spawn_reconcile_sweep(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot: Vec<(Uuid, Micros)> = {
                let view = state.provider_view.read().await;
                view.iter().map(|(k, v)| (*k, *v)).collect()
            };
            for (user_id, provider_balance) in snapshot {
                if let Err(err) = reconcile_one(&state, user_id, provider_balance) {
                    warn!(%user_id, error = %err, "reconcile pass failed");
                }
            }
        }
    });
}

/// One reconcile pass for one user; shared by the sweep and the manual
/// endpoint.
pub fn reconcile_one(
    state: &AppState,
    user_id: Uuid,
    provider_balance: Micros,
) -> Result<wgr_reconcile::ReconcileOutcome, wgr_ledger::TxError> {
    let now = Utc::now();
    let internal = state.processor.balance_of(user_id)?;
    let status = wgr_reconcile::validate(user_id, internal, provider_balance, now);
    let outcome = wgr_reconcile::reconcile(&status, state.config.reconcile_tolerance(), |target| {
        state.processor.set_balance_to(user_id, target, now)
    })?;
    if !outcome.is_clean() {
        state.audit(
            AuditTopic::Reconcile,
            "reconcile_outcome",
            json!({
                "user_id": user_id,
                "internal_micros": status.internal_balance.raw(),
                "provider_micros": status.provider_balance.raw(),
                "outcome": outcome,
            }),
        );
    }
    Ok(outcome)
}
