//! Reward engine — turns committed wager events into cashback earnings and
//! serves claims against them.
//!
//! # Determinism
//! Accrual is pure given (event, policy, prior state, `now`): GGR is
//! `wager * house_edge_bps`, cashback is `GGR * tier_rate_bps`, both through
//! exact basis-point math, then clamped to the tightest window headroom.
//! Tier progression is monotonic: levels only ever go up.
//!
//! # Claims
//! A claim consumes earnings oldest-first. The deduction plan applies
//! atomically in the store, then the wallet credit runs through the caller's
//! closure; a failed credit reverts the plan (compensation, not distributed
//! transaction).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use wgr_ledger::{Micros, TxError};
use wgr_schemas::WagerPlacedEvent;

use crate::store::{ClaimDeduction, RewardStore, RewardStoreError};
use crate::tiers::TierTable;
use crate::types::{
    AccrualOutcome, Claim, ClaimStatus, Earning, EarningStatus, RewardSummary, UserRewardState,
};
use crate::windows::LimitWindow;

/// Bounded plan-rebuild attempts when claims race claims or the expiry sweep.
const MAX_CLAIM_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RewardError {
    /// Claim amounts must be strictly positive.
    NonPositiveAmount { amount: Micros },
    InsufficientAvailable { requested: Micros, available: Micros },
    /// Plan kept going stale against concurrent claims/expiry.
    ConcurrentUpdateConflict { attempts: u32 },
    /// Deductions were reverted; the wallet never saw the money.
    CreditFailed(TxError),
    /// Basis-point math left the representable range.
    AmountOverflow,
}

impl fmt::Display for RewardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveAmount { amount } => {
                write!(f, "claim amount must be positive, got {amount}")
            }
            Self::InsufficientAvailable {
                requested,
                available,
            } => write!(
                f,
                "insufficient available cashback: requested {requested}, available {available}"
            ),
            Self::ConcurrentUpdateConflict { attempts } => {
                write!(f, "claim plan conflicted after {attempts} attempts")
            }
            Self::CreditFailed(err) => write!(f, "wallet credit failed: {err}"),
            Self::AmountOverflow => write!(f, "reward amount out of representable range"),
        }
    }
}

impl std::error::Error for RewardError {}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Static reward parameters, loaded from configuration.
#[derive(Debug, Clone)]
pub struct RewardPolicy {
    pub tiers: TierTable,
    /// Per-game house edge override, basis points.
    pub house_edge_bps: HashMap<String, i64>,
    /// Fallback edge for games with no table entry and no edge on the event.
    pub default_house_edge_bps: i64,
    /// Fee withheld from claim payouts, basis points of the claimed amount.
    pub claim_fee_bps: i64,
    /// Earnings expire this many days after creation.
    pub earning_expiry_days: i64,
}

impl RewardPolicy {
    pub fn house_edge_for(&self, game_id: &str) -> i64 {
        self.house_edge_bps
            .get(game_id)
            .copied()
            .unwrap_or(self.default_house_edge_bps)
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Side-effect seams; implementations must only enqueue.
pub trait RewardHooks: Send + Sync {
    /// An earning landed (possibly zero after clamping).
    fn cashback_accrued(&self, _user_id: Uuid, _earned: Micros, _available_total: Micros) {}

    /// A claim completed and the wallet was credited.
    fn cashback_claimed(&self, _user_id: Uuid, _claim: &Claim, _available_total: Micros) {}
}

pub struct NoopRewardHooks;

impl RewardHooks for NoopRewardHooks {}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RewardEngine {
    store: Arc<RewardStore>,
    policy: Arc<RewardPolicy>,
    hooks: Arc<dyn RewardHooks>,
}

impl RewardEngine {
    pub fn new(
        store: Arc<RewardStore>,
        policy: Arc<RewardPolicy>,
        hooks: Arc<dyn RewardHooks>,
    ) -> Self {
        Self {
            store,
            policy,
            hooks,
        }
    }

    pub fn store(&self) -> &Arc<RewardStore> {
        &self.store
    }

    pub fn policy(&self) -> &RewardPolicy {
        &self.policy
    }

    /// Process one wager event. Idempotent on `source_transaction_id`:
    /// redeliveries return `Duplicate` and change nothing.
    pub fn on_wager_event(
        &self,
        event: &WagerPlacedEvent,
        now: DateTime<Utc>,
    ) -> Result<AccrualOutcome, RewardError> {
        let wager = Micros::new(event.amount_micros.max(0));

        let state = self
            .store
            .user(event.user_id)
            .unwrap_or_else(|| self.new_user_state(event.user_id, now));
        let tier = self
            .policy
            .tiers
            .by_level(state.current_tier_level)
            .unwrap_or_else(|| self.policy.tiers.lowest());

        let edge_bps = event
            .house_edge_bps
            .unwrap_or_else(|| self.policy.house_edge_for(&event.game_id));
        let ggr = wager
            .checked_bps(edge_bps)
            .ok_or(RewardError::AmountOverflow)?;
        let raw_earned = ggr
            .checked_bps(tier.cashback_bps)
            .ok_or(RewardError::AmountOverflow)?;

        // Clamp to the tightest window headroom. Zero headroom still creates
        // a zero-amount earning so the idempotency guard holds.
        let mut earned = raw_earned;
        for (window, limit) in [
            (LimitWindow::Daily, tier.daily_limit),
            (LimitWindow::Weekly, tier.weekly_limit),
            (LimitWindow::Monthly, tier.monthly_limit),
        ] {
            if let Some(limit) = limit {
                let used = self.store.accrued_since(event.user_id, window.start(now));
                let headroom = limit.saturating_sub(used).max(Micros::ZERO);
                earned = earned.min(headroom);
                if earned < raw_earned {
                    debug!(
                        user_id = %event.user_id,
                        window = window.as_str(),
                        %limit,
                        %used,
                        "cashback clamped by window limit"
                    );
                }
            }
        }

        let earning = Earning {
            earning_id: Uuid::new_v4(),
            user_id: event.user_id,
            source_wager_id: event.source_transaction_id.clone(),
            game_id: event.game_id.clone(),
            ggr_amount: ggr,
            cashback_bps: tier.cashback_bps,
            earned_amount: earned,
            available_amount: earned,
            status: EarningStatus::Available,
            created_at: now,
            expires_at: now + Duration::days(self.policy.earning_expiry_days),
            version: 1,
        };
        let earning_id = earning.earning_id;

        match self.store.insert_earning(earning) {
            Ok(()) => {}
            Err(RewardStoreError::DuplicateSource { earning_id }) => {
                debug!(
                    source_wager_id = %event.source_transaction_id,
                    %earning_id,
                    "duplicate wager event, skipping accrual"
                );
                return Ok(AccrualOutcome::Duplicate { earning_id });
            }
            Err(err) => {
                warn!(error = %err, "earning insert failed");
                return Err(RewardError::ConcurrentUpdateConflict { attempts: 1 });
            }
        }

        // Lifetime stats and monotonic tier progression.
        let mut state = state;
        state.lifetime_ggr += ggr;
        state.lifetime_wagers += wager;
        let qualified = self.policy.tiers.qualifying(state.lifetime_ggr).tier_level;
        if qualified > state.current_tier_level {
            info!(
                user_id = %event.user_id,
                from = state.current_tier_level,
                to = qualified,
                lifetime_ggr = %state.lifetime_ggr,
                "tier promotion"
            );
            state.current_tier_level = qualified;
        }
        state.progress_bps = self.progress_bps(&state);
        state.updated_at = now;
        self.store.upsert_user(state);

        info!(
            user_id = %event.user_id,
            source_wager_id = %event.source_transaction_id,
            %ggr,
            %earned,
            "cashback accrued"
        );
        self.hooks.cashback_accrued(
            event.user_id,
            earned,
            self.store.available_total(event.user_id, now),
        );

        Ok(AccrualOutcome::Accrued {
            earning_id,
            ggr,
            earned,
            clamped_by: raw_earned - earned,
            tier_level: tier.tier_level,
        })
    }

    /// Claim `requested` of available cashback, consuming earnings oldest
    /// first. `credit` moves the net amount into the wallet; it runs exactly
    /// once per successful claim, and a failed credit reverts the deductions.
    pub fn claim<F>(
        &self,
        user_id: Uuid,
        requested: Micros,
        now: DateTime<Utc>,
        credit: F,
    ) -> Result<Claim, RewardError>
    where
        F: FnOnce(Micros) -> Result<Micros, TxError>,
    {
        if requested <= Micros::ZERO {
            return Err(RewardError::NonPositiveAmount { amount: requested });
        }

        let mut attempts = 0;
        let plan = loop {
            attempts += 1;
            let claimable = self.store.claimable_for(user_id, now);
            let available = claimable
                .iter()
                .fold(Micros::ZERO, |acc, e| acc + e.available_amount);
            if requested > available {
                return Err(RewardError::InsufficientAvailable {
                    requested,
                    available,
                });
            }

            let plan = build_plan(&claimable, requested);
            match self.store.apply_claim_plan(&plan) {
                Ok(()) => break plan,
                Err(RewardStoreError::PlanConflict { earning_id })
                | Err(RewardStoreError::PlanOverdraw { earning_id })
                    if attempts < MAX_CLAIM_ATTEMPTS =>
                {
                    debug!(user_id = %user_id, %earning_id, attempts, "claim plan stale, rebuilding");
                    continue;
                }
                Err(_) => {
                    return Err(RewardError::ConcurrentUpdateConflict { attempts });
                }
            }
        };

        let fee = requested
            .checked_bps(self.policy.claim_fee_bps)
            .ok_or(RewardError::AmountOverflow)?;
        let net = requested - fee;

        if let Err(err) = credit(net) {
            let reverted = self.store.revert_claim_plan(&plan);
            warn!(
                user_id = %user_id,
                %requested,
                error = %err,
                reverted,
                "wallet credit failed, claim deductions reverted"
            );
            self.store.record_claim(Claim {
                claim_id: Uuid::new_v4(),
                user_id,
                requested_amount: requested,
                fee,
                net_amount: Micros::ZERO,
                earning_ids_consumed: Vec::new(),
                status: ClaimStatus::Rejected,
                created_at: now,
            });
            return Err(RewardError::CreditFailed(err));
        }

        let claim = Claim {
            claim_id: Uuid::new_v4(),
            user_id,
            requested_amount: requested,
            fee,
            net_amount: net,
            earning_ids_consumed: plan.iter().map(|d| d.earning_id).collect(),
            status: ClaimStatus::Completed,
            created_at: now,
        };
        self.store.record_claim(claim.clone());

        info!(
            user_id = %user_id,
            claim_id = %claim.claim_id,
            %requested,
            %net,
            earnings = claim.earning_ids_consumed.len(),
            "cashback claimed"
        );
        self.hooks
            .cashback_claimed(user_id, &claim, self.store.available_total(user_id, now));
        Ok(claim)
    }

    /// Expire earnings past their deadline. Returns how many transitioned.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> usize {
        let expired = self.store.expire_due(now);
        for (earning, forfeited) in &expired {
            info!(
                user_id = %earning.user_id,
                earning_id = %earning.earning_id,
                forfeited = %forfeited,
                "earning expired"
            );
        }
        expired.len()
    }

    /// Everything the user-facing summary endpoint reports.
    pub fn summary(&self, user_id: Uuid, now: DateTime<Utc>) -> RewardSummary {
        let state = self
            .store
            .user(user_id)
            .unwrap_or_else(|| self.new_user_state(user_id, now));
        let tier = self
            .policy
            .tiers
            .by_level(state.current_tier_level)
            .unwrap_or_else(|| self.policy.tiers.lowest());

        let pending = self
            .store
            .earnings_for(user_id)
            .iter()
            .filter(|e| e.status == EarningStatus::Pending && !e.is_expired_at(now))
            .fold(Micros::ZERO, |acc, e| acc + e.available_amount);

        let headroom = |window: LimitWindow, limit: Option<Micros>| {
            limit.map(|l| {
                l.saturating_sub(self.store.accrued_since(user_id, window.start(now)))
                    .max(Micros::ZERO)
            })
        };

        RewardSummary {
            user_id,
            tier_level: tier.tier_level,
            tier_name: tier.name.clone(),
            cashback_bps: tier.cashback_bps,
            lifetime_ggr: state.lifetime_ggr,
            lifetime_wagers: state.lifetime_wagers,
            progress_bps: state.progress_bps,
            next_tier_min_ggr: self
                .policy
                .tiers
                .next_above(tier.tier_level)
                .map(|t| t.min_ggr_required),
            available_cashback: self.store.available_total(user_id, now),
            pending_cashback: pending,
            total_claimed: self.store.total_claimed(user_id),
            daily_headroom: headroom(LimitWindow::Daily, tier.daily_limit),
            weekly_headroom: headroom(LimitWindow::Weekly, tier.weekly_limit),
            monthly_headroom: headroom(LimitWindow::Monthly, tier.monthly_limit),
        }
    }

    fn new_user_state(&self, user_id: Uuid, now: DateTime<Utc>) -> UserRewardState {
        UserRewardState {
            user_id,
            current_tier_level: self.policy.tiers.lowest().tier_level,
            lifetime_ggr: Micros::ZERO,
            lifetime_wagers: Micros::ZERO,
            progress_bps: 0,
            updated_at: now,
        }
    }

    /// Progress toward the next tier in bps; 10_000 when at the top.
    fn progress_bps(&self, state: &UserRewardState) -> i64 {
        let Some(current) = self.policy.tiers.by_level(state.current_tier_level) else {
            return 0;
        };
        let Some(next) = self.policy.tiers.next_above(state.current_tier_level) else {
            return wgr_ledger::BPS_SCALE;
        };
        let span = next.min_ggr_required - current.min_ggr_required;
        if span <= Micros::ZERO {
            return wgr_ledger::BPS_SCALE;
        }
        let into = (state.lifetime_ggr - current.min_ggr_required).max(Micros::ZERO);
        let bps = (into.raw() as i128) * (wgr_ledger::BPS_SCALE as i128) / (span.raw() as i128);
        (bps as i64).clamp(0, wgr_ledger::BPS_SCALE)
    }
}

/// Oldest-first deduction plan covering `requested` exactly. Caller has
/// verified total availability.
fn build_plan(claimable: &[Earning], requested: Micros) -> Vec<ClaimDeduction> {
    let mut remaining = requested;
    let mut plan = Vec::new();
    for earning in claimable {
        if remaining.is_zero() {
            break;
        }
        let take = earning.available_amount.min(remaining);
        if take.is_zero() {
            continue;
        }
        plan.push(ClaimDeduction {
            earning_id: earning.earning_id,
            expected_version: earning.version,
            deduct: take,
        });
        remaining -= take;
    }
    plan
}
