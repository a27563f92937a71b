//! Reward state records: per-user progress, earnings, claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wgr_ledger::Micros;

/// One row per user, mutated on every processed wager event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRewardState {
    pub user_id: Uuid,
    pub current_tier_level: u32,
    pub lifetime_ggr: Micros,
    pub lifetime_wagers: Micros,
    /// Progress toward the next tier in basis points (0..=10_000).
    pub progress_bps: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    Pending,
    Available,
    PartiallyClaimed,
    Claimed,
    Expired,
}

/// One accrual event. `available_amount` only ever decreases (claims,
/// expiry); `earned_amount` is immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earning {
    pub earning_id: Uuid,
    pub user_id: Uuid,
    /// Provider transaction id of the source wager — uniqueness here is the
    /// at-least-once consumer's idempotency guard.
    pub source_wager_id: String,
    pub game_id: String,
    pub ggr_amount: Micros,
    /// Cashback rate captured at event time.
    pub cashback_bps: i64,
    pub earned_amount: Micros,
    pub available_amount: Micros,
    pub status: EarningStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic-concurrency version; claims and the expiry sweep both
    /// condition their writes on it.
    pub version: u64,
}

impl Earning {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EarningStatus::Expired || self.expires_at <= now
    }

    /// Claimable right now: available funds on a live earning.
    pub fn claimable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now)
            && self.available_amount > Micros::ZERO
            && matches!(
                self.status,
                EarningStatus::Available | EarningStatus::PartiallyClaimed
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Completed,
    Rejected,
}

/// One user claim action, recorded after the deduction + credit unit lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: Uuid,
    pub user_id: Uuid,
    pub requested_amount: Micros,
    pub fee: Micros,
    pub net_amount: Micros,
    /// Earnings consumed, oldest first.
    pub earning_ids_consumed: Vec<Uuid>,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
}

/// What `summary` reports to the user; self-sufficient for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSummary {
    pub user_id: Uuid,
    pub tier_level: u32,
    pub tier_name: String,
    pub cashback_bps: i64,
    pub lifetime_ggr: Micros,
    pub lifetime_wagers: Micros,
    pub progress_bps: i64,
    pub next_tier_min_ggr: Option<Micros>,
    /// Sum of `available_amount` across non-expired earnings.
    pub available_cashback: Micros,
    /// Earnings still `Pending` (not yet claimable).
    pub pending_cashback: Micros,
    pub total_claimed: Micros,
    pub daily_headroom: Option<Micros>,
    pub weekly_headroom: Option<Micros>,
    pub monthly_headroom: Option<Micros>,
}

/// Outcome of one wager-event accrual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// Earning created (possibly clamped, possibly zero).
    Accrued {
        earning_id: Uuid,
        ggr: Micros,
        earned: Micros,
        /// Amount shaved off by window limits.
        clamped_by: Micros,
        tier_level: u32,
    },
    /// Redelivery of an already-processed source wager; no effect.
    Duplicate { earning_id: Uuid },
}
