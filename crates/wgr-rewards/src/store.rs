//! In-memory reward state store.
//!
//! Same discipline as the ledger store: claims and the expiry sweep both
//! mutate earning rows, so every multi-row write is conditioned on the rows'
//! versions and applied all-or-nothing. A claim plan that raced an expiry
//! fails cleanly and the engine re-plans from fresh reads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use wgr_ledger::Micros;

use crate::types::{Claim, Earning, EarningStatus, UserRewardState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardStoreError {
    /// An earning for this source wager already exists (redelivery).
    DuplicateSource { earning_id: Uuid },
    UnknownEarning { earning_id: Uuid },
    /// A planned row's version moved; the caller re-reads and re-plans.
    PlanConflict { earning_id: Uuid },
    /// A planned deduction no longer fits the row's available amount.
    PlanOverdraw { earning_id: Uuid },
}

impl fmt::Display for RewardStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSource { earning_id } => {
                write!(f, "source wager already accrued as earning {earning_id}")
            }
            Self::UnknownEarning { earning_id } => write!(f, "unknown earning {earning_id}"),
            Self::PlanConflict { earning_id } => {
                write!(f, "earning {earning_id} changed since the plan was built")
            }
            Self::PlanOverdraw { earning_id } => {
                write!(f, "planned deduction exceeds availability on {earning_id}")
            }
        }
    }
}

impl std::error::Error for RewardStoreError {}

/// One planned deduction against one earning, versioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimDeduction {
    pub earning_id: Uuid,
    pub expected_version: u64,
    pub deduct: Micros,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserRewardState>,
    earnings: HashMap<Uuid, Earning>,
    /// Creation order — the FIFO consumed by claims.
    order: Vec<Uuid>,
    by_source: HashMap<String, Uuid>,
    claims: Vec<Claim>,
}

#[derive(Default)]
pub struct RewardStore {
    inner: Mutex<Inner>,
}

impl RewardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, user_id: Uuid) -> Option<UserRewardState> {
        let inner = self.inner.lock().expect("reward store poisoned");
        inner.users.get(&user_id).cloned()
    }

    pub fn upsert_user(&self, state: UserRewardState) {
        let mut inner = self.inner.lock().expect("reward store poisoned");
        inner.users.insert(state.user_id, state);
    }

    /// Insert a new earning; rejects a duplicate source wager id. This is
    /// the at-least-once consumer's idempotency guard.
    pub fn insert_earning(&self, earning: Earning) -> Result<(), RewardStoreError> {
        let mut inner = self.inner.lock().expect("reward store poisoned");
        if let Some(&existing) = inner.by_source.get(&earning.source_wager_id) {
            return Err(RewardStoreError::DuplicateSource {
                earning_id: existing,
            });
        }
        inner
            .by_source
            .insert(earning.source_wager_id.clone(), earning.earning_id);
        inner.order.push(earning.earning_id);
        inner.earnings.insert(earning.earning_id, earning);
        Ok(())
    }

    pub fn earning(&self, earning_id: Uuid) -> Option<Earning> {
        let inner = self.inner.lock().expect("reward store poisoned");
        inner.earnings.get(&earning_id).cloned()
    }

    /// All earnings for a user in creation (FIFO) order.
    pub fn earnings_for(&self, user_id: Uuid) -> Vec<Earning> {
        let inner = self.inner.lock().expect("reward store poisoned");
        inner
            .order
            .iter()
            .filter_map(|id| inner.earnings.get(id))
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Claimable earnings for a user, oldest first.
    pub fn claimable_for(&self, user_id: Uuid, now: DateTime<Utc>) -> Vec<Earning> {
        self.earnings_for(user_id)
            .into_iter()
            .filter(|e| e.claimable_at(now))
            .collect()
    }

    /// Sum of available amounts across non-expired earnings — the number
    /// reported to the user.
    pub fn available_total(&self, user_id: Uuid, now: DateTime<Utc>) -> Micros {
        self.claimable_for(user_id, now)
            .iter()
            .fold(Micros::ZERO, |acc, e| acc + e.available_amount)
    }

    /// Sum of earned amounts for earnings created at or after `since` —
    /// window-limit bookkeeping.
    pub fn accrued_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Micros {
        self.earnings_for(user_id)
            .iter()
            .filter(|e| e.created_at >= since)
            .fold(Micros::ZERO, |acc, e| acc + e.earned_amount)
    }

    /// Apply a claim plan atomically: every row must still be at its
    /// expected version and able to cover its deduction, or nothing moves.
    pub fn apply_claim_plan(&self, plan: &[ClaimDeduction]) -> Result<(), RewardStoreError> {
        let mut inner = self.inner.lock().expect("reward store poisoned");

        for d in plan {
            let earning =
                inner
                    .earnings
                    .get(&d.earning_id)
                    .ok_or(RewardStoreError::UnknownEarning {
                        earning_id: d.earning_id,
                    })?;
            if earning.version != d.expected_version {
                return Err(RewardStoreError::PlanConflict {
                    earning_id: d.earning_id,
                });
            }
            if d.deduct > earning.available_amount {
                return Err(RewardStoreError::PlanOverdraw {
                    earning_id: d.earning_id,
                });
            }
        }

        for d in plan {
            let earning = inner.earnings.get_mut(&d.earning_id).expect("checked");
            earning.available_amount -= d.deduct;
            earning.status = if earning.available_amount.is_zero() {
                EarningStatus::Claimed
            } else {
                EarningStatus::PartiallyClaimed
            };
            earning.version += 1;
        }
        Ok(())
    }

    /// Undo an applied plan after a failed balance credit. Conditional on
    /// the post-apply versions: a row the expiry sweep took in the meantime
    /// stays expired (the money was forfeit either way) and is skipped.
    pub fn revert_claim_plan(&self, plan: &[ClaimDeduction]) -> usize {
        let mut inner = self.inner.lock().expect("reward store poisoned");
        let mut reverted = 0;
        for d in plan {
            if let Some(earning) = inner.earnings.get_mut(&d.earning_id) {
                if earning.version != d.expected_version + 1 {
                    continue;
                }
                earning.available_amount += d.deduct;
                earning.status = if earning.available_amount == earning.earned_amount {
                    EarningStatus::Available
                } else {
                    EarningStatus::PartiallyClaimed
                };
                earning.version += 1;
                reverted += 1;
            }
        }
        reverted
    }

    /// Expire every earning past its deadline that still has availability.
    /// Returns the rows transitioned (post-state).
    /// Transition due earnings to `Expired`. Each returned row is paired
    /// with the amount that was still available when it lapsed — for a
    /// partially-claimed earning that is the unclaimed remainder, not the
    /// original earned amount.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<(Earning, Micros)> {
        let mut inner = self.inner.lock().expect("reward store poisoned");
        let mut expired = Vec::new();
        for earning in inner.earnings.values_mut() {
            if earning.status != EarningStatus::Expired
                && earning.expires_at <= now
                && earning.available_amount > Micros::ZERO
            {
                let forfeited = earning.available_amount;
                earning.available_amount = Micros::ZERO;
                earning.status = EarningStatus::Expired;
                earning.version += 1;
                expired.push((earning.clone(), forfeited));
            }
        }
        expired
    }

    pub fn record_claim(&self, claim: Claim) {
        let mut inner = self.inner.lock().expect("reward store poisoned");
        inner.claims.push(claim);
    }

    pub fn claims_for(&self, user_id: Uuid) -> Vec<Claim> {
        let inner = self.inner.lock().expect("reward store poisoned");
        inner
            .claims
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Total net amount ever claimed by a user.
    pub fn total_claimed(&self, user_id: Uuid) -> Micros {
        let inner = self.inner.lock().expect("reward store poisoned");
        inner
            .claims
            .iter()
            .filter(|c| c.user_id == user_id && c.status == crate::types::ClaimStatus::Completed)
            .fold(Micros::ZERO, |acc, c| acc + c.net_amount)
    }
}
