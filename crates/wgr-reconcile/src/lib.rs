//! Balance reconciliation: compares the internal ledger balance against the
//! balance the game provider reports for the same user, and repairs small
//! drifts.
//!
//! Policy is deliberately asymmetric:
//! - discrepancy within tolerance: the internal balance is adjusted to the
//!   provider's value (the provider is the system of record for in-flight
//!   game state) and the adjustment is reported for audit;
//! - discrepancy above tolerance: never auto-adjusted — a drift that large
//!   may be a processing bug, and silently masking it would destroy the
//!   evidence. It is surfaced for manual review instead.
//!
//! `validate` is a pure comparison over two snapshot reads; `reconcile`
//! decides and (through the caller-supplied repair primitive) applies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use wgr_ledger::Micros;

/// Result of comparing the two balance views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub user_id: Uuid,
    pub internal_balance: Micros,
    pub provider_balance: Micros,
    pub in_sync: bool,
    /// internal - provider; positive means we think the user has more.
    pub discrepancy: Micros,
    pub checked_at: DateTime<Utc>,
}

/// Decision (and effect) of one reconcile pass for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Views agree; nothing to do.
    InSync,
    /// Drift within tolerance: internal balance was set to the provider's.
    Adjusted {
        previous_internal: Micros,
        new_internal: Micros,
        discrepancy: Micros,
    },
    /// Drift above tolerance: surfaced, not healed.
    ManualReviewRequired {
        discrepancy: Micros,
        tolerance: Micros,
    },
}

impl ReconcileOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ReconcileOutcome::InSync)
    }
}

/// Compare two snapshot balances. No locking, no side effects.
pub fn validate(
    user_id: Uuid,
    internal_balance: Micros,
    provider_balance: Micros,
    now: DateTime<Utc>,
) -> SyncStatus {
    let discrepancy = internal_balance - provider_balance;
    SyncStatus {
        user_id,
        internal_balance,
        provider_balance,
        in_sync: discrepancy.is_zero(),
        discrepancy,
        checked_at: now,
    }
}

/// Decide what to do about a validated status. `repair` applies the
/// internal-balance overwrite and is only invoked for the within-tolerance
/// case; it receives the provider balance as the target value.
pub fn reconcile<E, F>(
    status: &SyncStatus,
    tolerance: Micros,
    repair: F,
) -> Result<ReconcileOutcome, E>
where
    F: FnOnce(Micros) -> Result<Micros, E>,
{
    if status.in_sync {
        return Ok(ReconcileOutcome::InSync);
    }

    if status.discrepancy.abs() > tolerance {
        warn!(
            user_id = %status.user_id,
            discrepancy = %status.discrepancy,
            tolerance = %tolerance,
            "balance discrepancy exceeds tolerance; flagging for manual review"
        );
        return Ok(ReconcileOutcome::ManualReviewRequired {
            discrepancy: status.discrepancy,
            tolerance,
        });
    }

    let new_internal = repair(status.provider_balance)?;
    info!(
        user_id = %status.user_id,
        previous = %status.internal_balance,
        new = %new_internal,
        "balance adjusted to provider value"
    );
    Ok(ReconcileOutcome::Adjusted {
        previous_internal: status.internal_balance,
        new_internal,
        discrepancy: status.discrepancy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(internal_units: i64, provider_micros: i64) -> SyncStatus {
        validate(
            Uuid::new_v4(),
            Micros::from_units(internal_units),
            Micros::new(provider_micros),
            Utc::now(),
        )
    }

    #[test]
    fn matching_views_are_in_sync() {
        let s = validate(
            Uuid::new_v4(),
            Micros::from_units(255),
            Micros::from_units(255),
            Utc::now(),
        );
        assert!(s.in_sync);
        assert_eq!(s.discrepancy, Micros::ZERO);

        let outcome: ReconcileOutcome =
            reconcile::<(), _>(&s, Micros::from_units(1), |_| unreachable!("no repair in sync"))
                .unwrap();
        assert!(outcome.is_clean());
    }

    #[test]
    fn small_drift_heals_toward_provider() {
        // Internal $255.00, provider $254.75: drift of 25 cents.
        let s = status(255, 254_750_000);
        assert!(!s.in_sync);
        assert_eq!(s.discrepancy, Micros::new(250_000));

        let outcome = reconcile::<(), _>(&s, Micros::from_units(1), |target| {
            assert_eq!(target, Micros::new(254_750_000));
            Ok(target)
        })
        .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Adjusted {
                previous_internal: Micros::from_units(255),
                new_internal: Micros::new(254_750_000),
                discrepancy: Micros::new(250_000),
            }
        );
    }

    #[test]
    fn large_drift_is_surfaced_not_healed() {
        // $10 apart with a $1 tolerance: must not touch the balance.
        let s = status(265, 255_000_000);
        let outcome = reconcile::<(), _>(&s, Micros::from_units(1), |_| {
            panic!("repair must not run above tolerance")
        })
        .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::ManualReviewRequired {
                discrepancy: Micros::from_units(10),
                tolerance: Micros::from_units(1),
            }
        );
    }

    #[test]
    fn negative_drift_within_tolerance_also_heals() {
        // Provider says the user has more than we do.
        let s = status(254, 254_900_000);
        assert_eq!(s.discrepancy, Micros::new(-900_000));
        let outcome = reconcile::<(), _>(&s, Micros::from_units(1), Ok).unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Adjusted { .. }));
    }
}
