//! Claim and expiry scenarios: FIFO consumption, credit-failure
//! compensation, the 30-day forfeit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use wgr_ledger::{Micros, TxError};
use wgr_rewards::{
    EarningStatus, NoopRewardHooks, RewardEngine, RewardError, RewardPolicy, RewardStore,
    RewardTier, TierTable,
};
use wgr_schemas::WagerPlacedEvent;

fn engine_with_fee(claim_fee_bps: i64) -> RewardEngine {
    // Single tier paying 100% of GGR so earned amounts are easy to stage.
    let tiers = TierTable::new(vec![RewardTier {
        tier_level: 1,
        name: "bronze".to_string(),
        min_ggr_required: Micros::ZERO,
        cashback_bps: 10_000,
        daily_limit: None,
        weekly_limit: None,
        monthly_limit: None,
        special_flags: Vec::new(),
    }])
    .unwrap();
    let policy = RewardPolicy {
        tiers,
        house_edge_bps: HashMap::new(),
        default_house_edge_bps: 10_000,
        claim_fee_bps,
        earning_expiry_days: 30,
    };
    RewardEngine::new(
        Arc::new(RewardStore::new()),
        Arc::new(policy),
        Arc::new(NoopRewardHooks),
    )
}

/// Stage one earning worth exactly `amount` (100% edge, 100% cashback).
fn stage_earning(
    engine: &RewardEngine,
    user: Uuid,
    tx_id: &str,
    amount: Micros,
    now: DateTime<Utc>,
) {
    engine
        .on_wager_event(
            &WagerPlacedEvent {
                user_id: user,
                game_id: "slots-777".to_string(),
                round_id: "round-1".to_string(),
                amount_micros: amount.raw(),
                house_edge_bps: None,
                source_transaction_id: tx_id.to_string(),
                ts_utc: now,
            },
            now,
        )
        .unwrap();
}

#[test]
fn claim_consumes_earnings_oldest_first() {
    // GIVEN two $3.00 earnings, oldest first
    let engine = engine_with_fee(0);
    let user = Uuid::new_v4();
    let t0 = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    let t1 = t0 + Duration::hours(1);
    stage_earning(&engine, user, "tx-1", Micros::from_units(3), t0);
    stage_earning(&engine, user, "tx-2", Micros::from_units(3), t1);

    // WHEN the user claims $5.50
    let claim = engine
        .claim(user, Micros::new(5_500_000), t1, |net| {
            assert_eq!(net, Micros::new(5_500_000));
            Ok(Micros::from_units(100))
        })
        .unwrap();

    // THEN the first earning is fully consumed, the second keeps $0.50
    assert_eq!(claim.net_amount, Micros::new(5_500_000));
    assert_eq!(claim.earning_ids_consumed.len(), 2);
    let earnings = engine.store().earnings_for(user);
    assert_eq!(earnings[0].status, EarningStatus::Claimed);
    assert_eq!(earnings[0].available_amount, Micros::ZERO);
    assert_eq!(earnings[1].status, EarningStatus::PartiallyClaimed);
    assert_eq!(earnings[1].available_amount, Micros::new(500_000));
    assert_eq!(
        engine.store().available_total(user, t1),
        Micros::new(500_000)
    );
}

#[test]
fn claim_beyond_available_is_rejected_untouched() {
    let engine = engine_with_fee(0);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    stage_earning(&engine, user, "tx-1", Micros::from_units(2), now);

    let err = engine
        .claim(user, Micros::from_units(5), now, |_| {
            panic!("credit must not run for a rejected claim")
        })
        .unwrap_err();

    assert!(matches!(
        err,
        RewardError::InsufficientAvailable {
            requested,
            available,
        } if requested == Micros::from_units(5) && available == Micros::from_units(2)
    ));
    assert_eq!(engine.store().available_total(user, now), Micros::from_units(2));
}

#[test]
fn failed_credit_reverts_deductions() {
    let engine = engine_with_fee(0);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    stage_earning(&engine, user, "tx-1", Micros::from_units(3), now);

    let err = engine
        .claim(user, Micros::from_units(2), now, |_| {
            Err(TxError::UnknownAccount {
                account_id: Uuid::new_v4(),
            })
        })
        .unwrap_err();
    assert!(matches!(err, RewardError::CreditFailed(_)));

    // Availability fully restored; the failed attempt left an audit row only.
    assert_eq!(engine.store().available_total(user, now), Micros::from_units(3));
    let earnings = engine.store().earnings_for(user);
    assert_eq!(earnings[0].status, EarningStatus::Available);
    assert_eq!(engine.store().total_claimed(user), Micros::ZERO);
}

#[test]
fn claim_fee_is_withheld_from_the_credit() {
    // GIVEN a 2% claim fee
    let engine = engine_with_fee(200);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    stage_earning(&engine, user, "tx-1", Micros::from_units(10), now);

    // WHEN claiming $10.00, the wallet is credited $9.80
    let claim = engine
        .claim(user, Micros::from_units(10), now, |net| {
            assert_eq!(net, Micros::new(9_800_000));
            Ok(Micros::from_units(100))
        })
        .unwrap();

    assert_eq!(claim.requested_amount, Micros::from_units(10));
    assert_eq!(claim.fee, Micros::new(200_000));
    assert_eq!(claim.net_amount, Micros::new(9_800_000));
    // The full requested amount was consumed from earnings.
    assert_eq!(engine.store().available_total(user, now), Micros::ZERO);
}

#[test]
fn earnings_expire_after_thirty_days() {
    let engine = engine_with_fee(0);
    let user = Uuid::new_v4();
    let t0 = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    stage_earning(&engine, user, "tx-1", Micros::from_units(3), t0);

    // Day 29: still claimable, sweep takes nothing.
    let day29 = t0 + Duration::days(29);
    assert_eq!(engine.expire_sweep(day29), 0);
    assert_eq!(engine.store().available_total(user, day29), Micros::from_units(3));

    // Day 30: expired, swept, gone.
    let day30 = t0 + Duration::days(30);
    assert_eq!(engine.expire_sweep(day30), 1);
    assert_eq!(engine.store().available_total(user, day30), Micros::ZERO);
    let earnings = engine.store().earnings_for(user);
    assert_eq!(earnings[0].status, EarningStatus::Expired);

    // A claim against the expired earning is rejected.
    let err = engine
        .claim(user, Micros::from_units(1), day30, |_| {
            panic!("credit must not run")
        })
        .unwrap_err();
    assert!(matches!(err, RewardError::InsufficientAvailable { .. }));

    // Sweeping again is a no-op (transitions are one-way).
    assert_eq!(engine.expire_sweep(day30 + Duration::days(1)), 0);
}

#[test]
fn partial_claim_then_expiry_forfeits_only_the_remainder() {
    let engine = engine_with_fee(0);
    let user = Uuid::new_v4();
    let t0 = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    stage_earning(&engine, user, "tx-1", Micros::from_units(3), t0);

    // Claim $2 of the $3, then let the rest lapse.
    engine
        .claim(user, Micros::from_units(2), t0, |net| Ok(net))
        .unwrap();

    let expired = engine.store().expire_due(t0 + Duration::days(30));
    assert_eq!(expired.len(), 1);
    let (earning, forfeited) = &expired[0];
    // Forfeited is the unclaimed $1, not the original $3.
    assert_eq!(*forfeited, Micros::from_units(1));
    assert_eq!(earning.earned_amount, Micros::from_units(3));
    assert_eq!(earning.available_amount, Micros::ZERO);
    assert_eq!(earning.status, EarningStatus::Expired);
}

#[test]
fn expired_earnings_are_excluded_even_before_the_sweep() {
    // The availability view applies the deadline itself; the sweep only
    // persists the transition.
    let engine = engine_with_fee(0);
    let user = Uuid::new_v4();
    let t0 = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    stage_earning(&engine, user, "tx-1", Micros::from_units(3), t0);

    let day31 = t0 + Duration::days(31);
    assert_eq!(engine.store().available_total(user, day31), Micros::ZERO);
    let err = engine
        .claim(user, Micros::from_units(1), day31, |_| {
            panic!("credit must not run")
        })
        .unwrap_err();
    assert!(matches!(err, RewardError::InsufficientAvailable { .. }));
}
