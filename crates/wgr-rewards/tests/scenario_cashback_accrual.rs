//! Accrual scenarios: GGR math, idempotent event consumption, window
//! limits, tier progression.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use wgr_ledger::Micros;
use wgr_rewards::{
    AccrualOutcome, NoopRewardHooks, RewardEngine, RewardPolicy, RewardStore, RewardTier,
    TierTable,
};
use wgr_schemas::WagerPlacedEvent;

fn tier(level: u32, min_ggr: Micros, bps: i64, daily: Option<Micros>) -> RewardTier {
    RewardTier {
        tier_level: level,
        name: format!("tier-{level}"),
        min_ggr_required: min_ggr,
        cashback_bps: bps,
        daily_limit: daily,
        weekly_limit: None,
        monthly_limit: None,
        special_flags: Vec::new(),
    }
}

fn engine(tiers: Vec<RewardTier>) -> RewardEngine {
    let policy = RewardPolicy {
        tiers: TierTable::new(tiers).unwrap(),
        house_edge_bps: HashMap::from([("blackjack".to_string(), 150)]),
        default_house_edge_bps: 200,
        claim_fee_bps: 0,
        earning_expiry_days: 30,
    };
    RewardEngine::new(
        Arc::new(RewardStore::new()),
        Arc::new(policy),
        Arc::new(NoopRewardHooks),
    )
}

fn wager_event(user_id: Uuid, tx_id: &str, amount: Micros, now: DateTime<Utc>) -> WagerPlacedEvent {
    WagerPlacedEvent {
        user_id,
        game_id: "slots-777".to_string(),
        round_id: "round-1".to_string(),
        amount_micros: amount.raw(),
        house_edge_bps: None,
        source_transaction_id: tx_id.to_string(),
        ts_utc: now,
    }
}

#[test]
fn ggr_and_cashback_amounts_are_exact() {
    // GIVEN a 0.5% cashback tier and a 2% default house edge
    let engine = engine(vec![tier(1, Micros::ZERO, 50, None)]);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();

    // WHEN a $25.00 wager event arrives
    let outcome = engine
        .on_wager_event(&wager_event(user, "tx-1", Micros::from_units(25), now), now)
        .unwrap();

    // THEN GGR is exactly $0.50 and cashback exactly $0.0025
    match outcome {
        AccrualOutcome::Accrued { ggr, earned, .. } => {
            assert_eq!(ggr, Micros::new(500_000));
            assert_eq!(earned, Micros::new(2_500));
        }
        other => panic!("expected accrual, got {other:?}"),
    }
    assert_eq!(engine.store().available_total(user, now), Micros::new(2_500));
}

#[test]
fn redelivered_event_accrues_nothing() {
    let engine = engine(vec![tier(1, Micros::ZERO, 50, None)]);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();
    let event = wager_event(user, "tx-1", Micros::from_units(25), now);

    let first = engine.on_wager_event(&event, now).unwrap();
    let AccrualOutcome::Accrued { earning_id, .. } = first else {
        panic!("first delivery must accrue");
    };

    // Three redeliveries of the same source wager.
    for _ in 0..3 {
        let outcome = engine.on_wager_event(&event, now).unwrap();
        assert_eq!(outcome, AccrualOutcome::Duplicate { earning_id });
    }

    // Lifetime GGR counted exactly once.
    let summary = engine.summary(user, now);
    assert_eq!(summary.lifetime_ggr, Micros::new(500_000));
    assert_eq!(summary.available_cashback, Micros::new(2_500));
}

#[test]
fn daily_limit_clamps_and_still_guards_duplicates() {
    // GIVEN a tier paying 100% of GGR with a $1.00 daily cap
    let engine = engine(vec![tier(
        1,
        Micros::ZERO,
        10_000,
        Some(Micros::from_units(1)),
    )]);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();

    // WHEN wagers worth $0.80 then $0.80 of cashback arrive the same day
    // ($40 at 2% edge -> $0.80 GGR -> $0.80 cashback at 100%)
    let o1 = engine
        .on_wager_event(&wager_event(user, "tx-1", Micros::from_units(40), now), now)
        .unwrap();
    let o2 = engine
        .on_wager_event(&wager_event(user, "tx-2", Micros::from_units(40), now), now)
        .unwrap();

    // THEN the second accrual is clamped to the remaining $0.20 headroom
    match (o1, o2) {
        (
            AccrualOutcome::Accrued { earned: e1, .. },
            AccrualOutcome::Accrued {
                earned: e2,
                clamped_by,
                ..
            },
        ) => {
            assert_eq!(e1, Micros::new(800_000));
            assert_eq!(e2, Micros::new(200_000));
            assert_eq!(clamped_by, Micros::new(600_000));
        }
        other => panic!("expected two accruals, got {other:?}"),
    }

    // A third wager accrues zero but its earning row still exists, so a
    // redelivery is recognized as a duplicate rather than re-evaluated.
    let o3 = engine
        .on_wager_event(&wager_event(user, "tx-3", Micros::from_units(40), now), now)
        .unwrap();
    let AccrualOutcome::Accrued {
        earned, earning_id, ..
    } = o3
    else {
        panic!("clamped-to-zero wager must still accrue a row");
    };
    assert_eq!(earned, Micros::ZERO);
    let replay = engine
        .on_wager_event(&wager_event(user, "tx-3", Micros::from_units(40), now), now)
        .unwrap();
    assert_eq!(replay, AccrualOutcome::Duplicate { earning_id });

    // Next day the headroom resets.
    let tomorrow = now + Duration::days(1);
    let o4 = engine
        .on_wager_event(
            &wager_event(user, "tx-4", Micros::from_units(40), tomorrow),
            tomorrow,
        )
        .unwrap();
    let AccrualOutcome::Accrued { earned, .. } = o4 else {
        panic!("expected accrual");
    };
    assert_eq!(earned, Micros::new(800_000));
}

#[test]
fn tier_progression_is_monotonic() {
    // GIVEN bronze at $0 GGR (0.5%) and silver at $10 GGR (1%)
    let engine = engine(vec![
        tier(1, Micros::ZERO, 50, None),
        tier(2, Micros::from_units(10), 100, None),
    ]);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();

    // WHEN lifetime GGR crosses the silver threshold ($600 at 2% = $12 GGR)
    engine
        .on_wager_event(&wager_event(user, "tx-1", Micros::from_units(600), now), now)
        .unwrap();
    let summary = engine.summary(user, now);
    assert_eq!(summary.tier_level, 2);
    assert_eq!(summary.cashback_bps, 100);

    // THEN further wagers accrue at the silver rate, and the level never
    // drops regardless of subsequent activity.
    let outcome = engine
        .on_wager_event(&wager_event(user, "tx-2", Micros::from_units(25), now), now)
        .unwrap();
    let AccrualOutcome::Accrued {
        earned, tier_level, ..
    } = outcome
    else {
        panic!("expected accrual");
    };
    assert_eq!(tier_level, 2);
    // $25 * 2% = $0.50 GGR; 1% of that = $0.005.
    assert_eq!(earned, Micros::new(5_000));
    assert_eq!(engine.summary(user, now).tier_level, 2);
}

#[test]
fn house_edge_resolution_order() {
    let engine = engine(vec![tier(1, Micros::ZERO, 10_000, None)]);
    let user = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 8, 19, 12, 0, 0).unwrap();

    // Edge carried on the event wins.
    let mut event = wager_event(user, "tx-1", Micros::from_units(100), now);
    event.house_edge_bps = Some(500);
    let AccrualOutcome::Accrued { ggr, .. } = engine.on_wager_event(&event, now).unwrap() else {
        panic!("expected accrual");
    };
    assert_eq!(ggr, Micros::from_units(5));

    // Per-game table next.
    let mut event = wager_event(user, "tx-2", Micros::from_units(100), now);
    event.game_id = "blackjack".to_string();
    let AccrualOutcome::Accrued { ggr, .. } = engine.on_wager_event(&event, now).unwrap() else {
        panic!("expected accrual");
    };
    assert_eq!(ggr, Micros::new(1_500_000));

    // Policy default last.
    let event = wager_event(user, "tx-3", Micros::from_units(100), now);
    let AccrualOutcome::Accrued { ggr, .. } = engine.on_wager_event(&event, now).unwrap() else {
        panic!("expected accrual");
    };
    assert_eq!(ggr, Micros::from_units(2));
}
