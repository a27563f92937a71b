//! For any sequence of wager -> result -> rollback on one round, the final
//! balance equals the initial balance minus the net of all currently
//! non-rolled-back amounts.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use wgr_ledger::{
    LedgerStore, Micros, NoopHooks, Processor, RequestType, SessionStore, TxError, TxRequest,
    TxStatus,
};

struct Harness {
    processor: Processor,
    account: Uuid,
}

impl Harness {
    fn new(opening_units: i64) -> Self {
        let store = Arc::new(LedgerStore::new());
        let sessions = Arc::new(SessionStore::new());
        let account = Uuid::new_v4();
        store
            .open_account(account, "USD", Micros::from_units(opening_units), Utc::now())
            .unwrap();
        sessions.bind("sess-1", account).unwrap();
        Self {
            processor: Processor::new(store, sessions, Arc::new(NoopHooks)),
            account,
        }
    }

    fn request(&self, rt: RequestType, tx: &str, units: i64, reference: Option<&str>) -> TxRequest {
        TxRequest {
            request_type: rt,
            transaction_id: tx.to_string(),
            account_id: self.account,
            session_id: "sess-1".to_string(),
            round_id: "round-1".to_string(),
            game_id: "game-1".to_string(),
            amount: Micros::from_units(units),
            reference_transaction_id: reference.map(str::to_string),
        }
    }

    fn balance(&self) -> Micros {
        self.processor.balance_of(self.account).unwrap()
    }
}

#[test]
fn scenario_wager_result_rollback_conserves_balance() {
    let h = Harness::new(100);
    let now = Utc::now();

    // Wager $25, win $40 back: balance 100 - 25 + 40 = 115.
    h.processor
        .apply(&h.request(RequestType::Wager, "w1", 25, None), now)
        .unwrap();
    h.processor
        .apply(&h.request(RequestType::Result, "r1", 40, None), now)
        .unwrap();
    assert_eq!(h.balance(), Micros::from_units(115));

    // Roll back the wager: its debit is returned. Non-rolled-back net is
    // now +40, so balance = 100 + 40.
    h.processor
        .apply(&h.request(RequestType::Rollback, "rb1", 25, Some("w1")), now)
        .unwrap();
    assert_eq!(h.balance(), Micros::from_units(140));

    // Roll back the result too: round fully undone, balance back to start.
    h.processor
        .apply(&h.request(RequestType::Rollback, "rb2", 40, Some("r1")), now)
        .unwrap();
    assert_eq!(h.balance(), Micros::from_units(100));
}

#[test]
fn scenario_rollback_cannot_exceed_applied_amount() {
    let h = Harness::new(100);
    let now = Utc::now();

    h.processor
        .apply(&h.request(RequestType::Wager, "w1", 25, None), now)
        .unwrap();

    let err = h
        .processor
        .apply(&h.request(RequestType::Rollback, "rb1", 30, Some("w1")), now)
        .unwrap_err();
    assert!(matches!(err, TxError::InvalidRollbackAmount { .. }));
    assert_eq!(h.balance(), Micros::from_units(75));

    // Partial rollback is fine; the remainder stays bounded.
    h.processor
        .apply(&h.request(RequestType::Rollback, "rb2", 20, Some("w1")), now)
        .unwrap();
    assert_eq!(h.balance(), Micros::from_units(95));

    let err = h
        .processor
        .apply(&h.request(RequestType::Rollback, "rb3", 10, Some("w1")), now)
        .unwrap_err();
    assert!(matches!(err, TxError::InvalidRollbackAmount { .. }));
}

#[test]
fn scenario_rollback_of_rollback_reapplies_within_bounds() {
    let h = Harness::new(100);
    let now = Utc::now();

    h.processor
        .apply(&h.request(RequestType::Wager, "w1", 25, None), now)
        .unwrap();
    h.processor
        .apply(&h.request(RequestType::Rollback, "rb1", 25, Some("w1")), now)
        .unwrap();
    assert_eq!(h.balance(), Micros::from_units(100));

    // Re-apply the rolled-back wager debit.
    let outcome = h
        .processor
        .apply(
            &h.request(RequestType::RollbackOfRollback, "rr1", 25, Some("w1")),
            now,
        )
        .unwrap();
    assert_eq!(outcome.status, TxStatus::Applied);
    assert_eq!(h.balance(), Micros::from_units(75));

    // Nothing left to re-apply.
    let err = h
        .processor
        .apply(
            &h.request(RequestType::RollbackOfRollback, "rr2", 25, Some("w1")),
            now,
        )
        .unwrap_err();
    assert!(matches!(err, TxError::InvalidRollbackAmount { .. }));
}

#[test]
fn scenario_rollback_with_zero_amount_reverses_whole_reference() {
    let h = Harness::new(100);
    let now = Utc::now();

    h.processor
        .apply(&h.request(RequestType::Wager, "w1", 25, None), now)
        .unwrap();
    h.processor
        .apply(&h.request(RequestType::Rollback, "rb1", 0, Some("w1")), now)
        .unwrap();
    assert_eq!(h.balance(), Micros::from_units(100));
}

#[test]
fn scenario_rollback_of_unknown_reference_rejected() {
    let h = Harness::new(100);
    let now = Utc::now();

    let err = h
        .processor
        .apply(
            &h.request(RequestType::Rollback, "rb1", 25, Some("ghost")),
            now,
        )
        .unwrap_err();
    assert!(matches!(err, TxError::UnknownReference { .. }));

    let err = h
        .processor
        .apply(&h.request(RequestType::Rollback, "rb2", 25, None), now)
        .unwrap_err();
    assert!(matches!(err, TxError::MissingReference));
}
