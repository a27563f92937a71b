//! Wire envelope for realtime client notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wgr_ledger::Micros;

/// One notification frame, serialized as JSON with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    /// Any committed balance change (wager, result, rollback, claim
    /// credit, reconciliation repair).
    BalanceUpdated {
        account_id: Uuid,
        balance: Micros,
        currency: String,
    },
    /// A cashback earning landed for the user.
    CashbackAccrued {
        user_id: Uuid,
        earned: Micros,
        available_total: Micros,
    },
    /// A claim completed and the wallet was credited.
    CashbackClaimed {
        user_id: Uuid,
        claim_id: Uuid,
        net_amount: Micros,
        available_total: Micros,
    },
    /// A round closed net-positive for the player.
    WinRecorded {
        account_id: Uuid,
        round_id: String,
        net_amount: Micros,
        currency: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_json_shape() {
        let account_id = Uuid::nil();
        let frame = EventEnvelope::BalanceUpdated {
            account_id,
            balance: Micros::from_units(100),
            currency: "USD".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "balance_updated");
        assert_eq!(json["balance"], 100_000_000i64);
        assert_eq!(json["currency"], "USD");
    }
}
