//! Core ledger types: balances, the append-only transaction record, rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fixedpoint::Micros;

/// One balance row per (account, currency). Owned exclusively by the
/// transaction processor; reconciliation and notification only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub currency: String,
    pub amount: Micros,
    /// Funds held against in-flight operations; not spendable by wagers.
    pub reserved: Micros,
    /// Monotonic optimistic-concurrency version. Every committed mutation
    /// increments it by exactly one.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Spendable amount: `amount - reserved`.
    pub fn available(&self) -> Micros {
        self.amount - self.reserved
    }
}

/// The four provider request types. `(transaction_id, request_type)` is the
/// idempotency key — the same provider transaction id legally appears once
/// as a wager and once as its rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Wager,
    Result,
    Rollback,
    RollbackOfRollback,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Wager => "wager",
            RequestType::Result => "result",
            RequestType::Rollback => "rollback",
            RequestType::RollbackOfRollback => "rollback_of_rollback",
        }
    }
}

/// Terminal status of an external transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Applied,
    Rejected,
    AlreadyApplied,
}

/// Append-only external transaction record. Never mutated after creation;
/// the `Applied` row per idempotency key carries the reply returned verbatim
/// on every replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub transaction_id: String,
    pub request_type: RequestType,
    pub round_id: String,
    pub session_id: String,
    pub account_id: Uuid,
    pub amount: Micros,
    pub status: TxStatus,
    pub applied_at: DateTime<Utc>,
    /// Balance after this mutation — replays echo this account state.
    pub balance_after: Micros,
}

/// Key of a logical round: wager and its eventual result/rollback group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundKey {
    pub round_id: String,
    pub session_id: String,
    pub account_id: Uuid,
}

/// Cumulative per-round totals, used to bound rollback legality: a rollback
/// may only undo amounts the round actually had applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Total debited by wagers in this round.
    pub wagered: Micros,
    /// Total credited by results in this round.
    pub returned: Micros,
    /// Wager amount currently undone by rollbacks.
    pub wager_rolled_back: Micros,
    /// Result amount currently undone by rollbacks.
    pub result_rolled_back: Micros,
}

impl Round {
    /// Wagered amount still standing (not rolled back).
    pub fn wagered_outstanding(&self) -> Micros {
        self.wagered - self.wager_rolled_back
    }

    /// Returned amount still standing (not rolled back).
    pub fn returned_outstanding(&self) -> Micros {
        self.returned - self.result_rolled_back
    }

    /// Net outcome of the round from the player's side: positive = win.
    pub fn net(&self) -> Micros {
        self.returned_outstanding() - self.wagered_outstanding()
    }
}

/// A validated provider request, amounts already in micros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub request_type: RequestType,
    pub transaction_id: String,
    pub account_id: Uuid,
    pub session_id: String,
    pub round_id: String,
    pub game_id: String,
    pub amount: Micros,
    /// Required for rollback and rollback-of-rollback.
    pub reference_transaction_id: Option<String>,
}

/// Result of applying a provider request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub status: TxStatus,
    pub balance: Micros,
    pub transaction_id: String,
}
